//! Internal utility helpers for name normalization, filesystem paths, and serde helpers.

pub(crate) mod fs;
pub(crate) mod serde;
pub(crate) mod text;
