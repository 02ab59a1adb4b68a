//! Adapters from external shapes (reference files, provider output) into domain types.

pub(crate) mod judgment;
pub(crate) mod reference;
