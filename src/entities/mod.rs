//! Patient records and the immutable reference data screening runs against.

pub mod drug;
pub mod patient;
pub mod reference;
pub mod rules;
