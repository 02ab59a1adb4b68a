#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod cli;
pub mod config;
pub mod entities;
pub mod error;
pub mod screening;

mod render;
mod sources;
mod transform;
mod utils;

pub use config::Config;
pub use error::RxScreenError;
pub use screening::Screener;
