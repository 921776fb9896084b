//! Core constants, configuration, error types and traits.

mod config;
mod constants;
mod error;
mod traits;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use traits::*;
