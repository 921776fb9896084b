//! Record-layer wire format.
//!
//! - [`WireCursor`]: bounds-checked big-endian reader
//! - [`bytes`]: fixed-offset and appending big-endian writers
//! - [`UnifiedHeader`]: per-record header codec and [`split_records`]
//!
//! Everything here parses attacker-controlled bytes, so no function panics on
//! short or malformed input; failures surface as
//! [`WireError`](crate::core::WireError) or [`HeaderError`](crate::core::HeaderError).

pub mod bytes;
mod cursor;
mod header;

pub use cursor::WireCursor;
pub use header::*;
