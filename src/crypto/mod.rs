//! Cipher suites: registry, negotiation and the AEAD primitives they wrap.
//!
//! Record protection itself (sealing payloads, key schedule) is layered on
//! top through [`DatagramHandler`](crate::core::DatagramHandler); this module
//! only provides the building blocks.

mod suite;

pub use suite::*;
