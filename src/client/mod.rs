//! Client side: a single dialed peer.

mod dialer;

pub use dialer::*;
