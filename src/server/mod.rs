//! Server side: one socket, many peers.

mod multiplexer;

pub use multiplexer::*;
