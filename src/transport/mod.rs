//! Per-peer connection machinery.
//!
//! - [`PeerConnection`]: one remote endpoint's loop, queues and timers
//! - [`IdleTimer`]: inactivity deadline behind its own lock
//! - [`DatagramSocket`]: async socket seam ([`UdpSocket`](tokio::net::UdpSocket),
//!   [`ConnectedUdp`], or a test double)
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Multiplexer / DialedConnection        │
//! ├─────────────────────────────────────────┤
//! │   PeerConnection (per remote)           │  ← This module
//! │   inbox, idle timer, app queues         │
//! ├─────────────────────────────────────────┤
//! │   Record layer (wire::UnifiedHeader)    │
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod idle;
mod socket;

pub(crate) use connection::wait_closed;
pub use connection::{ConnectionState, InboundDatagram, PeerConnection, PeerStats};
pub use idle::IdleTimer;
pub(crate) use socket::is_transient;
pub use socket::{ConnectedUdp, DatagramSocket};

#[cfg(test)]
pub(crate) use socket::mock;
