//! Core traits for the record layer.
//!
//! [`DatagramHandler`] is the seam where handshake and record-protection logic
//! attach to a connection loop.

use std::net::SocketAddr;

use crate::wire::UnifiedHeader;

/// What the connection loop does with a record after the handler saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Queue these bytes for the application's `read`.
    Deliver(Vec<u8>),
    /// Consume the record without delivering anything.
    Discard,
}

/// Per-record handler invoked by a peer connection loop.
///
/// Called once per decoded record, in arrival order, from the loop task that
/// owns the connection. Implementations must not block for long: a slow
/// handler backs up only its own peer's inbox, and the multiplexer drops that
/// peer's excess datagrams.
///
/// # Example
///
/// ```ignore
/// struct Upper;
///
/// impl DatagramHandler for Upper {
///     fn on_record(&self, _: SocketAddr, _: &UnifiedHeader, payload: &[u8]) -> Dispatch {
///         Dispatch::Deliver(payload.to_ascii_uppercase())
///     }
/// }
/// ```
pub trait DatagramHandler: Send + Sync + 'static {
    /// Handle one record from `remote`.
    fn on_record(&self, remote: SocketAddr, header: &UnifiedHeader, payload: &[u8]) -> Dispatch;
}

impl<F> DatagramHandler for F
where
    F: Fn(SocketAddr, &UnifiedHeader, &[u8]) -> Dispatch + Send + Sync + 'static,
{
    fn on_record(&self, remote: SocketAddr, header: &UnifiedHeader, payload: &[u8]) -> Dispatch {
        self(remote, header, payload)
    }
}

/// Default handler: hands payloads to the application unchanged.
///
/// Empty records are keepalives and are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl DatagramHandler for Passthrough {
    fn on_record(&self, _remote: SocketAddr, _header: &UnifiedHeader, payload: &[u8]) -> Dispatch {
        if payload.is_empty() {
            Dispatch::Discard
        } else {
            Dispatch::Deliver(payload.to_vec())
        }
    }
}
