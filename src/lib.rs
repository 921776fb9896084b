//! # dtls-mux
//!
//! A DTLS-style secure datagram transport substrate:
//!
//! - **Cipher suites**: an immutable registry of AEAD suites and
//!   server-preference negotiation
//! - **Record layer**: a bounds-checked cursor and the compact Unified Header
//!   codec (epoch, optional connection ID, truncated sequence, optional length)
//! - **Multiplexing**: one UDP socket demultiplexed into independent per-peer
//!   connections, each with its own inbox, idle timer and application queues
//!
//! Handshake and record protection are not built in. They attach per record
//! through the [`DatagramHandler`](core::DatagramHandler) hook.
//!
//! ## Feature Flags
//!
//! - `transport` (default): peer connection loop and socket seam (tokio)
//! - `server` (default): [`Multiplexer`](server::Multiplexer) and [`listen`](server::listen)
//! - `client` (default): [`DialedConnection`](client::DialedConnection) and [`dial`](client::dial)
//!
//! ## Modules
//!
//! - [`core`]: configuration, constants, errors and the handler trait (always included)
//! - [`crypto`]: cipher-suite registry and AEAD primitives (always included)
//! - [`wire`]: cursor and Unified Header codec (always included)
//! - [`transport`]: per-peer connection (requires `transport` feature)
//! - [`server`], [`client`]: high-level APIs
//!
//! ## Example Usage
//!
//! ```rust
//! use dtls_mux::prelude::*;
//!
//! let header = UnifiedHeader::builder().epoch(3).sequence(5).build()?;
//! assert_eq!(header.sequence_width(), SequenceWidth::One);
//!
//! let bytes = header.to_bytes();
//! let (decoded, _) = UnifiedHeader::from_bytes(&bytes)?;
//! assert_eq!(decoded, header);
//!
//! let suite = negotiate(
//!     &[CipherSuiteId(0x1303), CipherSuiteId(0x1301)],
//!     &[CipherSuiteId(0x1301), CipherSuiteId(0x1302)],
//! )?;
//! assert_eq!(suite, CipherSuiteId::TLS_AES_128_GCM_SHA256);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Cipher suites (always included)
pub mod crypto;

// Record layer wire format (always included)
pub mod wire;

// Per-peer connection (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::crypto::*;
    pub use crate::wire::{Record, SequenceWidth, UnifiedHeader, WireCursor, split_records};

    #[cfg(feature = "transport")]
    pub use crate::transport::{ConnectionState, PeerConnection, PeerStats};

    #[cfg(feature = "client")]
    pub use crate::client::{DialedConnection, dial, dial_host};

    #[cfg(feature = "server")]
    pub use crate::server::{Multiplexer, listen};
}

// Re-export commonly used items at crate root
pub use crate::core::{
    DatagramHandler, Dispatch, TransportConfig, TransportError, TransportResult,
};
pub use crate::crypto::{CipherSuiteId, CipherSuiteRegistry};
pub use crate::wire::UnifiedHeader;

#[cfg(feature = "client")]
pub use crate::client::{DialedConnection, dial};

#[cfg(feature = "server")]
pub use crate::server::{Multiplexer, listen};
