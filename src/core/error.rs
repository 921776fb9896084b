//! Error types for the record layer and transport.
//!
//! Per-datagram errors ([`WireError`], [`HeaderError`]) are meant to be
//! counted and dropped; they never tear down a connection.

use std::io;

use thiserror::Error;

use crate::crypto::CipherSuiteId;

/// Errors from bounds-checked reads and writes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// A read needed more bytes than remain.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    TruncatedInput {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A fixed-offset write does not fit the destination.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes the write required (offset included).
        needed: usize,
        /// Destination length.
        available: usize,
    },
}

/// Unified Header validation failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// Version other than the single supported one.
    #[error("unsupported protocol version: {0:#06x}")]
    UnsupportedVersion(u16),

    /// Forced sequence width outside {1, 2}.
    #[error("sequence width must be 1 or 2 bytes, got {0}")]
    InvalidSequenceWidth(u8),

    /// Sequence value does not fit the forced 1-byte width.
    #[error("truncated sequence {0} does not fit in 1 byte")]
    SequenceOverflow(u16),

    /// CID longer than its 1-byte length prefix allows.
    #[error("connection id too long: {0} bytes")]
    CidTooLong(usize),

    /// First byte lacks the fixed unified-header prefix.
    #[error("not a unified header: first byte {0:#04x}")]
    NotUnifiedHeader(u8),

    /// Reserved flag bits are set.
    #[error("reserved header bits set: {0:#04x}")]
    ReservedBits(u8),

    /// CID flag set but the encoded CID is empty.
    #[error("connection id flag set with empty connection id")]
    EmptyCid,

    /// CID present although connection IDs were not negotiated.
    #[error("connection id present but not enabled")]
    UnexpectedCid,
}

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// No suite registered under this id.
    #[error("cipher suite not found: {0}")]
    SuiteNotFound(CipherSuiteId),

    /// Server preference and client offer share no suite.
    #[error("cipher suite negotiation failed: no common suite")]
    NegotiationFailed,

    /// Two suites share an id.
    #[error("duplicate cipher suite id: {0}")]
    DuplicateSuite(CipherSuiteId),

    /// Key length does not match the suite.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Length required by the suite.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },

    /// AEAD encryption failed.
    #[error("AEAD seal failed")]
    SealFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD open failed (invalid tag or corrupted)")]
    OpenFailed,
}

/// Invalid [`TransportConfig`](super::TransportConfig) values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// MTU outside the supported range.
    #[error("mtu {mtu} outside {min}..={max}")]
    InvalidMtu {
        /// Configured MTU.
        mtu: usize,
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },

    /// A timeout was set to zero; use `None` to leave it unset.
    #[error("{0} must be non-zero when set")]
    ZeroTimeout(&'static str),

    /// `initial_rto` exceeds `max_rto`.
    #[error("initial_rto exceeds max_rto")]
    RtoOrder,

    /// A queue capacity is zero.
    #[error("{0} must be at least 1")]
    ZeroCapacity(&'static str),

    /// No preferred cipher suites.
    #[error("preferred_suites is empty")]
    NoCipherSuites,

    /// A preferred suite is unknown to the registry.
    #[error("preferred suite not registered: {0}")]
    UnknownSuite(CipherSuiteId),

    /// Replay window of size zero.
    #[error("replay_window_size must be non-zero")]
    ZeroReplayWindow,
}

/// Top-level transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Parse ran out of bytes.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Header failed validation.
    #[error("invalid header: {0}")]
    Header(#[from] HeaderError),

    /// Crypto error (negotiation, suite lookup).
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payload exceeds the connection MTU; nothing was written.
    #[error("payload of {len} bytes exceeds mtu {mtu}")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Connection MTU.
        mtu: usize,
    },

    /// Operation did not complete in time; retryable.
    #[error("operation timed out")]
    Timeout,

    /// Connection is closed.
    #[error("connection closed")]
    Closed,

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Check if this error only drops the offending datagram.
    pub fn is_silent_drop(&self) -> bool {
        matches!(self, TransportError::Wire(_) | TransportError::Header(_))
    }

    /// Check if this error ends the connection (or multiplexer).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Closed
                | TransportError::Io(_)
                | TransportError::Crypto(CryptoError::NegotiationFailed)
        )
    }

    /// Check if the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
