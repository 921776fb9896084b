//! Protocol constants for the DTLS-style record layer.
//!
//! Values marked as defaults may be overridden through
//! [`TransportConfig`](super::TransportConfig); the rest are fixed by the wire format.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Fixed IV length shared by every supported AEAD suite.
pub const AEAD_IV_SIZE: usize = 12;

/// AEAD authentication tag size (GCM and Poly1305 both use 16 bytes).
pub const AEAD_TAG_SIZE: usize = 16;

/// Size of a generated cookie secret.
pub const COOKIE_SECRET_SIZE: usize = 32;

// =============================================================================
// UNIFIED HEADER (see `wire::header`)
// =============================================================================

/// Wire code of the only supported protocol version (DTLS 1.3).
pub const DTLS_1_3_VERSION: u16 = 0xFEFC;

/// Fixed prefix in the top three bits of the first header byte.
pub const HEADER_FIXED_BITS: u8 = 0b0010_0000;

/// Mask selecting the fixed prefix.
pub const HEADER_FIXED_MASK: u8 = 0b1110_0000;

/// Connection ID present.
pub const FLAG_CID: u8 = 0b0001_0000;

/// Sequence number is carried in 2 bytes instead of 1.
pub const FLAG_SEQ_16: u8 = 0b0000_1000;

/// Explicit length field present.
pub const FLAG_LENGTH: u8 = 0b0000_0100;

/// Bits that must be zero.
pub const HEADER_RESERVED_MASK: u8 = 0b0000_0011;

/// Longest CID that can be length-prefixed with one byte.
pub const MAX_CID_LEN: usize = 255;

/// Smallest possible header (flags + epoch + 1-byte sequence).
pub const MIN_HEADER_SIZE: usize = 1 + 2 + 1;

/// Largest possible header (flags + epoch + CID prefix + CID + 2-byte sequence + length).
pub const MAX_HEADER_SIZE: usize = 1 + 2 + 1 + MAX_CID_LEN + 2 + 2;

// =============================================================================
// DATAGRAM SIZES
// =============================================================================

/// Largest UDP payload; used to size the shared receive buffer.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Header bytes added to each outbound record (flags + epoch + 2-byte sequence + length, no CID).
pub const MAX_RECORD_OVERHEAD: usize = 1 + 2 + 2 + 2;

/// Largest MTU whose framed records still fit in one UDP datagram.
pub const MAX_MTU: usize = MAX_UDP_PAYLOAD - MAX_RECORD_OVERHEAD;

/// Smallest MTU accepted by configuration validation.
pub const MIN_MTU: usize = 64;

/// Default maximum datagram payload length.
pub const DEFAULT_MTU: usize = 1200;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Port used when dialing a host without an explicit port.
pub const DEFAULT_PORT: u16 = 54321;

/// Overall handshake deadline.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Time allowed from the first flight to an answer.
pub const DEFAULT_INITIAL_RTO: Duration = Duration::from_millis(500);

/// Upper bound on retransmission back-off.
pub const DEFAULT_MAX_RTO: Duration = Duration::from_secs(60);

/// Retransmissions before the handshake is abandoned.
pub const DEFAULT_MAX_RETRANSMITS: u32 = 7;

/// Lifetime of a stateless cookie.
pub const DEFAULT_COOKIE_LIFETIME: Duration = Duration::from_secs(20);

/// How long `read` may block.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `send` may wait for the connection loop to accept a payload.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Inactivity after which a peer is torn down.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between keepalive records on an otherwise silent connection.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Anti-replay window size carried for the record-protection layer.
pub const DEFAULT_REPLAY_WINDOW_SIZE: u16 = 128;

/// Datagrams buffered per peer before the multiplexer starts dropping.
pub const DEFAULT_INBOX_CAPACITY: usize = 128;

/// Payloads buffered for the application per peer.
pub const DEFAULT_APP_QUEUE_CAPACITY: usize = 256;

/// New-peer notifications buffered for `accept`.
pub const DEFAULT_ACCEPT_BACKLOG: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits_disjoint() {
        let all = [
            HEADER_FIXED_MASK,
            FLAG_CID,
            FLAG_SEQ_16,
            FLAG_LENGTH,
            HEADER_RESERVED_MASK,
        ];
        let mut seen = 0u8;
        for bits in all {
            assert_eq!(seen & bits, 0);
            seen |= bits;
        }
        assert_eq!(seen, 0xFF);
    }

    #[test]
    fn test_header_size_bounds() {
        assert_eq!(MIN_HEADER_SIZE, 4);
        assert_eq!(MAX_HEADER_SIZE, 263);
        assert!(DEFAULT_MTU <= MAX_MTU);
        assert_eq!(MAX_MTU + MAX_RECORD_OVERHEAD, MAX_UDP_PAYLOAD);
        assert!(MAX_RECORD_OVERHEAD < MAX_HEADER_SIZE);
        assert!(MIN_MTU < DEFAULT_MTU);
    }
}
