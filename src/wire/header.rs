//! Unified Header encoding and decoding.
//!
//! Wire format:
//! ```text
//! +----------+---------+---------------------+-----------+-----------+
//! | Flags    | Epoch   | CID (if C)          | Sequence  | Length    |
//! | 1 byte   | 2 bytes | 1-byte len + bytes  | 1/2 bytes | 2 (if L)  |
//! +----------+---------+---------------------+-----------+-----------+
//!
//! Flags: 0 0 1 C S L 0 0
//!   001 fixed prefix, C = CID present, S = 16-bit sequence,
//!   L = length present, last two bits reserved (zero)
//! ```

use std::fmt;

use super::bytes::append_u16;
use super::cursor::WireCursor;
use crate::core::{
    DTLS_1_3_VERSION, FLAG_CID, FLAG_LENGTH, FLAG_SEQ_16, HEADER_FIXED_BITS, HEADER_FIXED_MASK,
    HEADER_RESERVED_MASK, HeaderError, MAX_CID_LEN, TransportError, TransportResult,
};

/// Protocol version knob. Not carried on the wire; the fixed flag prefix
/// identifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    /// DTLS 1.3, the only supported version.
    pub const DTLS_1_3: Self = Self(DTLS_1_3_VERSION);

    /// Whether this version can be encoded.
    pub fn is_supported(self) -> bool {
        self == Self::DTLS_1_3
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::DTLS_1_3
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::DTLS_1_3 {
            f.write_str("DTLS 1.3")
        } else {
            write!(f, "{:#06x}", self.0)
        }
    }
}

/// On-wire width of the truncated sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SequenceWidth {
    /// Low 8 bits.
    One = 1,
    /// Low 16 bits.
    Two = 2,
}

impl SequenceWidth {
    /// Parse a width in bytes.
    pub fn from_bytes(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            _ => None,
        }
    }

    /// Width in bytes.
    pub fn bytes(self) -> usize {
        self as usize
    }

    /// Smallest width that holds `seq`.
    pub fn for_value(seq: u16) -> Self {
        if seq <= 0xFF { Self::One } else { Self::Two }
    }
}

/// Header flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(u8);

impl HeaderFlags {
    /// Fixed prefix only.
    pub const BASE: Self = Self(HEADER_FIXED_BITS);

    /// Create flags from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check the fixed `001` prefix.
    pub fn has_fixed_bits(self) -> bool {
        self.0 & HEADER_FIXED_MASK == HEADER_FIXED_BITS
    }

    /// Reserved bits (must be zero).
    pub fn reserved(self) -> u8 {
        self.0 & HEADER_RESERVED_MASK
    }

    /// Check if the CID flag is set.
    pub fn has_cid(self) -> bool {
        self.0 & FLAG_CID != 0
    }

    /// Check if the 16-bit sequence flag is set.
    pub fn has_seq16(self) -> bool {
        self.0 & FLAG_SEQ_16 != 0
    }

    /// Check if the length flag is set.
    pub fn has_length(self) -> bool {
        self.0 & FLAG_LENGTH != 0
    }

    /// Set the CID flag.
    pub fn with_cid(self) -> Self {
        Self(self.0 | FLAG_CID)
    }

    /// Set the 16-bit sequence flag.
    pub fn with_seq16(self) -> Self {
        Self(self.0 | FLAG_SEQ_16)
    }

    /// Set the length flag.
    pub fn with_length(self) -> Self {
        Self(self.0 | FLAG_LENGTH)
    }
}

/// Per-record Unified Header.
///
/// Only constructible through [`HeaderBuilder`] or [`UnifiedHeader::decode`],
/// so the field invariants always hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedHeader {
    version: ProtocolVersion,
    epoch: u16,
    cid: Vec<u8>,
    sequence: u16,
    width: SequenceWidth,
    length: Option<u16>,
}

impl UnifiedHeader {
    /// Start building a header.
    pub fn builder() -> HeaderBuilder {
        HeaderBuilder::default()
    }

    /// Protocol version.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Epoch (already truncated by the caller).
    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    /// Connection ID bytes; empty when absent.
    pub fn cid(&self) -> &[u8] {
        &self.cid
    }

    /// Whether a connection ID is carried.
    pub fn cid_present(&self) -> bool {
        !self.cid.is_empty()
    }

    /// Truncated sequence number.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// On-wire sequence width.
    pub fn sequence_width(&self) -> SequenceWidth {
        self.width
    }

    /// Explicit length, if carried.
    pub fn length(&self) -> Option<u16> {
        self.length
    }

    /// Whether an explicit length is carried.
    pub fn length_present(&self) -> bool {
        self.length.is_some()
    }

    /// Flag byte for this header.
    pub fn flags(&self) -> HeaderFlags {
        let mut flags = HeaderFlags::BASE;
        if self.cid_present() {
            flags = flags.with_cid();
        }
        if self.width == SequenceWidth::Two {
            flags = flags.with_seq16();
        }
        if self.length.is_some() {
            flags = flags.with_length();
        }
        flags
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        let cid = if self.cid_present() {
            1 + self.cid.len()
        } else {
            0
        };
        let length = if self.length.is_some() { 2 } else { 0 };
        1 + 2 + cid + self.width.bytes() + length
    }

    /// Append the encoded header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.push(self.flags().as_byte());
        append_u16(out, self.epoch);
        if self.cid_present() {
            // Builder caps the CID at MAX_CID_LEN.
            out.push(self.cid.len() as u8);
            out.extend_from_slice(&self.cid);
        }
        match self.width {
            SequenceWidth::One => out.push(self.sequence as u8),
            SequenceWidth::Two => append_u16(out, self.sequence),
        }
        if let Some(length) = self.length {
            append_u16(out, length);
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }

    /// Decode a header at the cursor position.
    ///
    /// On failure the cursor is left where it started.
    pub fn decode<B: AsRef<[u8]>>(cur: &mut WireCursor<B>) -> TransportResult<Self> {
        let start = cur.position();
        let result = Self::decode_fields(cur);
        if result.is_err() {
            cur.set_pos(start);
        }
        result
    }

    /// Decode a header from the start of `bytes`, returning it with its size.
    pub fn from_bytes(bytes: &[u8]) -> TransportResult<(Self, usize)> {
        let mut cur = WireCursor::new(bytes);
        let header = Self::decode(&mut cur)?;
        Ok((header, cur.position()))
    }

    fn decode_fields<B: AsRef<[u8]>>(cur: &mut WireCursor<B>) -> TransportResult<Self> {
        let byte = cur.read_u8()?;
        let flags = HeaderFlags::from_byte(byte);
        if !flags.has_fixed_bits() {
            return Err(HeaderError::NotUnifiedHeader(byte).into());
        }
        if flags.reserved() != 0 {
            return Err(HeaderError::ReservedBits(flags.reserved()).into());
        }

        let epoch = cur.read_u16()?;

        let cid = if flags.has_cid() {
            let len = cur.peek_u8()?;
            if len == 0 {
                return Err(HeaderError::EmptyCid.into());
            }
            // Check the whole CID fits before consuming its prefix.
            cur.peek_bytes(1 + usize::from(len))?;
            cur.skip(1)?;
            cur.read_bytes(usize::from(len))?.to_vec()
        } else {
            Vec::new()
        };

        let (width, sequence) = if flags.has_seq16() {
            (SequenceWidth::Two, cur.read_u16()?)
        } else {
            (SequenceWidth::One, u16::from(cur.read_u8()?))
        };

        let length = if flags.has_length() {
            Some(cur.read_u16()?)
        } else {
            None
        };

        Ok(Self {
            version: ProtocolVersion::DTLS_1_3,
            epoch,
            cid,
            sequence,
            width,
            length,
        })
    }
}

/// Builder applying header options in call order; the last call wins.
#[derive(Debug, Clone, Default)]
pub struct HeaderBuilder {
    version: ProtocolVersion,
    epoch: u16,
    sequence: u16,
    width: Option<u8>,
    cid: Vec<u8>,
    length: Option<u16>,
}

impl HeaderBuilder {
    /// Set the protocol version.
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the epoch.
    pub fn epoch(mut self, epoch: u16) -> Self {
        self.epoch = epoch;
        self
    }

    /// Set the truncated sequence number. Zero is a real value, not "unset".
    pub fn sequence(mut self, seq: u16) -> Self {
        self.sequence = seq;
        self
    }

    /// Force the on-wire sequence width (1 or 2 bytes).
    pub fn sequence_width(mut self, bytes: u8) -> Self {
        self.width = Some(bytes);
        self
    }

    /// Attach a connection ID. An empty slice means "no CID".
    pub fn cid(mut self, cid: &[u8]) -> Self {
        self.cid = cid.to_vec();
        self
    }

    /// Carry an explicit length (zero allowed).
    pub fn length(mut self, length: u16) -> Self {
        self.length = Some(length);
        self
    }

    /// Omit the length field.
    pub fn without_length(mut self) -> Self {
        self.length = None;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<UnifiedHeader, HeaderError> {
        if !self.version.is_supported() {
            return Err(HeaderError::UnsupportedVersion(self.version.0));
        }

        let width = match self.width {
            None => SequenceWidth::for_value(self.sequence),
            Some(n) => SequenceWidth::from_bytes(n).ok_or(HeaderError::InvalidSequenceWidth(n))?,
        };
        if width == SequenceWidth::One && self.sequence > 0xFF {
            return Err(HeaderError::SequenceOverflow(self.sequence));
        }

        if self.cid.len() > MAX_CID_LEN {
            return Err(HeaderError::CidTooLong(self.cid.len()));
        }

        Ok(UnifiedHeader {
            version: self.version,
            epoch: self.epoch,
            cid: self.cid,
            sequence: self.sequence,
            width,
            length: self.length,
        })
    }
}

/// One decoded record borrowed from a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    /// Decoded header.
    pub header: UnifiedHeader,
    /// Record payload.
    pub payload: &'a [u8],
}

/// Iterate the records packed into one datagram.
///
/// A record with an explicit length consumes exactly that many payload bytes
/// and further records may follow; a record without one takes the rest of the
/// datagram. An empty datagram yields a single truncation error. Iteration
/// stops after the first error.
pub fn split_records(datagram: &[u8]) -> Records<'_> {
    Records {
        datagram,
        pos: 0,
        started: false,
        done: false,
    }
}

/// Iterator returned by [`split_records`].
#[derive(Debug, Clone)]
pub struct Records<'a> {
    datagram: &'a [u8],
    pos: usize,
    started: bool,
    done: bool,
}

impl<'a> Records<'a> {
    fn next_record(&mut self) -> TransportResult<Record<'a>> {
        let mut cur = WireCursor::new(self.datagram);
        cur.set_pos(self.pos);

        let header = UnifiedHeader::decode(&mut cur)?;
        let start = cur.position();
        let len = match header.length() {
            Some(len) => {
                cur.skip(usize::from(len))?;
                usize::from(len)
            }
            None => cur.remaining(),
        };
        self.pos = start + len;

        Ok(Record {
            header,
            payload: &self.datagram[start..start + len],
        })
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || (self.started && self.pos >= self.datagram.len()) {
            return None;
        }
        self.started = true;

        let item = self.next_record();
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}
