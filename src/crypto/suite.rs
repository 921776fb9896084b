//! AEAD cipher suites and negotiation.
//!
//! The registry is an immutable value built explicitly by the embedder
//! (usually [`CipherSuiteRegistry::standard`]) and shared through an `Arc`,
//! so independent transports never observe each other's suite tables.

use std::collections::HashMap;
use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use sha2::{Digest, Sha256, Sha384};

use crate::core::{AEAD_IV_SIZE, CryptoError};

/// Cipher suite code as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CipherSuiteId(pub u16);

impl CipherSuiteId {
    /// TLS_AES_128_GCM_SHA256.
    pub const TLS_AES_128_GCM_SHA256: Self = Self(0x1301);
    /// TLS_AES_256_GCM_SHA384.
    pub const TLS_AES_256_GCM_SHA384: Self = Self(0x1302);
    /// TLS_CHACHA20_POLY1305_SHA256.
    pub const TLS_CHACHA20_POLY1305_SHA256: Self = Self(0x1303);

    /// Get the raw 16-bit code.
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for CipherSuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<u16> for CipherSuiteId {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

/// Hash function bound to a suite (HKDF, transcript, Finished).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
}

impl HashAlgorithm {
    /// Digest output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }

    /// Hash `data` in one shot.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
        }
    }
}

/// A keyed AEAD instance produced by a suite's constructor.
#[derive(Clone)]
pub enum RecordCipher {
    /// AES-128-GCM.
    Aes128Gcm(Aes128Gcm),
    /// AES-256-GCM.
    Aes256Gcm(Aes256Gcm),
    /// ChaCha20-Poly1305.
    ChaCha20Poly1305(ChaCha20Poly1305),
}

impl fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aes128Gcm(_) => "Aes128Gcm",
            Self::Aes256Gcm(_) => "Aes256Gcm",
            Self::ChaCha20Poly1305(_) => "ChaCha20Poly1305",
        };
        f.debug_tuple("RecordCipher").field(&name).finish()
    }
}

impl RecordCipher {
    /// Encrypt `plaintext`, returning ciphertext with the tag appended.
    pub fn seal(
        &self,
        nonce: &[u8; AEAD_IV_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = GenericArray::from_slice(&nonce[..]);
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        match self {
            Self::Aes128Gcm(c) => c.encrypt(nonce, payload),
            Self::Aes256Gcm(c) => c.encrypt(nonce, payload),
            Self::ChaCha20Poly1305(c) => c.encrypt(nonce, payload),
        }
        .map_err(|_| CryptoError::SealFailed)
    }

    /// Decrypt and authenticate `ciphertext` (tag appended).
    pub fn open(
        &self,
        nonce: &[u8; AEAD_IV_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = GenericArray::from_slice(&nonce[..]);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match self {
            Self::Aes128Gcm(c) => c.decrypt(nonce, payload),
            Self::Aes256Gcm(c) => c.decrypt(nonce, payload),
            Self::ChaCha20Poly1305(c) => c.decrypt(nonce, payload),
        }
        .map_err(|_| CryptoError::OpenFailed)
    }
}

/// Constructor turning raw key bytes into a keyed AEAD.
pub type AeadConstructor = fn(&[u8]) -> Result<RecordCipher, CryptoError>;

/// A supported AEAD cipher suite.
#[derive(Debug, Clone, Copy)]
pub struct CipherSuite {
    /// Wire code.
    pub id: CipherSuiteId,
    /// IANA name.
    pub name: &'static str,
    /// Suite hash.
    pub hash: HashAlgorithm,
    /// Key length in bytes.
    pub key_len: usize,
    /// IV length in bytes (12 for every suite).
    pub iv_len: usize,
    /// AEAD constructor.
    pub new_aead: AeadConstructor,
}

impl CipherSuite {
    /// TLS_AES_128_GCM_SHA256.
    pub const AES_128_GCM_SHA256: Self = Self {
        id: CipherSuiteId::TLS_AES_128_GCM_SHA256,
        name: "TLS_AES_128_GCM_SHA256",
        hash: HashAlgorithm::Sha256,
        key_len: 16,
        iv_len: AEAD_IV_SIZE,
        new_aead: new_aes_128_gcm,
    };

    /// TLS_AES_256_GCM_SHA384.
    pub const AES_256_GCM_SHA384: Self = Self {
        id: CipherSuiteId::TLS_AES_256_GCM_SHA384,
        name: "TLS_AES_256_GCM_SHA384",
        hash: HashAlgorithm::Sha384,
        key_len: 32,
        iv_len: AEAD_IV_SIZE,
        new_aead: new_aes_256_gcm,
    };

    /// TLS_CHACHA20_POLY1305_SHA256.
    pub const CHACHA20_POLY1305_SHA256: Self = Self {
        id: CipherSuiteId::TLS_CHACHA20_POLY1305_SHA256,
        name: "TLS_CHACHA20_POLY1305_SHA256",
        hash: HashAlgorithm::Sha256,
        key_len: 32,
        iv_len: AEAD_IV_SIZE,
        new_aead: new_chacha20_poly1305,
    };

    /// Build a keyed AEAD, checking the key length first.
    pub fn new_cipher(&self, key: &[u8]) -> Result<RecordCipher, CryptoError> {
        if key.len() != self.key_len {
            return Err(CryptoError::InvalidKeyLength {
                expected: self.key_len,
                actual: key.len(),
            });
        }
        (self.new_aead)(key)
    }
}

fn invalid_key(expected: usize, key: &[u8]) -> CryptoError {
    CryptoError::InvalidKeyLength {
        expected,
        actual: key.len(),
    }
}

fn new_aes_128_gcm(key: &[u8]) -> Result<RecordCipher, CryptoError> {
    Aes128Gcm::new_from_slice(key)
        .map(RecordCipher::Aes128Gcm)
        .map_err(|_| invalid_key(16, key))
}

fn new_aes_256_gcm(key: &[u8]) -> Result<RecordCipher, CryptoError> {
    Aes256Gcm::new_from_slice(key)
        .map(RecordCipher::Aes256Gcm)
        .map_err(|_| invalid_key(32, key))
}

fn new_chacha20_poly1305(key: &[u8]) -> Result<RecordCipher, CryptoError> {
    ChaCha20Poly1305::new_from_slice(key)
        .map(RecordCipher::ChaCha20Poly1305)
        .map_err(|_| invalid_key(32, key))
}

/// Pick the first suite in `server_pref` that the client offered.
///
/// Server order is authoritative; the order of `client_offered` is ignored.
pub fn negotiate(
    server_pref: &[CipherSuiteId],
    client_offered: &[CipherSuiteId],
) -> Result<CipherSuiteId, CryptoError> {
    server_pref
        .iter()
        .copied()
        .find(|id| client_offered.contains(id))
        .ok_or(CryptoError::NegotiationFailed)
}

/// Immutable table of supported suites keyed by id.
#[derive(Debug, Clone)]
pub struct CipherSuiteRegistry {
    suites: HashMap<CipherSuiteId, CipherSuite>,
}

impl CipherSuiteRegistry {
    /// Build a registry from explicit suites; ids must be unique.
    pub fn new(suites: impl IntoIterator<Item = CipherSuite>) -> Result<Self, CryptoError> {
        let mut table = HashMap::new();
        for suite in suites {
            if table.insert(suite.id, suite).is_some() {
                return Err(CryptoError::DuplicateSuite(suite.id));
            }
        }
        Ok(Self { suites: table })
    }

    /// The three TLS 1.3 AEAD suites.
    pub fn standard() -> Self {
        let suites = [
            CipherSuite::AES_128_GCM_SHA256,
            CipherSuite::AES_256_GCM_SHA384,
            CipherSuite::CHACHA20_POLY1305_SHA256,
        ];
        Self {
            suites: suites.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    /// Look up a suite.
    pub fn get(&self, id: CipherSuiteId) -> Result<&CipherSuite, CryptoError> {
        self.suites.get(&id).ok_or(CryptoError::SuiteNotFound(id))
    }

    /// Negotiate and resolve the winning suite.
    pub fn negotiate(
        &self,
        server_pref: &[CipherSuiteId],
        client_offered: &[CipherSuiteId],
    ) -> Result<&CipherSuite, CryptoError> {
        let id = negotiate(server_pref, client_offered)?;
        self.get(id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<CipherSuiteId> {
        let mut ids: Vec<_> = self.suites.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered suites.
    pub fn len(&self) -> usize {
        self.suites.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }
}

impl Default for CipherSuiteRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
