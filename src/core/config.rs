//! Transport configuration.
//!
//! [`TransportConfig`] is handed over whole by the embedding application.
//! Nothing here reads files or the environment.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::constants::*;
use super::error::ConfigError;
use crate::crypto::{CipherSuiteId, CipherSuiteRegistry};

/// Server-side secret used to mint stateless cookies.
///
/// Clients leave it empty. Zeroized on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CookieSecret(Vec<u8>);

impl CookieSecret {
    /// Wrap existing secret bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; COOKIE_SECRET_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw secret bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check whether a secret is configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CookieSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CookieSecret({} bytes, redacted)", self.0.len())
    }
}

/// Configuration shared by the multiplexer, dialed connections and every peer.
///
/// Optional timeouts use `None` for "unset".
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address the multiplexer binds to.
    pub bind_addr: SocketAddr,

    /// Maximum payload accepted by `send`.
    pub mtu: usize,

    /// Overall handshake deadline.
    pub handshake_timeout: Duration,

    /// First retransmission timeout.
    pub initial_rto: Duration,

    /// Retransmission back-off ceiling.
    pub max_rto: Duration,

    /// Retransmissions before giving up.
    pub max_retransmits: u32,

    /// Stateless cookie lifetime.
    pub cookie_lifetime: Duration,

    /// Bound on `read`; `None` blocks until data or close.
    pub read_timeout: Option<Duration>,

    /// Bound on the `send` handoff; `None` writes directly to the socket.
    pub write_timeout: Option<Duration>,

    /// Inactivity before a peer is torn down; `None` disables eviction.
    pub idle_timeout: Option<Duration>,

    /// Keepalive interval; `None` disables keepalives.
    pub keepalive_interval: Option<Duration>,

    /// Cookie secret (server side only).
    pub cookie_secret: CookieSecret,

    /// Cipher suites in server preference order.
    pub preferred_suites: Vec<CipherSuiteId>,

    /// Anti-replay window size.
    pub replay_window_size: u16,

    /// Whether connection IDs may appear in record headers.
    pub cid_enabled: bool,

    /// Per-peer inbox depth.
    pub inbox_capacity: usize,

    /// Per-peer application queue depth (both directions).
    pub app_queue_capacity: usize,

    /// Pending new-peer notifications for `accept`.
    pub accept_backlog: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            mtu: DEFAULT_MTU,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            initial_rto: DEFAULT_INITIAL_RTO,
            max_rto: DEFAULT_MAX_RTO,
            max_retransmits: DEFAULT_MAX_RETRANSMITS,
            cookie_lifetime: DEFAULT_COOKIE_LIFETIME,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            cookie_secret: CookieSecret::default(),
            preferred_suites: vec![
                CipherSuiteId::TLS_AES_128_GCM_SHA256,
                CipherSuiteId::TLS_AES_256_GCM_SHA384,
                CipherSuiteId::TLS_CHACHA20_POLY1305_SHA256,
            ],
            replay_window_size: DEFAULT_REPLAY_WINDOW_SIZE,
            cid_enabled: false,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            app_queue_capacity: DEFAULT_APP_QUEUE_CAPACITY,
            accept_backlog: DEFAULT_ACCEPT_BACKLOG,
        }
    }
}

impl TransportConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }

    /// Check every field, resolving preferred suites against `registry`.
    pub fn validate(&self, registry: &CipherSuiteRegistry) -> Result<(), ConfigError> {
        if !(MIN_MTU..=MAX_MTU).contains(&self.mtu) {
            return Err(ConfigError::InvalidMtu {
                mtu: self.mtu,
                min: MIN_MTU,
                max: MAX_MTU,
            });
        }

        let optional = [
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("idle_timeout", self.idle_timeout),
            ("keepalive_interval", self.keepalive_interval),
        ];
        for (name, value) in optional {
            if value == Some(Duration::ZERO) {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        let required = [
            ("handshake_timeout", self.handshake_timeout),
            ("initial_rto", self.initial_rto),
            ("max_rto", self.max_rto),
            ("cookie_lifetime", self.cookie_lifetime),
        ];
        for (name, value) in required {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        if self.initial_rto > self.max_rto {
            return Err(ConfigError::RtoOrder);
        }

        let capacities = [
            ("inbox_capacity", self.inbox_capacity),
            ("app_queue_capacity", self.app_queue_capacity),
            ("accept_backlog", self.accept_backlog),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity(name));
            }
        }

        if self.replay_window_size == 0 {
            return Err(ConfigError::ZeroReplayWindow);
        }

        if self.preferred_suites.is_empty() {
            return Err(ConfigError::NoCipherSuites);
        }
        if let Some(id) = self
            .preferred_suites
            .iter()
            .find(|id| registry.get(**id).is_err())
        {
            return Err(ConfigError::UnknownSuite(*id));
        }

        Ok(())
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Clone, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the multiplexer bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the MTU.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Set the handshake deadline.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set initial and maximum retransmission timeouts.
    pub fn rto(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_rto = initial;
        self.config.max_rto = max;
        self
    }

    /// Set the retransmission limit.
    pub fn max_retransmits(mut self, max: u32) -> Self {
        self.config.max_retransmits = max;
        self
    }

    /// Set the cookie lifetime.
    pub fn cookie_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.cookie_lifetime = lifetime;
        self
    }

    /// Set or clear the read timeout.
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set or clear the write timeout.
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Set or clear the idle timeout.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set or clear the keepalive interval.
    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Set the cookie secret.
    pub fn cookie_secret(mut self, secret: CookieSecret) -> Self {
        self.config.cookie_secret = secret;
        self
    }

    /// Set the preferred cipher suites (server order).
    pub fn preferred_suites(mut self, suites: impl IntoIterator<Item = CipherSuiteId>) -> Self {
        self.config.preferred_suites = suites.into_iter().collect();
        self
    }

    /// Set the anti-replay window size.
    pub fn replay_window_size(mut self, size: u16) -> Self {
        self.config.replay_window_size = size;
        self
    }

    /// Enable or disable connection IDs.
    pub fn cid_enabled(mut self, enabled: bool) -> Self {
        self.config.cid_enabled = enabled;
        self
    }

    /// Set the per-peer inbox depth.
    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.config.inbox_capacity = capacity;
        self
    }

    /// Set the per-peer application queue depth.
    pub fn app_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.app_queue_capacity = capacity;
        self
    }

    /// Set the accept backlog.
    pub fn accept_backlog(mut self, backlog: usize) -> Self {
        self.config.accept_backlog = backlog;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TransportConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TransportConfig::default();
        assert_eq!(config.mtu, 1200);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert!(config.cookie_secret.is_empty());
        assert!(config.validate(&CipherSuiteRegistry::standard()).is_ok());
    }

    #[test]
    fn test_builder() {
        let config = TransportConfig::builder()
            .mtu(1400)
            .idle_timeout(Some(Duration::from_millis(50)))
            .write_timeout(None)
            .cid_enabled(true)
            .preferred_suites([CipherSuiteId::TLS_CHACHA20_POLY1305_SHA256])
            .build();

        assert_eq!(config.mtu, 1400);
        assert_eq!(config.idle_timeout, Some(Duration::from_millis(50)));
        assert_eq!(config.write_timeout, None);
        assert!(config.cid_enabled);
        assert_eq!(
            config.preferred_suites,
            vec![CipherSuiteId::TLS_CHACHA20_POLY1305_SHA256]
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let registry = CipherSuiteRegistry::standard();

        let config = TransportConfig::builder().mtu(10).build();
        assert!(matches!(
            config.validate(&registry),
            Err(ConfigError::InvalidMtu { mtu: 10, .. })
        ));

        assert!(TransportConfig::builder().mtu(MAX_MTU).build().validate(&registry).is_ok());
        let too_big = MAX_MTU + 1;
        let config = TransportConfig::builder().mtu(too_big).build();
        assert!(matches!(
            config.validate(&registry),
            Err(ConfigError::InvalidMtu { mtu, max: MAX_MTU, .. }) if mtu == too_big
        ));

        let config = TransportConfig::builder()
            .read_timeout(Some(Duration::ZERO))
            .build();
        assert_eq!(
            config.validate(&registry),
            Err(ConfigError::ZeroTimeout("read_timeout"))
        );

        let config = TransportConfig::builder()
            .rto(Duration::from_secs(2), Duration::from_secs(1))
            .build();
        assert_eq!(config.validate(&registry), Err(ConfigError::RtoOrder));

        let config = TransportConfig::builder().inbox_capacity(0).build();
        assert_eq!(
            config.validate(&registry),
            Err(ConfigError::ZeroCapacity("inbox_capacity"))
        );

        let config = TransportConfig::builder()
            .preferred_suites(Vec::new())
            .build();
        assert_eq!(config.validate(&registry), Err(ConfigError::NoCipherSuites));

        let config = TransportConfig::builder()
            .preferred_suites([CipherSuiteId(0x1304)])
            .build();
        assert_eq!(
            config.validate(&registry),
            Err(ConfigError::UnknownSuite(CipherSuiteId(0x1304)))
        );
    }

    #[test]
    fn test_cookie_secret() {
        let a = CookieSecret::generate();
        let b = CookieSecret::generate();
        assert_eq!(a.as_bytes().len(), COOKIE_SECRET_SIZE);
        assert_ne!(a, b);

        let debug = format!("{:?}", a);
        assert!(debug.contains("redacted"));
        assert!(!debug.contains(&format!("{:?}", a.as_bytes())));
    }
}
