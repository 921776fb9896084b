//! Server-side demultiplexer.
//!
//! One bound socket, one [`PeerConnection`] per exact source address.
//!
//! # Example
//!
//! ```ignore
//! use dtls_mux::prelude::*;
//!
//! let mux = listen(TransportConfig::default()).await?;
//! let server = mux.clone();
//! tokio::spawn(async move { server.serve().await });
//!
//! while let Ok(peer) = mux.accept().await {
//!     tokio::spawn(async move {
//!         while let Ok(payload) = peer.recv().await {
//!             let _ = peer.send(&payload).await;
//!         }
//!     });
//! }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace};

use crate::core::{
    DatagramHandler, MAX_DATAGRAM_SIZE, Passthrough, TransportConfig, TransportError,
    TransportResult,
};
use crate::crypto::{CipherSuite, CipherSuiteId, CipherSuiteRegistry};
use crate::transport::{
    DatagramSocket, InboundDatagram, PeerConnection, is_transient, wait_closed,
};

/// Snapshot of multiplexer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    /// Datagrams read off the socket.
    pub datagrams_received: u64,
    /// Datagrams dropped because the owning peer's inbox was full.
    pub inbox_drops: u64,
    /// New-peer notifications dropped because the accept backlog was full.
    pub accept_drops: u64,
    /// Peer connections created.
    pub peers_created: u64,
    /// Live peers in the table.
    pub active_peers: usize,
}

struct MuxInner<S: DatagramSocket> {
    socket: Arc<S>,
    config: TransportConfig,
    registry: Arc<CipherSuiteRegistry>,
    handler: RwLock<Arc<dyn DatagramHandler>>,

    peers: Mutex<HashMap<SocketAddr, PeerConnection<S>>>,

    shutdown_tx: watch::Sender<bool>,
    accept_tx: mpsc::Sender<PeerConnection<S>>,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<PeerConnection<S>>>,

    datagrams_received: AtomicU64,
    inbox_drops: AtomicU64,
    accept_drops: AtomicU64,
    peers_created: AtomicU64,
}

impl<S: DatagramSocket> MuxInner<S> {
    fn peers(&self) -> MutexGuard<'_, HashMap<SocketAddr, PeerConnection<S>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `peer` only if the table still maps its address to it.
    fn remove_peer(&self, peer: &PeerConnection<S>) {
        let mut peers = self.peers();
        let addr = peer.remote_addr();
        if peers
            .get(&addr)
            .is_some_and(|current| current.same_connection(peer))
        {
            peers.remove(&addr);
            debug!(peer = %addr, remaining = peers.len(), "peer removed");
        }
    }

    fn close_all(&self) {
        let drained: Vec<_> = self.peers().drain().map(|(_, peer)| peer).collect();
        for peer in drained {
            peer.close();
        }
    }
}

impl<S: DatagramSocket> Drop for MuxInner<S> {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        self.close_all();
    }
}

/// Demultiplexes one shared socket into per-peer connections.
///
/// Cloning yields another handle to the same multiplexer, so one task can run
/// [`serve`](Self::serve) while others [`accept`](Self::accept).
pub struct Multiplexer<S: DatagramSocket = UdpSocket> {
    inner: Arc<MuxInner<S>>,
}

impl<S: DatagramSocket> Clone for Multiplexer<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: DatagramSocket> std::fmt::Debug for Multiplexer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("local_addr", &self.inner.socket.local_addr().ok())
            .field("peers", &self.peer_count())
            .finish_non_exhaustive()
    }
}

impl Multiplexer<UdpSocket> {
    /// Validate `config` against the standard suites and bind `config.bind_addr`.
    pub async fn bind(config: TransportConfig) -> TransportResult<Self> {
        let registry = Arc::new(CipherSuiteRegistry::standard());
        config.validate(&registry)?;
        let socket = UdpSocket::bind(config.bind_addr).await?;
        Self::with_socket(socket, config, registry)
    }
}

impl<S: DatagramSocket> Multiplexer<S> {
    /// Wrap an already-bound socket.
    ///
    /// `config` is validated against `registry`.
    pub fn with_socket(
        socket: S,
        config: TransportConfig,
        registry: Arc<CipherSuiteRegistry>,
    ) -> TransportResult<Self> {
        config.validate(&registry)?;

        let (shutdown_tx, _) = watch::channel(false);
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_backlog);

        Ok(Self {
            inner: Arc::new(MuxInner {
                socket: Arc::new(socket),
                config,
                registry,
                handler: RwLock::new(Arc::new(Passthrough)),
                peers: Mutex::new(HashMap::new()),
                shutdown_tx,
                accept_tx,
                accept_rx: tokio::sync::Mutex::new(accept_rx),
                datagrams_received: AtomicU64::new(0),
                inbox_drops: AtomicU64::new(0),
                accept_drops: AtomicU64::new(0),
                peers_created: AtomicU64::new(0),
            }),
        })
    }

    /// Set the handler given to peers created from now on.
    pub fn with_handler(self, handler: impl DatagramHandler) -> Self {
        self.set_handler(handler);
        self
    }

    /// Replace the handler given to new peers. Existing peers keep theirs.
    pub fn set_handler(&self, handler: impl DatagramHandler) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(handler);
    }

    /// Local bound address.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Configuration in effect.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Negotiate a suite against `offered` using the configured preference.
    pub fn negotiate(&self, offered: &[CipherSuiteId]) -> TransportResult<&CipherSuite> {
        Ok(self
            .inner
            .registry
            .negotiate(&self.inner.config.preferred_suites, offered)?)
    }

    /// Run the read loop.
    ///
    /// Returns `Ok(())` after [`close`](Self::close) and `Err` on an
    /// unrecoverable socket error, which also closes the multiplexer.
    pub async fn serve(&self) -> TransportResult<()> {
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let local = self.inner.socket.local_addr().ok();
        info!(addr = ?local, "multiplexer serving");

        loop {
            let received = tokio::select! {
                biased;
                _ = wait_closed(&mut shutdown) => None,
                res = self.inner.socket.recv_from(&mut buf) => Some(res),
            };

            match received {
                None => {
                    info!(addr = ?local, "multiplexer shut down");
                    return Ok(());
                }
                Some(Ok((len, source))) => self.route(&buf[..len], source),
                Some(Err(e)) if is_transient(&e) => {
                    debug!(error = %e, "transient receive error");
                }
                Some(Err(e)) => {
                    error!(addr = ?local, error = %e, "socket receive failed");
                    self.close();
                    return Err(e.into());
                }
            }
        }
    }

    /// Wait for the next newly created peer.
    ///
    /// Fails with [`TransportError::Closed`] once the multiplexer is closed.
    pub async fn accept(&self) -> TransportResult<PeerConnection<S>> {
        let mut accept_rx = self.inner.accept_rx.lock().await;
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        tokio::select! {
            biased;
            _ = wait_closed(&mut shutdown) => Err(TransportError::Closed),
            peer = accept_rx.recv() => peer.ok_or(TransportError::Closed),
        }
    }

    /// Live connection for `addr`, if any.
    pub fn peer(&self, addr: SocketAddr) -> Option<PeerConnection<S>> {
        self.inner
            .peers()
            .get(&addr)
            .filter(|peer| !peer.is_closed())
            .cloned()
    }

    /// Number of peers in the table.
    pub fn peer_count(&self) -> usize {
        self.inner.peers().len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> MultiplexerStats {
        MultiplexerStats {
            datagrams_received: self.inner.datagrams_received.load(Ordering::Relaxed),
            inbox_drops: self.inner.inbox_drops.load(Ordering::Relaxed),
            accept_drops: self.inner.accept_drops.load(Ordering::Relaxed),
            peers_created: self.inner.peers_created.load(Ordering::Relaxed),
            active_peers: self.peer_count(),
        }
    }

    /// Check if the multiplexer is closed.
    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Stop serving and close every peer. Repeated calls are no-ops.
    pub fn close(&self) {
        if !self.inner.shutdown_tx.send_replace(true) {
            info!("multiplexer closing");
        }
        self.inner.close_all();
    }

    /// Hand one datagram to its peer, creating the peer if needed.
    fn route(&self, data: &[u8], source: SocketAddr) {
        self.inner.datagrams_received.fetch_add(1, Ordering::Relaxed);
        trace!(peer = %source, bytes = data.len(), "datagram received");

        let Some(peer) = self.peer_for(source) else {
            return;
        };
        if !peer.offer(InboundDatagram::new(data.to_vec(), source)) {
            self.inner.inbox_drops.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %source, "inbox full, dropping datagram");
        }
    }

    /// Look up or create the peer for `source`.
    ///
    /// Check-and-create happens under one lock so two datagrams from the same
    /// source can never create two peers. A closed entry is replaced.
    fn peer_for(&self, source: SocketAddr) -> Option<PeerConnection<S>> {
        if self.is_closed() {
            return None;
        }

        let peer = {
            let mut peers = self.inner.peers();
            if let Some(existing) = peers.get(&source).filter(|peer| !peer.is_closed()) {
                return Some(existing.clone());
            }
            let handler = Arc::clone(
                &self
                    .inner
                    .handler
                    .read()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            let peer = PeerConnection::spawn(
                source,
                Arc::clone(&self.inner.socket),
                &self.inner.config,
                handler,
            );
            peers.insert(source, peer.clone());
            peer
        };

        self.inner.peers_created.fetch_add(1, Ordering::Relaxed);
        info!(peer = %source, "new peer");
        self.watch_peer(&peer);

        if self.inner.accept_tx.try_send(peer.clone()).is_err() {
            self.inner.accept_drops.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %source, "accept backlog full");
        }
        Some(peer)
    }

    /// Remove `peer` from the table once it closes.
    fn watch_peer(&self, peer: &PeerConnection<S>) {
        let inner: Weak<MuxInner<S>> = Arc::downgrade(&self.inner);
        let peer = peer.clone();
        tokio::spawn(async move {
            peer.closed().await;
            if let Some(inner) = inner.upgrade() {
                inner.remove_peer(&peer);
            }
        });
    }
}

/// Bind a multiplexer on `config.bind_addr`.
pub async fn listen(config: TransportConfig) -> TransportResult<Multiplexer> {
    Multiplexer::bind(config).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::{ConfigError, Dispatch};
    use crate::transport::mock::{MockHandle, MockSocket};
    use crate::wire::UnifiedHeader;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 1], port))
    }

    fn record(payload: &[u8]) -> Vec<u8> {
        let mut out = UnifiedHeader::builder()
            .length(payload.len() as u16)
            .build()
            .unwrap()
            .to_bytes();
        out.extend_from_slice(payload);
        out
    }

    fn mock_mux(config: TransportConfig) -> (Multiplexer<MockSocket>, MockHandle) {
        let (socket, handle) = MockSocket::new();
        let mux = Multiplexer::with_socket(
            socket,
            config,
            Arc::new(CipherSuiteRegistry::standard()),
        )
        .unwrap();
        (mux, handle)
    }

    fn quiet_config() -> crate::core::TransportConfigBuilder {
        TransportConfig::builder()
            .keepalive_interval(None)
            .read_timeout(Some(Duration::from_secs(5)))
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_with_socket_validates_config() {
        let (socket, _handle) = MockSocket::new();
        let config = TransportConfig::builder().mtu(1).build();
        let err = Multiplexer::with_socket(
            socket,
            config,
            Arc::new(CipherSuiteRegistry::standard()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Config(ConfigError::InvalidMtu { .. })
        ));
    }

    #[test]
    fn test_negotiate_uses_server_preference() {
        let config = TransportConfig::builder()
            .preferred_suites([
                CipherSuiteId::TLS_CHACHA20_POLY1305_SHA256,
                CipherSuiteId::TLS_AES_128_GCM_SHA256,
            ])
            .build();
        let (mux, _handle) = mock_mux(config);

        let suite = mux
            .negotiate(&[
                CipherSuiteId::TLS_AES_128_GCM_SHA256,
                CipherSuiteId::TLS_AES_256_GCM_SHA384,
            ])
            .unwrap();
        assert_eq!(suite.id, CipherSuiteId::TLS_AES_128_GCM_SHA256);

        let err = mux.negotiate(&[CipherSuiteId(0x9999)]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_routes_by_source_and_accepts() {
        let (mux, handle) = mock_mux(quiet_config().build());
        let server = mux.clone();
        let task = tokio::spawn(async move { server.serve().await });

        handle.inject(&record(b"from-a"), addr(1000));
        handle.inject(&record(b"from-b"), addr(2000));
        handle.inject(&record(b"again-a"), addr(1000));

        let first = mux.accept().await.unwrap();
        let second = mux.accept().await.unwrap();
        assert_eq!(first.remote_addr(), addr(1000));
        assert_eq!(second.remote_addr(), addr(2000));

        assert_eq!(first.recv().await.unwrap(), b"from-a");
        assert_eq!(first.recv().await.unwrap(), b"again-a");
        assert_eq!(second.recv().await.unwrap(), b"from-b");

        assert_eq!(mux.peer_count(), 2);
        let stats = mux.stats();
        assert_eq!(stats.datagrams_received, 3);
        assert_eq!(stats.peers_created, 2);

        mux.close();
        assert!(task.await.unwrap().is_ok());
        assert!(first.is_closed() && second.is_closed());
        assert!(matches!(mux.accept().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_peer_send_uses_shared_socket() {
        let (mux, handle) = mock_mux(quiet_config().write_timeout(None).build());
        let server = mux.clone();
        tokio::spawn(async move { server.serve().await });

        handle.inject(&record(b"hi"), addr(1000));
        let peer = mux.accept().await.unwrap();
        peer.send(b"reply").await.unwrap();

        let sent = mux.inner.socket.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, addr(1000));
        mux.close();
    }

    #[tokio::test]
    async fn test_idle_peer_removed_and_replaced() {
        let config = quiet_config()
            .idle_timeout(Some(Duration::from_millis(50)))
            .build();
        let (mux, handle) = mock_mux(config);
        let server = mux.clone();
        tokio::spawn(async move { server.serve().await });

        handle.inject(&record(b"one"), addr(1000));
        let first = mux.accept().await.unwrap();
        assert!(mux.peer(addr(1000)).is_some());

        first.closed().await;
        eventually(|| mux.peer_count() == 0).await;
        assert!(mux.peer(addr(1000)).is_none());

        handle.inject(&record(b"two"), addr(1000));
        let second = mux.accept().await.unwrap();
        assert!(!second.same_connection(&first));
        assert_eq!(second.recv().await.unwrap(), b"two");
        assert_eq!(mux.stats().peers_created, 2);
        mux.close();
    }

    #[tokio::test]
    async fn test_closed_peer_replaced_on_lookup() {
        let (mux, handle) = mock_mux(quiet_config().build());
        let server = mux.clone();
        tokio::spawn(async move { server.serve().await });

        handle.inject(&record(b"one"), addr(1000));
        let first = mux.accept().await.unwrap();
        first.close();

        handle.inject(&record(b"two"), addr(1000));
        let second = mux.accept().await.unwrap();
        assert!(!second.same_connection(&first));
        assert_eq!(second.recv().await.unwrap(), b"two");

        // The old peer's removal must not evict its replacement.
        eventually(|| mux.stats().peers_created == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mux.peer(addr(1000)).unwrap().same_connection(&second));
        mux.close();
    }

    #[tokio::test]
    async fn test_socket_error_ends_serve() {
        let (mux, handle) = mock_mux(quiet_config().build());
        drop(handle);

        let err = mux.serve().await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
        assert!(mux.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_peer_does_not_starve_others() {
        let config = quiet_config().inbox_capacity(2).build();
        let (mux, handle) = mock_mux(config);

        let slow = addr(1000);
        mux.set_handler(move |remote: SocketAddr, _: &UnifiedHeader, payload: &[u8]| {
            if remote == slow {
                std::thread::sleep(Duration::from_millis(50));
            }
            Dispatch::Deliver(payload.to_vec())
        });
        let server = mux.clone();
        tokio::spawn(async move { server.serve().await });

        for _ in 0..50 {
            handle.inject(&record(b"flood"), slow);
        }
        for i in 0..10u8 {
            handle.inject(&record(&[i]), addr(2000));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        eventually(|| mux.peer(addr(2000)).is_some()).await;
        let fast = mux.peer(addr(2000)).unwrap();
        for i in 0..10u8 {
            assert_eq!(fast.recv().await.unwrap(), vec![i]);
        }

        assert_eq!(fast.stats().inbox_drops, 0);
        let slow_stats = mux.peer(slow).unwrap().stats();
        assert!(slow_stats.inbox_drops > 0);
        assert!(mux.stats().inbox_drops > 0);
        mux.close();
    }
}
