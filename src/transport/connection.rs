//! Per-remote-endpoint connection.
//!
//! A [`PeerConnection`] is a cheap handle onto state owned by one loop task.
//! The loop waits on five sources:
//!
//! ```text
//!   close signal ──┐
//!   inbox ─────────┤            ┌─> handler ─> app queue ─> read()
//!   outbound ──────┼─> select! ─┤
//!   idle deadline ─┤            └─> frame ─> socket (records, keepalives)
//!   keepalive tick ┘
//! ```
//!
//! Lifecycle: `Created -> Running -> Closed`. Closed is terminal and entered
//! on idle expiry, explicit [`close`](PeerConnection::close), or teardown of
//! the owning multiplexer or dialed connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::idle::IdleTimer;
use super::socket::DatagramSocket;
use crate::core::{
    DatagramHandler, Dispatch, HeaderError, TransportConfig, TransportError, TransportResult,
};
use crate::wire::{UnifiedHeader, split_records};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handle exists, loop not yet started.
    Created = 0,
    /// Loop is running.
    Running = 1,
    /// Terminal.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }
}

/// A datagram handed from a socket reader to a peer loop.
///
/// Owns its bytes; never aliases the reader's receive buffer.
#[derive(Debug, Clone)]
pub struct InboundDatagram {
    /// Datagram bytes.
    pub data: Vec<u8>,
    /// Source address.
    pub source: SocketAddr,
    /// When the reader pulled it off the socket.
    pub received_at: Instant,
}

impl InboundDatagram {
    /// Wrap bytes received now.
    pub fn new(data: Vec<u8>, source: SocketAddr) -> Self {
        Self {
            data,
            source,
            received_at: Instant::now(),
        }
    }
}

/// Snapshot of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    /// Datagrams offered to the inbox.
    pub datagrams_received: u64,
    /// Datagrams dropped because the inbox was full.
    pub inbox_drops: u64,
    /// Records that failed to decode or validate.
    pub malformed: u64,
    /// Payloads queued for `read`.
    pub delivered: u64,
    /// Payloads dropped because the app queue was full.
    pub app_queue_drops: u64,
    /// Records written to the socket (keepalives included).
    pub records_sent: u64,
    /// Keepalive records written.
    pub keepalives_sent: u64,
}

#[derive(Debug, Default)]
struct Counters {
    datagrams_received: AtomicU64,
    inbox_drops: AtomicU64,
    malformed: AtomicU64,
    delivered: AtomicU64,
    app_queue_drops: AtomicU64,
    records_sent: AtomicU64,
    keepalives_sent: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PeerStats {
        PeerStats {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            inbox_drops: self.inbox_drops.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            app_queue_drops: self.app_queue_drops.load(Ordering::Relaxed),
            records_sent: self.records_sent.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
        }
    }
}

struct Shared<S> {
    remote: SocketAddr,
    socket: Arc<S>,
    mtu: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    keepalive_interval: Option<Duration>,
    cid_enabled: bool,

    state: AtomicU8,
    close_tx: watch::Sender<bool>,

    inbox_tx: mpsc::Sender<InboundDatagram>,
    // Unframed payloads; the loop assigns sequence numbers.
    outbound_tx: mpsc::Sender<Vec<u8>>,
    app_rx: Mutex<mpsc::Receiver<Vec<u8>>>,

    handler: RwLock<Arc<dyn DatagramHandler>>,
    idle: IdleTimer,

    epoch: AtomicU16,
    next_seq: AtomicU64,
    sent_since_tick: AtomicBool,
    counters: Counters,
}

/// Receiving ends owned by the loop task.
struct LoopChannels {
    inbox_rx: mpsc::Receiver<InboundDatagram>,
    outbound_rx: mpsc::Receiver<Vec<u8>>,
    app_tx: mpsc::Sender<Vec<u8>>,
}

/// Handle to one remote endpoint's connection.
///
/// Clones share the same connection. Dropping handles does not stop the loop;
/// call [`close`](Self::close) or let the idle timeout reclaim it.
pub struct PeerConnection<S: DatagramSocket = UdpSocket> {
    shared: Arc<Shared<S>>,
}

impl<S: DatagramSocket> Clone for PeerConnection<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: DatagramSocket> std::fmt::Debug for PeerConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("remote", &self.shared.remote)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<S: DatagramSocket> PeerConnection<S> {
    /// Create a connection to `remote` over `socket` and spawn its loop.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        remote: SocketAddr,
        socket: Arc<S>,
        config: &TransportConfig,
        handler: Arc<dyn DatagramHandler>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.app_queue_capacity.max(1));
        let (app_tx, app_rx) = mpsc::channel(config.app_queue_capacity.max(1));
        let (close_tx, _) = watch::channel(false);

        let conn = Self {
            shared: Arc::new(Shared {
                remote,
                socket,
                mtu: config.mtu,
                read_timeout: config.read_timeout,
                write_timeout: config.write_timeout,
                keepalive_interval: config.keepalive_interval,
                cid_enabled: config.cid_enabled,
                state: AtomicU8::new(ConnectionState::Created as u8),
                close_tx,
                inbox_tx,
                outbound_tx,
                app_rx: Mutex::new(app_rx),
                handler: RwLock::new(handler),
                idle: IdleTimer::new(config.idle_timeout),
                epoch: AtomicU16::new(0),
                next_seq: AtomicU64::new(0),
                sent_since_tick: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        };

        let channels = LoopChannels {
            inbox_rx,
            outbound_rx,
            app_tx,
        };
        tokio::spawn(conn.clone().run(channels));
        conn
    }

    /// Remote address this connection is keyed by.
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Check if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Maximum payload accepted by [`send`](Self::send).
    pub fn mtu(&self) -> usize {
        self.shared.mtu
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PeerStats {
        self.shared.counters.snapshot()
    }

    /// Replace the per-record handler. Applies from the next record.
    pub fn set_handler(&self, handler: impl DatagramHandler) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(handler);
    }

    /// Set the epoch stamped on outbound records.
    pub fn set_epoch(&self, epoch: u16) {
        self.shared.epoch.store(epoch, Ordering::Relaxed);
    }

    /// Epoch stamped on outbound records.
    pub fn epoch(&self) -> u16 {
        self.shared.epoch.load(Ordering::Relaxed)
    }

    /// Send `payload` as one record.
    ///
    /// Fails with [`TransportError::PayloadTooLarge`] before any I/O if the
    /// payload exceeds the MTU. With no write timeout the record goes straight
    /// to the socket; otherwise the payload is handed to the loop, which frames
    /// and writes it, and [`TransportError::Timeout`] is returned if the
    /// handoff is not accepted in time. A send that fails before reaching the
    /// socket does not consume a sequence number. Never writes a partial
    /// record.
    pub async fn send(&self, payload: &[u8]) -> TransportResult<()> {
        if payload.len() > self.shared.mtu {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                mtu: self.shared.mtu,
            });
        }
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let Some(write_timeout) = self.shared.write_timeout else {
            self.write_framed(payload).await?;
            self.app_sent();
            return Ok(());
        };

        let handoff = tokio::time::timeout(
            write_timeout,
            self.shared.outbound_tx.send(payload.to_vec()),
        );
        tokio::select! {
            biased;
            _ = self.closed() => Err(TransportError::Closed),
            res = handoff => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(TransportError::Closed),
                Err(_) => Err(TransportError::Timeout),
            },
        }
    }

    /// Read the next delivered payload into `buf`.
    ///
    /// Copies at most `buf.len()` bytes; the rest of a longer payload is
    /// discarded. Returns [`TransportError::Closed`] once the connection is
    /// closed and every queued payload has been read.
    pub async fn read(&self, buf: &mut [u8]) -> TransportResult<usize> {
        let payload = self.recv().await?;
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok(n)
    }

    /// Receive the next delivered payload whole.
    ///
    /// A pending call is woken with [`TransportError::Closed`] when the
    /// connection closes and nothing is left to read.
    pub async fn recv(&self) -> TransportResult<Vec<u8>> {
        let mut app_rx = self.shared.app_rx.lock().await;
        let next = async {
            tokio::select! {
                biased;
                payload = app_rx.recv() => payload,
                _ = self.closed() => app_rx.try_recv().ok(),
            }
        };
        let next = match self.shared.read_timeout {
            Some(limit) => tokio::time::timeout(limit, next)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => next.await,
        };
        next.ok_or(TransportError::Closed)
    }

    /// Close the connection. Repeated calls are no-ops.
    ///
    /// Pending and future `send` calls fail with [`TransportError::Closed`];
    /// `read` drains what was already delivered, then does the same.
    pub fn close(&self) {
        let prev = self
            .shared
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if prev != ConnectionState::Closed as u8 {
            self.shared.close_tx.send_replace(true);
            info!(peer = %self.shared.remote, "peer connection closed");
        }
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        wait_closed(&mut self.shared.close_tx.subscribe()).await;
    }

    /// Offer a datagram to the inbox without blocking.
    ///
    /// Returns `false` (and counts a drop) if the inbox is full or closed.
    pub(crate) fn offer(&self, datagram: InboundDatagram) -> bool {
        Counters::bump(&self.shared.counters.datagrams_received);
        match self.shared.inbox_tx.try_send(datagram) {
            Ok(()) => true,
            Err(_) => {
                Counters::bump(&self.shared.counters.inbox_drops);
                false
            }
        }
    }

    pub(crate) fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn handler(&self) -> Arc<dyn DatagramHandler> {
        Arc::clone(
            &self
                .shared
                .handler
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Frame `payload` with the current epoch and the next sequence number.
    fn frame(&self, payload: &[u8]) -> TransportResult<Vec<u8>> {
        let length = u16::try_from(payload.len()).map_err(|_| TransportError::PayloadTooLarge {
            len: payload.len(),
            mtu: self.shared.mtu,
        })?;
        // Low 16 bits on the wire.
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed) as u16;
        let header = UnifiedHeader::builder()
            .epoch(self.epoch())
            .sequence(seq)
            .length(length)
            .build()?;

        let mut record = Vec::with_capacity(header.encoded_len() + payload.len());
        header.encode(&mut record);
        record.extend_from_slice(payload);
        Ok(record)
    }

    /// Frame `payload` and write it to the socket.
    async fn write_framed(&self, payload: &[u8]) -> TransportResult<()> {
        let record = self.frame(payload)?;
        self.shared
            .socket
            .send_to(&record, self.shared.remote)
            .await?;
        Counters::bump(&self.shared.counters.records_sent);
        Ok(())
    }

    /// Application traffic resets the idle deadline and suppresses the next
    /// keepalive. Keepalives themselves do neither.
    fn app_sent(&self) {
        self.shared.idle.touch();
        self.shared.sent_since_tick.store(true, Ordering::Relaxed);
    }

    async fn write_queued(&self, payload: &[u8]) {
        match self.write_framed(payload).await {
            Ok(()) => self.app_sent(),
            Err(e) => warn!(peer = %self.shared.remote, error = %e, "record write failed"),
        }
    }

    async fn send_keepalive(&self) {
        if self.shared.sent_since_tick.swap(false, Ordering::Relaxed) {
            return;
        }
        trace!(peer = %self.shared.remote, "sending keepalive");
        match self.write_framed(&[]).await {
            Ok(()) => Counters::bump(&self.shared.counters.keepalives_sent),
            Err(e) => warn!(peer = %self.shared.remote, error = %e, "keepalive write failed"),
        }
    }

    /// Decode every record in `datagram` and pass it through the handler.
    fn dispatch(&self, datagram: InboundDatagram, app_tx: &mpsc::Sender<Vec<u8>>) {
        self.shared.idle.touch();
        let handler = self.handler();
        let remote = self.shared.remote;

        for record in split_records(&datagram.data) {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    Counters::bump(&self.shared.counters.malformed);
                    warn!(peer = %remote, error = %e, "dropping malformed record");
                    break;
                }
            };

            if record.header.cid_present() && !self.shared.cid_enabled {
                Counters::bump(&self.shared.counters.malformed);
                warn!(
                    peer = %remote,
                    error = %HeaderError::UnexpectedCid,
                    "dropping malformed record"
                );
                continue;
            }

            match handler.on_record(remote, &record.header, record.payload) {
                Dispatch::Deliver(bytes) => match app_tx.try_send(bytes) {
                    Ok(()) => Counters::bump(&self.shared.counters.delivered),
                    Err(_) => {
                        Counters::bump(&self.shared.counters.app_queue_drops);
                        debug!(peer = %remote, "app queue full, dropping payload");
                    }
                },
                Dispatch::Discard => {}
            }
        }
    }

    async fn run(self, channels: LoopChannels) {
        let LoopChannels {
            mut inbox_rx,
            mut outbound_rx,
            app_tx,
        } = channels;

        let _ = self.shared.state.compare_exchange(
            ConnectionState::Created as u8,
            ConnectionState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug!(peer = %self.shared.remote, "peer loop started");

        let mut close_rx = self.shared.close_tx.subscribe();
        let mut keepalive = self.shared.keepalive_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let deadline = self.shared.idle.deadline();
            tokio::select! {
                biased;
                _ = wait_closed(&mut close_rx) => break,
                Some(datagram) = inbox_rx.recv() => self.dispatch(datagram, &app_tx),
                Some(payload) = outbound_rx.recv() => self.write_queued(&payload).await,
                _ = sleep_until(deadline) => {
                    // The deadline may have moved while we slept.
                    if self.shared.idle.is_expired(Instant::now()) {
                        info!(peer = %self.shared.remote, "peer idle timeout");
                        break;
                    }
                }
                _ = tick(&mut keepalive) => self.send_keepalive().await,
            }
        }

        self.close();
        // Dropping `app_tx` here lets readers drain and then see `Closed`.
        debug!(peer = %self.shared.remote, "peer loop exited");
    }
}

/// Resolve once the watched flag is `true` or its sender is gone.
pub(crate) async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Passthrough;
    use crate::transport::socket::mock::{MockHandle, MockSocket};

    fn remote() -> SocketAddr {
        "192.0.2.10:7000".parse().unwrap()
    }

    fn quiet_config() -> crate::core::TransportConfigBuilder {
        TransportConfig::builder()
            .keepalive_interval(None)
            .idle_timeout(None)
            .read_timeout(Some(Duration::from_secs(2)))
    }

    fn spawn_mock(
        config: &TransportConfig,
    ) -> (PeerConnection<MockSocket>, Arc<MockSocket>, MockHandle) {
        let (socket, handle) = MockSocket::new();
        let socket = Arc::new(socket);
        let conn = PeerConnection::spawn(
            remote(),
            Arc::clone(&socket),
            config,
            Arc::new(Passthrough),
        );
        (conn, socket, handle)
    }

    fn record(seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = UnifiedHeader::builder()
            .sequence(seq)
            .length(payload.len() as u16)
            .build()
            .unwrap()
            .to_bytes();
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_mtu_enforced_without_io() {
        let config = quiet_config().mtu(100).write_timeout(None).build();
        let (conn, socket, _handle) = spawn_mock(&config);

        let err = conn.send(&[0u8; 101]).await.unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { len: 101, mtu: 100 }));
        assert_eq!(socket.writes(), 0);

        conn.send(&[0u8; 100]).await.unwrap();
        assert_eq!(socket.writes(), 1);
    }

    #[tokio::test]
    async fn test_direct_send_frames_record() {
        let config = quiet_config().write_timeout(None).build();
        let (conn, socket, _handle) = spawn_mock(&config);
        conn.set_epoch(3);

        conn.send(b"hello").await.unwrap();
        conn.send(b"world").await.unwrap();

        let sent = socket.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, remote());

        let (header, used) = UnifiedHeader::from_bytes(&sent[1].0).unwrap();
        assert_eq!(header.epoch(), 3);
        assert_eq!(header.sequence(), 1);
        assert_eq!(header.length(), Some(5));
        assert!(!header.cid_present());
        assert_eq!(&sent[1].0[used..], b"world");
        assert_eq!(conn.stats().records_sent, 2);
    }

    #[tokio::test]
    async fn test_queued_send_goes_through_loop() {
        let config = quiet_config()
            .write_timeout(Some(Duration::from_secs(1)))
            .build();
        let (conn, socket, _handle) = spawn_mock(&config);

        conn.send(b"queued").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while socket.writes() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let (_, used) = UnifiedHeader::from_bytes(&socket.sent()[0].0).unwrap();
        assert_eq!(&socket.sent()[0].0[used..], b"queued");
    }

    #[tokio::test]
    async fn test_inbound_delivery_and_read() {
        let config = quiet_config().build();
        let (conn, _socket, _handle) = spawn_mock(&config);

        let mut datagram = record(1, b"abc");
        datagram.extend(record(2, b"defg"));
        assert!(conn.offer(InboundDatagram::new(datagram, remote())));

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");

        // Short buffer truncates.
        let mut small = [0u8; 2];
        let n = conn.read(&mut small).await.unwrap();
        assert_eq!(&small[..n], b"de");

        let stats = conn.stats();
        assert_eq!(stats.datagrams_received, 1);
        assert_eq!(stats.delivered, 2);
        assert_eq!(conn.state(), ConnectionState::Running);
    }

    #[tokio::test]
    async fn test_malformed_and_unexpected_cid_dropped() {
        let config = quiet_config().build();
        let (conn, _socket, _handle) = spawn_mock(&config);

        conn.offer(InboundDatagram::new(vec![0xFF, 0x00], remote()));

        let mut with_cid = UnifiedHeader::builder()
            .cid(&[9, 9])
            .length(1)
            .build()
            .unwrap()
            .to_bytes();
        with_cid.push(b'x');
        conn.offer(InboundDatagram::new(with_cid, remote()));

        conn.offer(InboundDatagram::new(record(3, b"ok"), remote()));

        assert_eq!(conn.recv().await.unwrap(), b"ok");
        assert_eq!(conn.stats().malformed, 2);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_custom_handler() {
        let config = quiet_config().build();
        let (conn, _socket, _handle) = spawn_mock(&config);
        conn.set_handler(|_: SocketAddr, header: &UnifiedHeader, payload: &[u8]| {
            if header.sequence() == 0 {
                Dispatch::Discard
            } else {
                Dispatch::Deliver(payload.to_ascii_uppercase())
            }
        });

        conn.offer(InboundDatagram::new(record(0, b"skip"), remote()));
        conn.offer(InboundDatagram::new(record(1, b"shout"), remote()));
        assert_eq!(conn.recv().await.unwrap(), b"SHOUT");
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let config = quiet_config()
            .read_timeout(Some(Duration::from_millis(20)))
            .build();
        let (conn, _socket, _handle) = spawn_mock(&config);

        let err = conn.recv().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_idle_eviction() {
        let config = quiet_config()
            .idle_timeout(Some(Duration::from_millis(50)))
            .read_timeout(None)
            .build();
        let (conn, socket, _handle) = spawn_mock(&config);

        let err = tokio::time::timeout(Duration::from_secs(2), conn.recv())
            .await
            .expect("idle timeout should close the connection")
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert_eq!(conn.state(), ConnectionState::Closed);

        let err = conn.send(b"late").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert_eq!(socket.writes(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_drains() {
        let config = quiet_config().build();
        let (conn, _socket, _handle) = spawn_mock(&config);

        conn.offer(InboundDatagram::new(record(1, b"pending"), remote()));
        // Let the loop deliver before closing.
        tokio::time::timeout(Duration::from_secs(1), async {
            while conn.stats().delivered == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        conn.close();
        conn.close();
        assert!(conn.is_closed());

        assert_eq!(conn.recv().await.unwrap(), b"pending");
        assert!(matches!(conn.recv().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let config = quiet_config()
            .write_timeout(Some(Duration::from_secs(30)))
            .build();
        let (conn, socket, _handle) = spawn_mock(&config);

        conn.close();
        conn.closed().await;

        let err = conn.send(b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert_eq!(socket.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_when_quiet() {
        let config = quiet_config()
            .keepalive_interval(Some(Duration::from_millis(100)))
            .write_timeout(None)
            .build();
        let (conn, socket, _handle) = spawn_mock(&config);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let keepalives = conn.stats().keepalives_sent;
        assert!(keepalives >= 1, "expected keepalives, got {keepalives}");

        let (header, used) = UnifiedHeader::from_bytes(&socket.sent()[0].0).unwrap();
        assert_eq!(header.length(), Some(0));
        assert_eq!(used, socket.sent()[0].0.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalives_do_not_defer_idle_timeout() {
        let config = quiet_config()
            .idle_timeout(Some(Duration::from_millis(120)))
            .keepalive_interval(Some(Duration::from_millis(25)))
            .read_timeout(None)
            .write_timeout(None)
            .build();
        let (conn, _socket, _handle) = spawn_mock(&config);

        let err = tokio::time::timeout(Duration::from_secs(10), conn.recv())
            .await
            .expect("silent remote should be evicted")
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert_eq!(conn.state(), ConnectionState::Closed);

        let stats = conn.stats();
        assert!(stats.keepalives_sent >= 1);
        assert_eq!(stats.records_sent, stats.keepalives_sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_when_handoff_full() {
        let (socket, _handle) = MockSocket::stalled();
        let socket = Arc::new(socket);
        let config = quiet_config()
            .app_queue_capacity(1)
            .write_timeout(Some(Duration::from_millis(50)))
            .build();
        let conn = PeerConnection::spawn(
            remote(),
            Arc::clone(&socket),
            &config,
            Arc::new(Passthrough),
        );

        // First is held by the loop at the socket, second fills the queue.
        conn.send(b"one").await.unwrap();
        conn.send(b"two").await.unwrap();
        let err = conn.send(b"three").await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert!(err.is_retryable());
        assert!(!conn.is_closed());

        socket.release_sends(3);
        conn.send(b"four").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while socket.writes() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // The timed-out send left no gap in the sequence.
        let sent = socket.sent();
        let sequences: Vec<u16> = sent
            .iter()
            .map(|(record, _)| UnifiedHeader::from_bytes(record).unwrap().0.sequence())
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);

        let (_, used) = UnifiedHeader::from_bytes(&sent[2].0).unwrap();
        assert_eq!(&sent[2].0[used..], b"four");
        assert_eq!(conn.stats().records_sent, 3);
    }

    #[tokio::test]
    async fn test_close_wakes_pending_send_and_recv() {
        let (socket, _handle) = MockSocket::stalled();
        let socket = Arc::new(socket);
        let config = quiet_config()
            .app_queue_capacity(1)
            .write_timeout(Some(Duration::from_secs(30)))
            .read_timeout(None)
            .build();
        let conn = PeerConnection::spawn(
            remote(),
            Arc::clone(&socket),
            &config,
            Arc::new(Passthrough),
        );

        conn.send(b"one").await.unwrap();
        conn.send(b"two").await.unwrap();

        let sender = conn.clone();
        let send = tokio::spawn(async move { sender.send(b"blocked").await });
        let reader = conn.clone();
        let recv = tokio::spawn(async move { reader.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!send.is_finished());
        assert!(!recv.is_finished());

        conn.close();
        let (send, recv) = tokio::time::timeout(Duration::from_secs(2), async {
            (send.await.unwrap(), recv.await.unwrap())
        })
        .await
        .expect("close should wake pending calls");
        assert!(matches!(send, Err(TransportError::Closed)));
        assert!(matches!(recv, Err(TransportError::Closed)));

        // Only the payload already at the socket was framed.
        socket.release_sends(3);
        tokio::task::yield_now().await;
        assert_eq!(conn.shared.next_seq.load(Ordering::Relaxed), 1);
        assert!(socket.writes() <= 1);
    }
}
