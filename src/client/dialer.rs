//! Single-peer client connection.
//!
//! The client mirror of the multiplexer: one connected socket, one
//! [`PeerConnection`], and a receive pump feeding its inbox. No peer table.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::lookup_host;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::{
    DEFAULT_PORT, DatagramHandler, MAX_DATAGRAM_SIZE, Passthrough, TransportConfig,
    TransportError, TransportResult,
};
use crate::crypto::CipherSuiteRegistry;
use crate::transport::{
    ConnectedUdp, ConnectionState, DatagramSocket, InboundDatagram, PeerConnection, PeerStats,
    is_transient,
};

/// A connection dialed to one remote.
///
/// Closed on drop.
#[derive(Debug)]
pub struct DialedConnection {
    conn: PeerConnection<ConnectedUdp>,
    local_addr: SocketAddr,
    pump: JoinHandle<()>,
}

/// Dial `addr` with `config`.
///
/// `config` is validated against the standard cipher suites.
pub async fn dial(addr: SocketAddr, config: TransportConfig) -> TransportResult<DialedConnection> {
    config.validate(&CipherSuiteRegistry::standard())?;

    let socket = Arc::new(ConnectedUdp::connect(addr).await?);
    let local_addr = socket.local_addr()?;
    let conn = PeerConnection::spawn(addr, Arc::clone(&socket), &config, Arc::new(Passthrough));
    let pump = tokio::spawn(receive_pump(socket, conn.clone()));

    info!(local = %local_addr, remote = %addr, "dialed");
    Ok(DialedConnection {
        conn,
        local_addr,
        pump,
    })
}

/// Resolve `host` and dial the first address.
///
/// `host` may be `name`, `name:port`, an IP literal, or a socket address.
/// Without a port, [`DEFAULT_PORT`] is used.
pub async fn dial_host(host: &str, config: TransportConfig) -> TransportResult<DialedConnection> {
    let addr = resolve(host).await?;
    dial(addr, config).await
}

/// Resolve `host` and dial it on `port`.
pub async fn dial_host_port(
    host: &str,
    port: u16,
    config: TransportConfig,
) -> TransportResult<DialedConnection> {
    let addr = first_addr(lookup_host((host, port)).await?, host)?;
    dial(addr, config).await
}

async fn resolve(host: &str) -> TransportResult<SocketAddr> {
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    let has_port = host
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    let addrs: Vec<SocketAddr> = if has_port {
        lookup_host(host).await?.collect()
    } else {
        lookup_host((host, DEFAULT_PORT)).await?.collect()
    };
    first_addr(addrs.into_iter(), host)
}

fn first_addr(
    mut addrs: impl Iterator<Item = SocketAddr>,
    host: &str,
) -> TransportResult<SocketAddr> {
    addrs.next().ok_or_else(|| {
        TransportError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses for {host}"),
        ))
    })
}

/// Copy datagrams from the socket into the connection's inbox until either
/// side closes.
///
/// ICMP errors reported on the connected socket (port unreachable while the
/// remote restarts) are skipped.
async fn receive_pump(socket: Arc<ConnectedUdp>, conn: PeerConnection<ConnectedUdp>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = tokio::select! {
            biased;
            _ = conn.closed() => None,
            res = socket.recv_from(&mut buf) => Some(res),
        };

        match received {
            None => break,
            Some(Ok((len, source))) => {
                if !conn.offer(InboundDatagram::new(buf[..len].to_vec(), source)) {
                    debug!(peer = %source, "inbox full, dropping datagram");
                }
            }
            Some(Err(e)) if is_transient(&e) => {
                debug!(peer = %conn.remote_addr(), error = %e, "transient receive error");
            }
            Some(Err(e)) => {
                warn!(peer = %conn.remote_addr(), error = %e, "socket receive failed");
                conn.close();
                break;
            }
        }
    }
}

impl DialedConnection {
    /// Send `payload` as one record. See [`PeerConnection::send`].
    pub async fn send(&self, payload: &[u8]) -> TransportResult<()> {
        self.conn.send(payload).await
    }

    /// Read the next payload into `buf`. See [`PeerConnection::read`].
    pub async fn read(&self, buf: &mut [u8]) -> TransportResult<usize> {
        self.conn.read(buf).await
    }

    /// Receive the next payload whole.
    pub async fn recv(&self) -> TransportResult<Vec<u8>> {
        self.conn.recv().await
    }

    /// Close the connection and stop the receive pump.
    pub fn close(&self) {
        self.conn.close();
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        self.conn.closed().await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Check if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Local address of the connected socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.remote_addr()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PeerStats {
        self.conn.stats()
    }

    /// Replace the per-record handler.
    pub fn set_handler(&self, handler: impl DatagramHandler) {
        self.conn.set_handler(handler);
    }

    /// Set the epoch stamped on outbound records.
    pub fn set_epoch(&self, epoch: u16) {
        self.conn.set_epoch(epoch);
    }

    /// Underlying peer connection.
    pub fn connection(&self) -> &PeerConnection<ConnectedUdp> {
        &self.conn
    }
}

impl Drop for DialedConnection {
    fn drop(&mut self) {
        self.conn.close();
        self.pump.abort();
    }
}
