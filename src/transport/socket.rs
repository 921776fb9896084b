//! Async datagram socket seam.
//!
//! [`DatagramSocket`] lets the peer loop and the multiplexer run over a tokio
//! [`UdpSocket`], a [`ConnectedUdp`] client socket, or an in-memory mock.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Unconnected datagram socket shared by many peers.
///
/// Sends may be issued concurrently from several tasks without extra locking.
pub trait DatagramSocket: Send + Sync + 'static {
    /// Send one datagram to `target`.
    fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive one datagram, returning its length and source.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    /// Local bound address.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// UDP socket connected to a single remote.
///
/// Some platforms reject `send_to` on a connected socket, so sends go through
/// `send` and the target is ignored.
#[derive(Debug)]
pub struct ConnectedUdp {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl ConnectedUdp {
    /// Bind an ephemeral local port of the right family and connect to `remote`.
    pub async fn connect(remote: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        Ok(Self { socket, remote })
    }

    /// Connected remote address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

impl DatagramSocket for ConnectedUdp {
    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
        self.socket.send(buf).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let len = self.socket.recv(buf).await?;
        Ok((len, self.remote))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Errors caused by ICMP feedback for an earlier send; the socket is fine.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_send_recv() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = DatagramSocket::local_addr(&server).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        DatagramSocket::send_to(&client, b"hello", server_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = DatagramSocket::recv_from(&server, &mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, DatagramSocket::local_addr(&client).unwrap());
    }

    #[tokio::test]
    async fn test_connected_udp() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = DatagramSocket::local_addr(&server).unwrap();

        let client = ConnectedUdp::connect(server_addr).await.unwrap();
        assert_eq!(client.remote_addr(), server_addr);

        // Target is ignored; the datagram goes to the connected remote.
        let elsewhere: SocketAddr = "127.0.0.1:9".parse().unwrap();
        client.send_to(b"ping", elsewhere).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = DatagramSocket::recv_from(&server, &mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, client.local_addr().unwrap());

        DatagramSocket::send_to(&server, b"pong", from).await.unwrap();
        let (len, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"pong");
        assert_eq!(from, server_addr);
    }

    #[tokio::test]
    async fn test_mock_socket() {
        let (socket, handle) = mock::MockSocket::new();
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();

        socket.send_to(b"out", peer).await.unwrap();
        assert_eq!(socket.writes(), 1);
        assert_eq!(socket.sent(), vec![(b"out".to_vec(), peer)]);

        handle.inject(b"in", peer);
        let mut buf = [0u8; 8];
        let (len, from) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!((&buf[..len], from), (&b"in"[..], peer));

        drop(handle);
        assert!(socket.recv_from(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_mock_socket() {
        let (socket, _handle) = mock::MockSocket::stalled();
        let socket = std::sync::Arc::new(socket);
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();

        let sender = std::sync::Arc::clone(&socket);
        let pending = tokio::spawn(async move { sender.send_to(b"held", peer).await });
        tokio::task::yield_now().await;
        assert_eq!(socket.writes(), 0);

        socket.release_sends(1);
        assert_eq!(pending.await.unwrap().unwrap(), 4);
        assert_eq!(socket.writes(), 1);
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::ErrorKind::ConnectionRefused.into()));
        assert!(is_transient(&io::ErrorKind::ConnectionReset.into()));
        assert!(!is_transient(&io::ErrorKind::ConnectionAborted.into()));
        assert!(!is_transient(&io::ErrorKind::PermissionDenied.into()));
    }
}
