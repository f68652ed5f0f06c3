//! Trait abstraction for datagram I/O to enable testing

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// Trait for datagram socket operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Receive one datagram into `buf`
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send one datagram to `target`
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Address the transport is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramTransport for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, data, target).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
