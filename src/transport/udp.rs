//! UDP Transport implementation
//!
//! UDP is connectionless: "connecting" only binds an ephemeral local port and
//! records the default destination, it never fails because no peer listens.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use socket2::SockRef;
use tokio::net::UdpSocket;

use crate::common::{lookup_inet, Error, NetworkProtocol, Result, SocketAddress};

use super::{DatagramSocket, DatagramTransport, Endpoint};

/// UDP transport (udp, udp4 or udp6)
#[derive(Debug, Clone, Copy)]
pub struct UdpTransport {
    protocol: NetworkProtocol,
}

impl UdpTransport {
    pub fn new(protocol: NetworkProtocol) -> Result<Self> {
        match protocol {
            NetworkProtocol::Udp | NetworkProtocol::Udp4 | NetworkProtocol::Udp6 => {
                Ok(Self { protocol })
            }
            other => Err(Error::InvalidProtocol(format!("{} is not a udp protocol", other))),
        }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self {
            protocol: NetworkProtocol::Udp,
        }
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    type Socket = UdpSocket;

    fn protocol(&self) -> NetworkProtocol {
        self.protocol
    }

    async fn connect(&self, address: &str) -> Result<UdpSocket> {
        let target = lookup_inet(self.protocol, address).await?;
        let local = match target {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        Ok(socket)
    }

    async fn bind(&self, endpoint: &Endpoint) -> Result<UdpSocket> {
        let addr = lookup_inet(self.protocol, &endpoint.address).await?;
        Ok(UdpSocket::bind(addr).await?)
    }
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddress)> {
        let (n, peer) = UdpSocket::recv_from(self, buf).await?;
        Ok((n, SocketAddress::Inet(peer)))
    }

    async fn send_to(&self, buf: &[u8], target: &SocketAddress) -> io::Result<usize> {
        match target.as_inet() {
            Some(addr) => UdpSocket::send_to(self, buf, addr).await,
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not an ip address", target),
            )),
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf).await
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddress> {
        UdpSocket::local_addr(self).map(SocketAddress::Inet)
    }

    fn peer_addr(&self) -> io::Result<SocketAddress> {
        UdpSocket::peer_addr(self).map(SocketAddress::Inet)
    }

    fn socket(&self) -> SockRef<'_> {
        SockRef::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_without_listener_succeeds() {
        let transport = UdpTransport::default();
        let port = {
            let s = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            s.local_addr().unwrap().port()
        };
        let socket = transport.connect(&format!("127.0.0.1:{}", port)).await.unwrap();
        assert_eq!(DatagramSocket::peer_addr(&socket).unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_recv_from_reports_sender() {
        let transport = UdpTransport::default();
        let server = transport.bind(&Endpoint::new("127.0.0.1:0")).await.unwrap();
        let server_addr = DatagramSocket::local_addr(&server).unwrap();

        let client = transport.connect(&server_addr.to_string()).await.unwrap();
        DatagramSocket::send(&client, b"hi").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = DatagramSocket::recv_from(&server, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
        assert_eq!(from.port(), DatagramSocket::local_addr(&client).unwrap().port());
    }

    #[tokio::test]
    async fn test_send_to_unix_address_rejected() {
        let socket = UdpTransport::default()
            .bind(&Endpoint::new("127.0.0.1:0"))
            .await
            .unwrap();
        let err = DatagramSocket::send_to(&socket, b"x", &SocketAddress::unix("/tmp/nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
