//! TCP Transport implementation

use std::io;

use async_trait::async_trait;
use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};

use crate::common::{lookup_inet, Error, NetworkProtocol, Result, SocketAddress, Stream};

use super::{Dialed, Endpoint, Listener, Transport};

/// TCP transport - raw TCP connections (tcp, tcp4 or tcp6)
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    protocol: NetworkProtocol,
}

impl TcpTransport {
    pub fn new(protocol: NetworkProtocol) -> Result<Self> {
        match protocol {
            NetworkProtocol::Tcp | NetworkProtocol::Tcp4 | NetworkProtocol::Tcp6 => {
                Ok(Self { protocol })
            }
            other => Err(Error::InvalidProtocol(format!("{} is not a tcp protocol", other))),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            protocol: NetworkProtocol::Tcp,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn protocol(&self) -> NetworkProtocol {
        self.protocol
    }

    async fn connect(&self, address: &str) -> Result<Dialed> {
        let target = lookup_inet(self.protocol, address).await?;
        let stream = TcpStream::connect(target).await?;

        // Disable Nagle's algorithm for lower latency
        stream.set_nodelay(true)?;

        let local = SocketAddress::from(stream.local_addr()?);
        let remote = SocketAddress::from(stream.peer_addr()?);

        Ok(Dialed {
            stream: Box::new(stream),
            local,
            remote,
        })
    }

    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Listener>> {
        let addr = lookup_inet(self.protocol, &endpoint.address).await?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Box::new(TcpListenerWrapper { listener }))
    }
}

/// Wrapper for TcpListener to implement Listener trait
struct TcpListenerWrapper {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpListenerWrapper {
    async fn accept(&self) -> io::Result<(Stream, SocketAddress)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), SocketAddress::Inet(addr)))
    }

    fn local_addr(&self) -> Result<SocketAddress> {
        Ok(SocketAddress::Inet(self.listener.local_addr()?))
    }

    fn socket(&self) -> SockRef<'_> {
        SockRef::from(&self.listener)
    }
}
