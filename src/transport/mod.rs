//! Transport Layer
//!
//! Responsibilities:
//! - Bind listeners / datagram sockets and dial outbound sockets
//! - Unix socket file management (stale removal, permissions, cleanup)
//! - TLS material (acceptors and connectors)
//!
//! This layer ONLY deals with raw socket establishment. Lifecycle, dispatch
//! and observability live in `server` and `client`.

mod tcp;
mod tls;
mod udp;
#[cfg(unix)]
mod unix;
#[cfg(unix)]
mod unixgram;

pub use tcp::TcpTransport;
pub use tls::{TlsConfig, TlsConnectorConfig};
pub use tokio_rustls::TlsAcceptor;
pub use udp::UdpTransport;
#[cfg(unix)]
pub use unix::UnixTransport;
#[cfg(unix)]
pub use unixgram::{UnixDatagramSocket, UnixGramTransport};

pub(crate) use tls::{build_acceptor, build_connector};

use std::io;

use async_trait::async_trait;
use socket2::SockRef;

use crate::common::{Error, NetworkProtocol, Result, SocketAddress, Stream, MAX_GID};

/// Default permission bits of a unix socket file
pub const DEFAULT_UNIX_PERMISSIONS: u32 = 0o770;

/// File permission bits and owning group of a unix socket file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixPermissions {
    mode: u32,
    group: Option<u32>,
}

impl UnixPermissions {
    /// Mode bits are masked to `0o7777`; a group outside `[0, MAX_GID]` is rejected.
    pub fn new(mode: u32, group: Option<i32>) -> Result<Self> {
        let group = match group {
            None => None,
            Some(g) if (0..=MAX_GID).contains(&g) => Some(g as u32),
            Some(g) => return Err(Error::InvalidGroup(g)),
        };

        Ok(Self {
            mode: mode & 0o7777,
            group,
        })
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn group(&self) -> Option<u32> {
        self.group
    }
}

impl Default for UnixPermissions {
    fn default() -> Self {
        Self {
            mode: DEFAULT_UNIX_PERMISSIONS,
            group: None,
        }
    }
}

/// A validated bind target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub unix: Option<UnixPermissions>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            unix: None,
        }
    }

    pub fn with_permissions(mut self, permissions: UnixPermissions) -> Self {
        self.unix = Some(permissions);
        self
    }
}

/// An outbound stream with both endpoints resolved
pub struct Dialed {
    pub stream: Stream,
    pub local: SocketAddress,
    pub remote: SocketAddress,
}

/// Stream transport: establishes connection-oriented sockets
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Protocol this transport speaks
    fn protocol(&self) -> NetworkProtocol;

    /// Validate an address without opening a socket
    fn validate(&self, address: &str) -> Result<()> {
        crate::common::validate(self.protocol(), address)
    }

    /// Connect to a remote address
    async fn connect(&self, address: &str) -> Result<Dialed>;

    /// Create a listener bound to an endpoint
    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Listener>>;
}

/// Listener trait for accepting incoming connections
#[async_trait]
pub trait Listener: Send + Sync {
    /// Accept a new connection
    async fn accept(&self) -> io::Result<(Stream, SocketAddress)>;

    /// Get the local bound address
    fn local_addr(&self) -> Result<SocketAddress>;

    /// Raw socket handle for tuning
    fn socket(&self) -> SockRef<'_>;
}

/// Datagram transport: establishes connectionless sockets
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    type Socket: DatagramSocket;

    /// Protocol this transport speaks
    fn protocol(&self) -> NetworkProtocol;

    /// Validate an address without opening a socket
    fn validate(&self, address: &str) -> Result<()> {
        crate::common::validate(self.protocol(), address)
    }

    /// Bind a local ephemeral endpoint and associate the default destination
    async fn connect(&self, address: &str) -> Result<Self::Socket>;

    /// Bind a socket to an endpoint
    async fn bind(&self, endpoint: &Endpoint) -> Result<Self::Socket>;
}

/// Operations of a bound datagram socket
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    /// Receive the next datagram from any peer
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddress)>;

    /// Send a datagram to a peer
    async fn send_to(&self, buf: &[u8], target: &SocketAddress) -> io::Result<usize>;

    /// Receive from the associated peer
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send to the associated peer
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;

    fn local_addr(&self) -> io::Result<SocketAddress>;

    fn peer_addr(&self) -> io::Result<SocketAddress>;

    /// Raw socket handle for tuning
    fn socket(&self) -> SockRef<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_mask_mode() {
        let p = UnixPermissions::new(0o100660, None).unwrap();
        assert_eq!(p.mode(), 0o660);
        assert_eq!(p.group(), None);
    }

    #[test]
    fn test_permissions_group_range() {
        assert_eq!(UnixPermissions::new(0o600, Some(0)).unwrap().group(), Some(0));
        assert_eq!(
            UnixPermissions::new(0o600, Some(MAX_GID)).unwrap().group(),
            Some(MAX_GID as u32)
        );
        assert!(matches!(
            UnixPermissions::new(0o600, Some(MAX_GID + 1)),
            Err(Error::InvalidGroup(_))
        ));
        assert!(matches!(
            UnixPermissions::new(0o600, Some(-1)),
            Err(Error::InvalidGroup(-1))
        ));
    }

    #[test]
    fn test_endpoint_builder() {
        let ep = Endpoint::new("/tmp/x.sock").with_permissions(UnixPermissions::default());
        assert_eq!(ep.unix.unwrap().mode(), DEFAULT_UNIX_PERMISSIONS);
    }
}
