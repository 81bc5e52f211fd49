//! Unix datagram Transport implementation

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use socket2::SockRef;
use tokio::net::UnixDatagram;

use crate::common::{validate_unix_path, NetworkProtocol, Result, SocketAddress};

use super::unix::SocketFile;
use super::{DatagramSocket, DatagramTransport, Endpoint};

static CLIENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unix domain datagram transport
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixGramTransport;

impl UnixGramTransport {
    pub fn new() -> Self {
        Self
    }

    /// Unique path for a client endpoint, so that servers can reply
    fn client_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "netsock-{}-{}.sock",
            std::process::id(),
            CLIENT_SEQ.fetch_add(1, Ordering::Relaxed)
        ))
    }
}

#[async_trait]
impl DatagramTransport for UnixGramTransport {
    type Socket = UnixDatagramSocket;

    fn protocol(&self) -> NetworkProtocol {
        NetworkProtocol::UnixGram
    }

    async fn connect(&self, address: &str) -> Result<UnixDatagramSocket> {
        let target = validate_unix_path(address)?;
        let mut file = SocketFile::adopt(Self::client_path());

        let socket = UnixDatagram::bind(file.path())?;
        file.mark_bound()?;
        socket.connect(&target)?;

        Ok(UnixDatagramSocket {
            inner: socket,
            file: Some(file),
        })
    }

    async fn bind(&self, endpoint: &Endpoint) -> Result<UnixDatagramSocket> {
        let mut file = SocketFile::prepare(endpoint)?;
        let socket = UnixDatagram::bind(file.path())?;
        file.mark_bound()?;
        file.apply_permissions()?;

        Ok(UnixDatagramSocket {
            inner: socket,
            file: Some(file),
        })
    }
}

/// Unix datagram socket owning its bound socket file
#[derive(Debug)]
pub struct UnixDatagramSocket {
    inner: UnixDatagram,
    file: Option<SocketFile>,
}

impl UnixDatagramSocket {
    /// Path of the socket file this socket owns, if any
    pub fn path(&self) -> Option<&std::path::Path> {
        self.file.as_ref().map(SocketFile::path)
    }
}

#[async_trait]
impl DatagramSocket for UnixDatagramSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddress)> {
        let (n, peer) = self.inner.recv_from(buf).await?;
        Ok((n, SocketAddress::from(peer)))
    }

    async fn send_to(&self, buf: &[u8], target: &SocketAddress) -> io::Result<usize> {
        match target.as_path() {
            Some(path) => self.inner.send_to(buf, path).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("cannot reply to {}", target),
            )),
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf).await
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.send(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddress> {
        self.inner.local_addr().map(SocketAddress::from)
    }

    fn peer_addr(&self) -> io::Result<SocketAddress> {
        self.inner.peer_addr().map(SocketAddress::from)
    }

    fn socket(&self) -> SockRef<'_> {
        SockRef::from(&self.inner)
    }
}
