//! Unix stream Transport implementation
//!
//! Also hosts the socket-file handling shared with the unix datagram
//! transport: stale file removal before bind, permission/group application
//! after bind and removal when the listener is released.

use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use socket2::SockRef;
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use crate::common::{validate_unix_path, NetworkProtocol, Result, SocketAddress, Stream};

use super::{Dialed, Endpoint, Listener, Transport, UnixPermissions};

/// Unix domain stream transport
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixTransport;

impl UnixTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for UnixTransport {
    fn protocol(&self) -> NetworkProtocol {
        NetworkProtocol::Unix
    }

    async fn connect(&self, address: &str) -> Result<Dialed> {
        let path = validate_unix_path(address)?;
        let stream = UnixStream::connect(&path).await?;

        let local = stream
            .local_addr()
            .map(SocketAddress::from)
            .unwrap_or(SocketAddress::Unix(None));
        let remote = stream
            .peer_addr()
            .map(SocketAddress::from)
            .unwrap_or_else(|_| SocketAddress::unix(path));

        Ok(Dialed {
            stream: Box::new(stream),
            local,
            remote,
        })
    }

    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Listener>> {
        let mut file = SocketFile::prepare(endpoint)?;
        let listener = UnixListener::bind(file.path())?;
        file.mark_bound()?;
        file.apply_permissions()?;

        Ok(Box::new(UnixListenerWrapper { listener, file }))
    }
}

/// Wrapper for UnixListener to implement Listener trait
struct UnixListenerWrapper {
    listener: UnixListener,
    file: SocketFile,
}

#[async_trait]
impl Listener for UnixListenerWrapper {
    async fn accept(&self) -> io::Result<(Stream, SocketAddress)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((Box::new(stream), SocketAddress::from(addr)))
    }

    fn local_addr(&self) -> Result<SocketAddress> {
        Ok(SocketAddress::unix(self.file.path()))
    }

    fn socket(&self) -> SockRef<'_> {
        SockRef::from(&self.listener)
    }
}

/// Socket file owned by a bound unix socket.
///
/// Removed on drop, unless the path has since been rebound by someone else.
#[derive(Debug)]
pub(crate) struct SocketFile {
    path: PathBuf,
    permissions: UnixPermissions,
    /// (device, inode) of the file this socket created
    identity: Option<(u64, u64)>,
}

impl SocketFile {
    /// Validate the path and remove a stale socket file left at it
    pub(crate) fn prepare(endpoint: &Endpoint) -> Result<Self> {
        let path = validate_unix_path(&endpoint.address)?;
        remove_stale(&path)?;

        Ok(Self {
            path,
            permissions: endpoint.unix.unwrap_or_default(),
            identity: None,
        })
    }

    /// Take ownership of a path bound elsewhere (client endpoints)
    pub(crate) fn adopt(path: PathBuf) -> Self {
        Self {
            path,
            permissions: UnixPermissions::default(),
            identity: None,
        }
    }

    /// Record which file the bind created; call right after binding
    pub(crate) fn mark_bound(&mut self) -> Result<()> {
        self.identity = Some(identity(&self.path)?);
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Apply mode bits and group ownership to the bound file
    pub(crate) fn apply_permissions(&self) -> Result<()> {
        std::fs::set_permissions(
            &self.path,
            std::fs::Permissions::from_mode(self.permissions.mode()),
        )
        .map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to set permissions on {}: {e}", self.path.display()),
            )
        })?;

        if let Some(gid) = self.permissions.group() {
            std::os::unix::fs::chown(&self.path, None, Some(gid)).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("failed to set group {} on {}: {e}", gid, self.path.display()),
                )
            })?;
        }

        Ok(())
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        let Some(bound) = self.identity else {
            return;
        };

        match identity(&self.path) {
            Ok(current) if current == bound => {
                if std::fs::remove_file(&self.path).is_ok() {
                    debug!(path = %self.path.display(), "Removed socket file");
                }
            }
            Ok(_) => debug!(path = %self.path.display(), "Socket file rebound elsewhere, left in place"),
            Err(_) => {}
        }
    }
}

fn identity(path: &Path) -> io::Result<(u64, u64)> {
    let metadata = std::fs::symlink_metadata(path)?;
    Ok((metadata.dev(), metadata.ino()))
}

/// Remove a stale socket file; refuse to touch anything that is not a socket
fn remove_stale(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("path {} exists but is not a socket", path.display()),
        )
        .into());
    }

    std::fs::remove_file(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to remove stale socket {}: {e}", path.display()),
        )
    })?;

    debug!(path = %path.display(), "Removed stale socket file");
    Ok(())
}
