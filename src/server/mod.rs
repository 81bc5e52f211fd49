//! Server Core
//!
//! One `Server` interface, two cores:
//! - `StreamServer`: accept loop, one task per connection (tcp, unix)
//! - `DatagramServer`: one handler task over the shared socket (udp, unixgram)
//!
//! `new` picks the core and transport from a `NetworkProtocol`.

mod datagram;
mod stream;

pub use datagram::DatagramServer;
pub use stream::StreamServer;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::{
    Error, FuncError, FuncInfo, FuncInfoSrv, Result, ServerState, ShutdownSignal, SocketAddress,
    UpdateConn,
};
use crate::context::Handler;
use crate::transport::{TcpTransport, UdpTransport, UnixPermissions};
#[cfg(unix)]
use crate::transport::{UnixGramTransport, UnixTransport};

/// Interval at which `shutdown` re-checks drain progress
const SHUTDOWN_TICK: Duration = Duration::from_millis(3);

/// Hard cap on how long `shutdown` waits for connections to drain
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(25);

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

pub type TcpServer = StreamServer<TcpTransport>;
pub type UdpServer = DatagramServer<UdpTransport>;
#[cfg(unix)]
pub type UnixServer = StreamServer<UnixTransport>;
#[cfg(unix)]
pub type UnixGramServer = DatagramServer<UnixGramTransport>;

/// Socket server lifecycle shared by every transport
#[async_trait]
pub trait Server: Send + Sync {
    /// Validate and store the bind address without opening a socket
    fn register_server(&self, address: &str) -> Result<()>;

    /// Store a unix socket path with its file mode and owning group
    fn register_socket(&self, path: &str, permissions: u32, group: Option<i32>) -> Result<()>;

    fn register_func_error(&self, f: Option<FuncError>);

    fn register_func_info(&self, f: Option<FuncInfo>);

    fn register_func_info_server(&self, f: Option<FuncInfoSrv>);

    /// Bind and serve until `ctx` is cancelled or `shutdown` is called.
    ///
    /// Cancellation is not an error. Whatever the outcome, the server is no
    /// longer running and is gone once this returns.
    async fn listen(&self, ctx: &CancellationToken) -> Result<()>;

    /// Stop listening and wait for open connections to finish.
    ///
    /// Fails with `ShutdownTimeout` when `ctx` is cancelled first.
    async fn shutdown(&self, ctx: &CancellationToken) -> Result<()>;

    fn is_running(&self) -> bool;

    fn is_gone(&self) -> bool;

    fn open_connections(&self) -> i64;

    /// Bound address while listening
    fn local_addr(&self) -> Option<SocketAddress>;
}

/// Build a server for `protocol`.
///
/// `read_buffer_size` bounds one datagram for datagram servers (0 = default).
/// A non-empty `address` is registered right away, with `unix` permissions
/// for unix transports.
pub fn new(
    update: Option<UpdateConn>,
    handler: Option<Handler>,
    protocol: crate::common::NetworkProtocol,
    read_buffer_size: usize,
    address: &str,
    unix: Option<UnixPermissions>,
) -> Result<Box<dyn Server>> {
    use crate::common::NetworkProtocol::*;

    let server: Box<dyn Server> = match protocol {
        Tcp | Tcp4 | Tcp6 => Box::new(StreamServer::new(TcpTransport::new(protocol)?, update, handler)),
        Udp | Udp4 | Udp6 => Box::new(DatagramServer::new(
            UdpTransport::new(protocol)?,
            update,
            handler,
            read_buffer_size,
        )),
        #[cfg(unix)]
        Unix => Box::new(StreamServer::new(UnixTransport, update, handler)),
        #[cfg(unix)]
        UnixGram => Box::new(DatagramServer::new(UnixGramTransport, update, handler, read_buffer_size)),
        #[cfg(not(unix))]
        other => {
            return Err(Error::InvalidProtocol(format!("{} is not supported on this platform", other)))
        }
    };

    if !address.is_empty() {
        match unix {
            Some(p) if protocol.is_unix() => server.register_socket(address, p.mode(), p.group().map(|g| g as i32))?,
            _ => server.register_server(address)?,
        }
    }

    Ok(server)
}

/// Bookkeeping shared by both server cores
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    pub(crate) state: Arc<ServerState>,
    pub(crate) signal: ShutdownSignal,
    pub(crate) local: ArcSwapOption<SocketAddress>,
}

impl Lifecycle {
    /// Derive the listen token from `ctx`, publish the bound address and mark running
    pub(crate) fn begin(&self, ctx: &CancellationToken, local: &SocketAddress) -> CancellationToken {
        let token = ctx.child_token();
        self.local.store(Some(Arc::new(local.clone())));
        self.state.start();
        self.signal.arm(&token);
        token
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddress> {
        self.local.load_full().map(|a| (*a).clone())
    }

    /// Request stop, then wait until the listen loop exited and connections drained.
    ///
    /// With nothing listening the request stays pending for the next `listen`.
    pub(crate) async fn shutdown(&self, ctx: &CancellationToken) -> Result<()> {
        self.signal.request();
        if !self.state.is_running() {
            return Ok(());
        }

        let deadline = tokio::time::sleep(SHUTDOWN_TIMEOUT);
        tokio::pin!(deadline);
        let mut tick = tokio::time::interval(SHUTDOWN_TICK);

        loop {
            if !self.state.is_running() && self.state.open_connections() == 0 {
                return Ok(());
            }

            tokio::select! {
                _ = ctx.cancelled() => return Err(Error::ShutdownTimeout),
                _ = &mut deadline => return Err(Error::ShutdownTimeout),
                _ = tick.tick() => {}
            }
        }
    }

    /// Reset on every exit of `listen`, including drop of its future
    pub(crate) fn guard(&self) -> ListenGuard<'_> {
        ListenGuard { lifecycle: self }
    }
}

pub(crate) struct ListenGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for ListenGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.signal.disarm();
        self.lifecycle.local.store(None);
        self.lifecycle.state.stop();
    }
}

/// Message of a caught handler panic
pub(crate) fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}
