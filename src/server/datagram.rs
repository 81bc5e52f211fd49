//! Datagram server core (udp, unixgram)
//!
//! The bound socket is served by a single handler invocation for the whole
//! run, so datagrams are handled one at a time in arrival order. A handler
//! that panics or returns ends processing until the next `listen`.
//!
//! The socket, and for unixgram its file, is released before `listen`
//! returns. A handler still running afterwards sees `ConnectionClosed`.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::{
    ConnState, Error, FuncError, FuncInfo, FuncInfoSrv, Hooks, Result, SocketAddress, UpdateConn,
};
use crate::context::{DatagramContext, Handler, SocketSlot};
use crate::transport::{DatagramSocket, DatagramTransport, Endpoint, UnixPermissions};

use super::{panic_message, Lifecycle, Server, SHUTDOWN_TICK, SHUTDOWN_TIMEOUT};

/// Connectionless server over any `DatagramTransport`
pub struct DatagramServer<T: DatagramTransport> {
    transport: T,
    endpoint: ArcSwapOption<Endpoint>,
    handler: Option<Handler>,
    update: Option<UpdateConn>,
    buffer_size: usize,
    hooks: Arc<Hooks>,
    lifecycle: Lifecycle,
}

impl<T: DatagramTransport> DatagramServer<T> {
    pub fn new(
        transport: T,
        update: Option<UpdateConn>,
        handler: Option<Handler>,
        buffer_size: usize,
    ) -> Self {
        Self {
            transport,
            endpoint: ArcSwapOption::empty(),
            handler,
            update,
            buffer_size,
            hooks: Hooks::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    async fn serve(&self, ctx: &CancellationToken) -> Result<()> {
        let endpoint = self
            .endpoint
            .load_full()
            .ok_or_else(|| Error::InvalidAddress("no address registered".into()))?;
        let handler = self.handler.clone().ok_or(Error::InvalidHandler)?;
        let protocol = self.transport.protocol();

        let socket = self.transport.bind(&endpoint).await?;
        if let Some(update) = &self.update {
            update(socket.socket());
        }

        let local = socket.local_addr()?;
        let slot: SocketSlot<T::Socket> = Arc::new(ArcSwapOption::from_pointee(socket));
        let guard = self.lifecycle.state.track();
        let token = self.lifecycle.begin(ctx, &local);

        info!("Listening on {} {}", protocol, local);
        self.hooks
            .server_info(&format!("starting listening on {} {}", protocol, local));

        let remote = SocketAddress::unspecified(protocol);
        self.hooks.info(&local, &remote, ConnState::New);

        let context = DatagramContext::new(
            Arc::clone(&slot),
            protocol,
            local.clone(),
            self.buffer_size,
            token.clone(),
        );
        let task = tokio::spawn(handler(Box::new(context)));

        let hooks = Arc::clone(&self.hooks);
        let watched = local.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = task.await {
                let msg = panic_message(e);
                error!("Datagram handler on {} panicked: {}", watched, msg);
                hooks.error(&Error::Handler(msg));
            }
            hooks.info(&watched, &remote, ConnState::Close);
        });

        token.cancelled().await;

        if let Some(socket) = slot.swap(None) {
            release(socket, &local).await;
        }
        info!("Stopped listening on {} {}", protocol, local);
        self.hooks
            .server_info(&format!("stopped listening on {} {}", protocol, local));
        Ok(())
    }
}

/// Wait for an in-flight read or write to let go of the socket, then close it
async fn release<D>(mut socket: Arc<D>, local: &SocketAddress) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_TIMEOUT;
    loop {
        match Arc::try_unwrap(socket) {
            Ok(socket) => {
                drop(socket);
                debug!("Released datagram socket {}", local);
                return;
            }
            Err(shared) if tokio::time::Instant::now() >= deadline => {
                warn!("Datagram socket {} still in use, leaving it to the handler", local);
                drop(shared);
                return;
            }
            Err(shared) => {
                socket = shared;
                tokio::time::sleep(SHUTDOWN_TICK).await;
            }
        }
    }
}

#[async_trait]
impl<T: DatagramTransport> Server for DatagramServer<T> {
    fn register_server(&self, address: &str) -> Result<()> {
        self.transport.validate(address)?;

        let mut endpoint = Endpoint::new(address);
        if self.transport.protocol().is_unix() {
            endpoint = endpoint.with_permissions(UnixPermissions::default());
        }
        self.endpoint.store(Some(Arc::new(endpoint)));
        Ok(())
    }

    fn register_socket(&self, path: &str, permissions: u32, group: Option<i32>) -> Result<()> {
        if !self.transport.protocol().is_unix() {
            return Err(Error::InvalidProtocol(format!(
                "{} does not use socket files",
                self.transport.protocol()
            )));
        }

        let permissions = UnixPermissions::new(permissions, group)?;
        self.transport.validate(path)?;
        self.endpoint
            .store(Some(Arc::new(Endpoint::new(path).with_permissions(permissions))));
        Ok(())
    }

    fn register_func_error(&self, f: Option<FuncError>) {
        self.hooks.set_error(f);
    }

    fn register_func_info(&self, f: Option<FuncInfo>) {
        self.hooks.set_info(f);
    }

    fn register_func_info_server(&self, f: Option<FuncInfoSrv>) {
        self.hooks.set_server_info(f);
    }

    async fn listen(&self, ctx: &CancellationToken) -> Result<()> {
        let _guard = self.lifecycle.guard();

        let result = self.serve(ctx).await;
        if let Err(e) = &result {
            self.hooks.error(e);
        }
        result
    }

    async fn shutdown(&self, ctx: &CancellationToken) -> Result<()> {
        self.lifecycle.shutdown(ctx).await
    }

    fn is_running(&self) -> bool {
        self.lifecycle.state.is_running()
    }

    fn is_gone(&self) -> bool {
        self.lifecycle.state.is_gone()
    }

    fn open_connections(&self) -> i64 {
        self.lifecycle.state.open_connections()
    }

    fn local_addr(&self) -> Option<SocketAddress> {
        self.lifecycle.local_addr()
    }
}
