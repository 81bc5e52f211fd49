//! Datagram client core (udp, unixgram)
//!
//! "Connecting" binds a local endpoint and fixes the default peer; it does
//! not fail because nothing listens on the other side.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::{
    ConnState, Error, FuncError, FuncInfo, Hooks, Result, SocketAddress, DEFAULT_BUFFER_SIZE,
};
use crate::transport::{DatagramSocket, DatagramTransport, TlsConfig};

use super::{cancellable, target, Client, Response};

/// Connectionless client over any `DatagramTransport`
pub struct DatagramClient<T: DatagramTransport> {
    transport: T,
    address: String,
    target: SocketAddress,
    socket: ArcSwapOption<T::Socket>,
    connected: AtomicBool,
    hooks: Arc<Hooks>,
}

impl<T: DatagramTransport> DatagramClient<T> {
    pub fn new(transport: T, address: &str) -> Result<Self> {
        let target = target(transport.protocol(), address)?;

        Ok(Self {
            transport,
            address: address.to_string(),
            target,
            socket: ArcSwapOption::empty(),
            connected: AtomicBool::new(false),
            hooks: Hooks::new(),
        })
    }

    fn current(&self) -> Result<Arc<T::Socket>> {
        if !self.is_connected() {
            return Err(Error::Connection);
        }
        self.socket.load_full().ok_or(Error::Connection)
    }

    fn report<V>(&self, result: Result<V>) -> Result<V> {
        if let Err(e) = &result {
            self.hooks.error(e);
        }
        result
    }

    fn local(&self, socket: &T::Socket) -> SocketAddress {
        socket
            .local_addr()
            .unwrap_or_else(|_| SocketAddress::unspecified(self.transport.protocol()))
    }

    async fn exchange(&self, ctx: &CancellationToken, request: &[u8]) -> Result<Vec<u8>> {
        if !self.is_connected() {
            self.connect(ctx).await?;
        }

        cancellable(ctx, self.write(request)).await?;

        let mut data = vec![0u8; DEFAULT_BUFFER_SIZE];
        let n = cancellable(ctx, self.read(&mut data)).await?;
        data.truncate(n);
        Ok(data)
    }
}

#[async_trait]
impl<T: DatagramTransport> Client for DatagramClient<T> {
    async fn connect(&self, ctx: &CancellationToken) -> Result<()> {
        let unspecified = SocketAddress::unspecified(self.transport.protocol());
        self.hooks.info(&unspecified, &self.target, ConnState::Dial);

        let socket = self.report(cancellable(ctx, self.transport.connect(&self.address)).await)?;
        let local = self.local(&socket);

        if let Some(old) = self.socket.swap(Some(Arc::new(socket))) {
            if self.connected.load(Ordering::SeqCst) {
                let old_local = self.local(&old);
                self.hooks.info(&old_local, &self.target, ConnState::Close);
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        self.hooks.info(&local, &self.target, ConnState::New);
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let socket = self.current()?;
        let result = socket.recv(buf).await.map_err(Error::from);
        self.report(result)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        let socket = self.current()?;
        let result = socket.send(buf).await.map_err(Error::from);
        self.report(result)
    }

    async fn once(&self, ctx: &CancellationToken, request: &[u8], response: Response) -> Result<()> {
        let result = self.exchange(ctx, request).await;
        if self.is_connected() {
            let _ = self.close().await;
        }

        let data = result?;
        response(&mut Cursor::new(data));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(Error::Connection);
        }

        if let Some(socket) = self.socket.swap(None) {
            let local = self.local(&socket);
            self.hooks.info(&local, &self.target, ConnState::Close);
        }
        Ok(())
    }

    fn set_tls(&self, _enable: bool, _config: &TlsConfig, _server_name: &str) -> Result<()> {
        Ok(())
    }

    fn register_func_error(&self, f: Option<FuncError>) {
        self.hooks.set_error(f);
    }

    fn register_func_info(&self, f: Option<FuncInfo>) {
        self.hooks.set_info(f);
    }

    fn remote_addr(&self) -> SocketAddress {
        self.target.clone()
    }
}
