//! Connection Context
//!
//! The transport-agnostic handle a Handler receives:
//! - `StreamContext`: one accepted stream connection, owned by its task
//! - `DatagramContext`: the shared socket of a datagram server; `read`
//!   records the sender and `write` replies to it
//!
//! Both observe the server's cancellation token: once it fires, a pending or
//! new `read` returns `Error::ConnectionClosed` and closes the context.

mod datagram;
mod stream;

pub use datagram::{DatagramContext, SocketSlot};
pub use stream::StreamContext;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::{Result, SocketAddress};

/// Byte-oriented handle over one communication channel
#[async_trait]
pub trait Context: Send {
    /// Read into `buf`; `Ok(0)` means the peer finished sending
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf`
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the channel; closing twice is not an error
    async fn close(&mut self) -> Result<()>;

    fn local_addr(&self) -> SocketAddress;

    /// Peer address; for datagram contexts the most recent sender
    fn remote_addr(&self) -> SocketAddress;

    fn is_connected(&self) -> bool;

    /// Token cancelled when the owning server stops
    fn token(&self) -> &CancellationToken;
}

/// Boxed context handed to handlers
pub type BoxContext = Box<dyn Context>;

/// Boxed future returned by handlers
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Called once per accepted connection, or once per datagram server run
pub type Handler = Arc<dyn Fn(BoxContext) -> BoxFuture<()> + Send + Sync>;

/// Wrap an async closure into a `Handler`
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(BoxContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx: BoxContext| -> BoxFuture<()> { Box::pin(f(ctx)) })
}

/// Echo every received chunk back to the sender until the peer stops
pub fn echo() -> Handler {
    handler(|mut ctx| async move {
        let mut buf = vec![0u8; crate::common::DEFAULT_BUFFER_SIZE];
        loop {
            let n = match ctx.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if ctx.write(&buf[..n]).await.is_err() {
                break;
            }
        }
        let _ = ctx.close().await;
    })
}
