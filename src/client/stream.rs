//! Stream client core (tcp, unix)
//!
//! The connection is split so a reader and a writer may run concurrently.
//! Each half sits behind its own async mutex.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::common::{ConnState, Error, FuncError, FuncInfo, Hooks, Result, SocketAddress, Stream};
use crate::transport::{build_connector, TlsConfig, TlsConnectorConfig, Transport};

use super::{cancellable, target, Client, Response};

/// Addresses of the current connection
#[derive(Debug, Clone)]
struct Session {
    local: SocketAddress,
    remote: SocketAddress,
}

/// Connection-oriented client over any stream `Transport`
pub struct StreamClient<T: Transport> {
    transport: T,
    address: String,
    target: SocketAddress,
    reader: Mutex<Option<ReadHalf<Stream>>>,
    writer: Mutex<Option<WriteHalf<Stream>>>,
    session: ArcSwapOption<Session>,
    connected: AtomicBool,
    tls: ArcSwapOption<TlsConnectorConfig>,
    hooks: Arc<Hooks>,
}

impl<T: Transport> StreamClient<T> {
    pub fn new(transport: T, address: &str) -> Result<Self> {
        let target = target(transport.protocol(), address)?;

        Ok(Self {
            transport,
            address: address.to_string(),
            target,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            session: ArcSwapOption::empty(),
            connected: AtomicBool::new(false),
            tls: ArcSwapOption::empty(),
            hooks: Hooks::new(),
        })
    }

    async fn dial(&self) -> Result<(Stream, Session)> {
        let dialed = self.transport.connect(&self.address).await?;
        let session = Session {
            local: dialed.local,
            remote: dialed.remote,
        };

        let stream = match self.tls.load_full() {
            Some(tls) => tls.connect(dialed.stream).await?,
            None => dialed.stream,
        };
        Ok((stream, session))
    }

    /// Drop both halves of the current connection, shutting down the write side
    async fn release(&self) {
        if let Some(mut w) = self.writer.lock().await.take() {
            if let Err(e) = w.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.target, e);
            }
        }
        // a reader blocked on the old connection keeps its half until it returns
        if let Ok(mut r) = self.reader.try_lock() {
            r.take();
        }
    }

    fn report<V>(&self, result: Result<V>) -> Result<V> {
        if let Err(e) = &result {
            self.hooks.error(e);
        }
        result
    }

    async fn exchange(&self, ctx: &CancellationToken, request: &[u8]) -> Result<Vec<u8>> {
        if !self.is_connected() {
            self.connect(ctx).await?;
        }

        cancellable(ctx, self.write(request)).await?;

        if let Some(w) = self.writer.lock().await.as_mut() {
            w.shutdown().await?;
        }

        let mut data = Vec::new();
        let mut reader = self.reader.lock().await;
        let r = reader.as_mut().ok_or(Error::Connection)?;
        cancellable(ctx, async { Ok::<_, Error>(r.read_to_end(&mut data).await?) }).await?;
        Ok(data)
    }
}

#[async_trait]
impl<T: Transport> Client for StreamClient<T> {
    async fn connect(&self, ctx: &CancellationToken) -> Result<()> {
        let unspecified = SocketAddress::unspecified(self.transport.protocol());
        self.hooks.info(&unspecified, &self.target, ConnState::Dial);

        let (stream, session) = self.report(cancellable(ctx, self.dial()).await)?;
        let (r, w) = tokio::io::split(stream);

        if self.connected.swap(false, Ordering::SeqCst) {
            self.release().await;
            if let Some(old) = self.session.load_full() {
                self.hooks.info(&old.local, &old.remote, ConnState::Close);
            }
        }

        *self.writer.lock().await = Some(w);
        *self.reader.lock().await = Some(r);
        self.hooks.info(&session.local, &session.remote, ConnState::New);
        self.session.store(Some(Arc::new(session)));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::Connection);
        }

        let mut reader = self.reader.lock().await;
        let r = reader.as_mut().ok_or(Error::Connection)?;
        let result = r.read(buf).await.map_err(Error::from);
        self.report(result)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::Connection);
        }

        let mut writer = self.writer.lock().await;
        let w = writer.as_mut().ok_or(Error::Connection)?;
        let result = async {
            w.write_all(buf).await?;
            w.flush().await?;
            Ok::<_, Error>(buf.len())
        }
        .await;
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

        self.release().await;
        if let Some(session) = self.session.swap(None) {
            self.hooks.info(&session.local, &session.remote, ConnState::Close);
        }
        Ok(())
    }

    fn set_tls(&self, enable: bool, config: &TlsConfig, server_name: &str) -> Result<()> {
        if !enable {
            self.tls.store(None);
            return Ok(());
        }

        let connector = build_connector(config, server_name)?;
        self.tls.store(Some(Arc::new(connector)));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TcpTransport;

    #[tokio::test]
    async fn test_io_requires_connection() {
        let client = StreamClient::new(TcpTransport::default(), "127.0.0.1:9").unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(client.read(&mut buf).await, Err(Error::Connection)));
        assert!(matches!(client.write(b"x").await, Err(Error::Connection)));
        assert!(matches!(client.close().await, Err(Error::Connection)));
    }

    #[tokio::test]
    async fn test_refused_connect_reported() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let client = StreamClient::new(TcpTransport::default(), &format!("127.0.0.1:{}", port)).unwrap();

        let errors = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        client.register_func_error(Some(Arc::new(move |_: &Error| {
            e.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(client.connect(&CancellationToken::new()).await.is_err());
        assert!(!client.is_connected());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StreamClient::new(TcpTransport::default(), &addr.to_string()).unwrap();
        let ctx = CancellationToken::new();

        client.connect(&ctx).await.unwrap();
        let (mut first, _) = listener.accept().await.unwrap();
        client.connect(&ctx).await.unwrap();
        let (mut second, _) = listener.accept().await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(first.read(&mut buf).await.unwrap(), 0);

        client.write(b"new").await.unwrap();
        let n = second.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"new");
    }
}
