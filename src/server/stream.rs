//! Stream server core (tcp, unix)
//!
//! Accept loop with one task per connection. The task performs the optional
//! TLS handshake, then runs the handler on a nested task so a panicking
//! handler is reported and still releases its connection slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::common::{
    ConnState, Error, FuncError, FuncInfo, FuncInfoSrv, Hooks, Result, SocketAddress, Stream,
    UpdateConn,
};
use crate::context::{Handler, StreamContext};
use crate::transport::{
    build_acceptor, Endpoint, TcpTransport, TlsAcceptor, TlsConfig, Transport, UnixPermissions,
};

use super::{panic_message, Lifecycle, Server, ACCEPT_BACKOFF};

/// Connection-oriented server over any stream `Transport`
pub struct StreamServer<T: Transport> {
    transport: T,
    endpoint: ArcSwapOption<Endpoint>,
    handler: Option<Handler>,
    update: Option<UpdateConn>,
    hooks: Arc<Hooks>,
    lifecycle: Lifecycle,
    tls: ArcSwapOption<TlsAcceptor>,
    idle_ms: AtomicU64,
}

impl<T: Transport> StreamServer<T> {
    pub fn new(transport: T, update: Option<UpdateConn>, handler: Option<Handler>) -> Self {
        Self {
            transport,
            endpoint: ArcSwapOption::empty(),
            handler,
            update,
            hooks: Hooks::new(),
            lifecycle: Lifecycle::default(),
            tls: ArcSwapOption::empty(),
            idle_ms: AtomicU64::new(0),
        }
    }

    /// Close connections idle for `timeout`; under one second disables it
    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.idle_ms
            .store(timeout.as_millis().min(u64::MAX as u128) as u64, Ordering::Relaxed);
    }

    fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    async fn serve(&self, ctx: &CancellationToken) -> Result<()> {
        let endpoint = self
            .endpoint
            .load_full()
            .ok_or_else(|| Error::InvalidAddress("no address registered".into()))?;
        let handler = self.handler.clone().ok_or(Error::InvalidHandler)?;

        let listener = self.transport.bind(&endpoint).await?;
        if let Some(update) = &self.update {
            update(listener.socket());
        }

        let local = listener.local_addr()?;
        let token = self.lifecycle.begin(ctx, &local);

        info!("Listening on {} {}", self.transport.protocol(), local);
        self.hooks.server_info(&format!(
            "starting listening on {} {}",
            self.transport.protocol(),
            local
        ));

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => self.dispatch(stream, &local, remote, &handler, &token),
                    Err(e) => {
                        self.hooks.error(&Error::Io(e));
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        info!("Stopped listening on {} {}", self.transport.protocol(), local);
        self.hooks.server_info(&format!(
            "stopped listening on {} {}",
            self.transport.protocol(),
            local
        ));
        Ok(())
    }

    fn dispatch(
        &self,
        stream: Stream,
        local: &SocketAddress,
        remote: SocketAddress,
        handler: &Handler,
        token: &CancellationToken,
    ) {
        let guard = self.lifecycle.state.track();
        let hooks = Arc::clone(&self.hooks);
        let handler = Arc::clone(handler);
        let token = token.clone();
        let acceptor = self.tls.load_full();
        let idle = self.idle_timeout();
        let local = local.clone();

        hooks.info(&local, &remote, ConnState::New);

        tokio::spawn(async move {
            let _guard = guard;

            let stream: Stream = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls) => Box::new(tls),
                    Err(e) => {
                        hooks.error(&Error::Tls(format!("handshake with {} failed: {}", remote, e)));
                        hooks.info(&local, &remote, ConnState::Close);
                        return;
                    }
                },
                None => stream,
            };

            let ctx = StreamContext::new(stream, local.clone(), remote.clone(), token)
                .with_idle_timeout(idle);

            if let Err(e) = tokio::spawn(handler(Box::new(ctx))).await {
                let msg = panic_message(e);
                error!("Handler for {} panicked: {}", remote, msg);
                hooks.error(&Error::Handler(msg));
            }

            hooks.info(&local, &remote, ConnState::Close);
        });
    }
}

impl StreamServer<TcpTransport> {
    /// Require a TLS handshake on every accepted connection.
    ///
    /// Disabling drops the acceptor; connections already accepted keep theirs.
    pub fn set_tls(&self, enable: bool, config: &TlsConfig) -> Result<()> {
        if !enable {
            self.tls.store(None);
            return Ok(());
        }

        let acceptor = build_acceptor(config)?;
        self.tls.store(Some(Arc::new(acceptor)));
        Ok(())
    }

    pub fn is_tls(&self) -> bool {
        self.tls.load().is_some()
    }
}

#[async_trait]
impl<T: Transport> Server for StreamServer<T> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::echo;

    #[tokio::test]
    async fn test_listen_without_address() {
        let server = StreamServer::new(TcpTransport::default(), None, Some(echo()));
        let result = server.listen(&CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::InvalidAddress(_))));
        assert!(!server.is_running());
        assert!(server.is_gone());
    }

    #[tokio::test]
    async fn test_listen_without_handler() {
        let server = StreamServer::new(TcpTransport::default(), None, None);
        server.register_server("127.0.0.1:0").unwrap();
        let result = server.listen(&CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::InvalidHandler)));
    }

    #[tokio::test]
    async fn test_update_called_with_bound_socket() {
        let seen = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&seen);
        let update: UpdateConn = Arc::new(move |sock: socket2::SockRef<'_>| {
            if let Ok(addr) = sock.local_addr() {
                if let Some(a) = addr.as_socket() {
                    s.store(a.port() as u64, Ordering::SeqCst);
                }
            }
        });

        let server = Arc::new(StreamServer::new(TcpTransport::default(), Some(update), Some(echo())));
        server.register_server("127.0.0.1:0").unwrap();

        let token = CancellationToken::new();
        let srv = Arc::clone(&server);
        let ctx = token.clone();
        let task = tokio::spawn(async move { srv.listen(&ctx).await });

        while server.local_addr().is_none() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let port = server.local_addr().unwrap().port();
        assert_eq!(seen.load(Ordering::SeqCst), port as u64);

        token.cancel();
        task.await.unwrap().unwrap();
        assert!(server.is_gone());
    }

    #[test]
    fn test_set_tls_requires_pair() {
        let server = StreamServer::new(TcpTransport::default(), None, Some(echo()));
        assert!(matches!(
            server.set_tls(true, &TlsConfig::default()),
            Err(Error::InvalidTls(_))
        ));
        assert!(!server.is_tls());
        server.set_tls(false, &TlsConfig::default()).unwrap();
    }

    #[test]
    fn test_idle_timeout_setting() {
        let server = StreamServer::new(TcpTransport::default(), None, Some(echo()));
        assert!(server.idle_timeout().is_none());
        server.set_idle_timeout(Duration::from_secs(30));
        assert_eq!(server.idle_timeout(), Some(Duration::from_secs(30)));
    }
}
