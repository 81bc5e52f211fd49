//! Context over one accepted stream connection

use std::future::Future;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::common::{Error, Result, SocketAddress, Stream};

use super::Context;

/// Shortest idle timeout honoured; anything below disables it
const MIN_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Stream connection context, exclusively owned by the connection task
pub struct StreamContext {
    stream: Option<Stream>,
    local: SocketAddress,
    remote: SocketAddress,
    idle: Option<Duration>,
    token: CancellationToken,
}

impl StreamContext {
    pub fn new(
        stream: Stream,
        local: SocketAddress,
        remote: SocketAddress,
        token: CancellationToken,
    ) -> Self {
        Self {
            stream: Some(stream),
            local,
            remote,
            idle: None,
            token,
        }
    }

    /// Fail reads and writes that make no progress for `idle`
    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle = idle.filter(|d| *d >= MIN_IDLE_TIMEOUT);
        self
    }

    fn must_close(err: &Error) -> bool {
        match err {
            Error::ConnectionClosed => true,
            Error::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

#[async_trait]
impl Context for StreamContext {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::ConnectionClosed);
        };

        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::ConnectionClosed),
            r = with_idle(self.idle, stream.read(buf)) => r,
        };

        if let Err(e) = &result {
            if Self::must_close(e) {
                let _ = self.close().await;
            }
        }
        result
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::ConnectionClosed);
        };

        let result = with_idle(self.idle, async {
            stream.write_all(buf).await?;
            stream.flush().await?;
            Ok::<_, io::Error>(buf.len())
        })
        .await;

        if let Err(e) = &result {
            if Self::must_close(e) {
                let _ = self.close().await;
            }
        }
        result
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            // peer may already be gone
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.remote, e);
            }
        }
        Ok(())
    }

    fn local_addr(&self) -> SocketAddress {
        self.local.clone()
    }

    fn remote_addr(&self) -> SocketAddress {
        self.remote.clone()
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

async fn with_idle<F>(idle: Option<Duration>, op: F) -> Result<usize>
where
    F: Future<Output = io::Result<usize>>,
{
    match idle {
        Some(limit) => match tokio::time::timeout(limit, op).await {
            Ok(r) => Ok(r?),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connection idle timeout").into()),
        },
        None => Ok(op.await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr(s: &str) -> SocketAddress {
        SocketAddress::Inet(s.parse::<SocketAddr>().unwrap())
    }

    fn pair(token: CancellationToken) -> (StreamContext, tokio::io::DuplexStream) {
        let (a, b) = tokio::io::duplex(64);
        let ctx = StreamContext::new(
            Box::new(a),
            addr("127.0.0.1:1000"),
            addr("127.0.0.1:2000"),
            token,
        );
        (ctx, b)
    }

    #[tokio::test]
    async fn test_read_write_delegate() {
        let (mut ctx, mut peer) = pair(CancellationToken::new());

        peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(ctx.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"ping");

        assert_eq!(ctx.write(b"pong").await.unwrap(), 4);
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        assert_eq!(ctx.remote_addr(), addr("127.0.0.1:2000"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut ctx, mut peer) = pair(CancellationToken::new());
        assert!(ctx.is_connected());

        ctx.close().await.unwrap();
        ctx.close().await.unwrap();
        assert!(!ctx.is_connected());
        assert!(matches!(ctx.write(b"x").await, Err(Error::ConnectionClosed)));

        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_read() {
        let token = CancellationToken::new();
        let (mut ctx, _peer) = pair(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let mut buf = [0u8; 8];
        assert!(matches!(ctx.read(&mut buf).await, Err(Error::ConnectionClosed)));
        assert!(!ctx.is_connected());
        canceller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes() {
        let (ctx, _peer) = pair(CancellationToken::new());
        let mut ctx = ctx.with_idle_timeout(Some(Duration::from_secs(2)));

        let mut buf = [0u8; 8];
        match ctx.read(&mut buf).await {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!ctx.is_connected());
    }

    #[test]
    fn test_short_idle_disabled() {
        let (a, _b) = tokio::io::duplex(8);
        let ctx = StreamContext::new(
            Box::new(a),
            SocketAddress::Unix(None),
            SocketAddress::Unix(None),
            CancellationToken::new(),
        )
        .with_idle_timeout(Some(Duration::from_millis(500)));
        assert!(ctx.idle.is_none());
    }
}
