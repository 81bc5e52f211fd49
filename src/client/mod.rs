//! Client Core
//!
//! One outbound socket per client:
//! - `StreamClient`: real connection, optional TLS (tcp, unix)
//! - `DatagramClient`: bound ephemeral endpoint with a default peer (udp, unixgram)
//!
//! `new` picks the core from a `NetworkProtocol`.

mod datagram;
mod stream;

pub use datagram::DatagramClient;
pub use stream::StreamClient;

use std::io;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::{
    resolve_inet, validate_unix_path, Error, FuncError, FuncInfo, NetworkProtocol, Result,
    SocketAddress,
};
use crate::transport::{TcpTransport, TlsConfig, UdpTransport};
#[cfg(unix)]
use crate::transport::{UnixGramTransport, UnixTransport};

/// Consumer of a `once` response, positioned at its first byte
pub type Response = Box<dyn FnOnce(&mut dyn io::Read) + Send>;

pub type TcpClient = StreamClient<TcpTransport>;
pub type UdpClient = DatagramClient<UdpTransport>;
#[cfg(unix)]
pub type UnixClient = StreamClient<UnixTransport>;
#[cfg(unix)]
pub type UnixGramClient = DatagramClient<UnixGramTransport>;

/// Socket client lifecycle shared by every transport
#[async_trait]
pub trait Client: Send + Sync {
    /// Dial the target; an existing connection is replaced
    async fn connect(&self, ctx: &CancellationToken) -> Result<()>;

    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    async fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Send `request`, hand the response to `response`, then close
    async fn once(&self, ctx: &CancellationToken, request: &[u8], response: Response) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Fails with `Error::Connection` when not connected
    async fn close(&self) -> Result<()>;

    /// Negotiate TLS on the next `connect`; accepted and ignored by datagram clients
    fn set_tls(&self, enable: bool, config: &TlsConfig, server_name: &str) -> Result<()>;

    fn register_func_error(&self, f: Option<FuncError>);

    fn register_func_info(&self, f: Option<FuncInfo>);

    /// Dial target
    fn remote_addr(&self) -> SocketAddress;
}

/// Build a client for `protocol`, validating `address` immediately
pub fn new(protocol: NetworkProtocol, address: &str) -> Result<Box<dyn Client>> {
    use NetworkProtocol::*;

    let client: Box<dyn Client> = match protocol {
        Tcp | Tcp4 | Tcp6 => Box::new(StreamClient::new(TcpTransport::new(protocol)?, address)?),
        Udp | Udp4 | Udp6 => Box::new(DatagramClient::new(UdpTransport::new(protocol)?, address)?),
        #[cfg(unix)]
        Unix => Box::new(StreamClient::new(UnixTransport, address)?),
        #[cfg(unix)]
        UnixGram => Box::new(DatagramClient::new(UnixGramTransport, address)?),
        #[cfg(not(unix))]
        other => {
            return Err(Error::InvalidProtocol(format!("{} is not supported on this platform", other)))
        }
    };

    Ok(client)
}

/// Resolve the dial target once, at construction
pub(crate) fn target(protocol: NetworkProtocol, address: &str) -> Result<SocketAddress> {
    if protocol.is_unix() {
        Ok(SocketAddress::unix(validate_unix_path(address)?))
    } else {
        Ok(SocketAddress::Inet(resolve_inet(protocol, address)?))
    }
}

/// Race `fut` against `ctx`
pub(crate) async fn cancellable<F, T>(ctx: &CancellationToken, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(Error::Cancelled),
        r = fut => r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_address() {
        assert!(matches!(new(NetworkProtocol::Tcp, ""), Err(Error::InvalidAddress(_))));
        assert!(matches!(new(NetworkProtocol::Udp, "nope"), Err(Error::InvalidAddress(_))));
        assert!(new(NetworkProtocol::Tcp, "127.0.0.1:80").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_new_unix_targets() {
        let client = new(NetworkProtocol::UnixGram, "/tmp/netsock-target.sock").unwrap();
        assert_eq!(client.remote_addr(), SocketAddress::unix("/tmp/netsock-target.sock"));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancel() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let r: Result<()> = cancellable(&ctx, std::future::pending()).await;
        assert!(matches!(r, Err(Error::Cancelled)));
    }
}
