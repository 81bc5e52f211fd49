//! Context over the shared socket of a datagram server
//!
//! A received datagram is buffered whole; reads drain it in order before the
//! next datagram is received, so a short read buffer never truncates input.
//! The sender of the buffered datagram is the target of every `write`.
//!
//! The socket is reached through a [`SocketSlot`] owned by the server. Once
//! the server clears the slot every read and write fails with
//! `ConnectionClosed`, even from a handler that outlives its `listen`.

use std::io;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::BytesMut;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, NetworkProtocol, Result, SocketAddress, DEFAULT_BUFFER_SIZE};
use crate::transport::DatagramSocket;

use super::Context;

/// Socket handle shared between a datagram server and its context
pub type SocketSlot<D> = Arc<ArcSwapOption<D>>;

/// Datagram context; the socket stays owned by the server
pub struct DatagramContext<D> {
    socket: SocketSlot<D>,
    protocol: NetworkProtocol,
    local: SocketAddress,
    remote: Option<SocketAddress>,
    read_buf: BytesMut,
    read_pos: usize,
    read_len: usize,
    closed: bool,
    token: CancellationToken,
}

impl<D: DatagramSocket> DatagramContext<D> {
    /// `buffer_size` bounds one datagram; 0 selects the default
    pub fn new(
        socket: SocketSlot<D>,
        protocol: NetworkProtocol,
        local: SocketAddress,
        buffer_size: usize,
        token: CancellationToken,
    ) -> Self {
        let size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };

        Self {
            socket,
            protocol,
            local,
            remote: None,
            read_buf: BytesMut::zeroed(size),
            read_pos: 0,
            read_len: 0,
            closed: false,
            token,
        }
    }

    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let available = self.read_len - self.read_pos;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.read_buf[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        n
    }

    /// Current socket, or `None` once the server released it
    fn socket(&self) -> Option<Arc<D>> {
        self.socket.load_full()
    }
}

#[async_trait]
impl<D: DatagramSocket> Context for DatagramContext<D> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        if self.read_pos < self.read_len {
            return Ok(self.drain_into(buf));
        }

        let Some(socket) = self.socket() else {
            self.close().await?;
            return Err(Error::ConnectionClosed);
        };
        let received = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            r = socket.recv_from(&mut self.read_buf[..]) => Some(r),
        };

        match received {
            None => {
                self.close().await?;
                Err(Error::ConnectionClosed)
            }
            Some(Err(e)) => Err(e.into()),
            Some(Ok((n, peer))) => {
                self.remote = Some(peer);
                self.read_pos = 0;
                self.read_len = n;
                Ok(self.drain_into(buf))
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let Some(peer) = self.remote.clone() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no datagram received yet").into());
        };
        let Some(socket) = self.socket() else {
            self.close().await?;
            return Err(Error::ConnectionClosed);
        };

        let sent = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            r = socket.send_to(buf, &peer) => Some(r),
        };

        match sent {
            None => {
                self.close().await?;
                Err(Error::ConnectionClosed)
            }
            Some(r) => Ok(r?),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.read_pos = 0;
        self.read_len = 0;
        Ok(())
    }

    fn local_addr(&self) -> SocketAddress {
        self.local.clone()
    }

    fn remote_addr(&self) -> SocketAddress {
        self.remote
            .clone()
            .unwrap_or_else(|| SocketAddress::unspecified(self.protocol))
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}
