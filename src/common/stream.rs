//! Stream abstraction
//!
//! Unified byte stream type for accepted and dialed connections, plain or
//! TLS-wrapped.

use tokio::io::{AsyncRead, AsyncWrite};

/// The boxed stream every stream transport hands out.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
