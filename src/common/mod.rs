//! Common types and abstractions
//!
//! - NetworkProtocol: the protocol descriptor
//! - SocketAddress: endpoint representation for IP and unix sockets
//! - ConnState / ServerState: lifecycle states
//! - Hooks: observability callbacks
//! - Stream: unified async I/O abstraction

mod address;
mod hooks;
mod protocol;
mod state;
mod stream;

pub use address::{lookup_inet, resolve_inet, validate, validate_unix_path, SocketAddress};
pub use hooks::{FuncError, FuncInfo, FuncInfoSrv, Hooks, UpdateConn};
pub use protocol::NetworkProtocol;
pub use state::{ConnState, ServerState};
pub use stream::{AsyncReadWrite, Stream};

pub(crate) use state::{ConnectionGuard, ShutdownSignal};

// Re-export error types from crate root
pub use crate::error::{Error, Result};

/// Default buffer size for datagram reads (32KB)
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Highest group id accepted for unix socket ownership
pub const MAX_GID: i32 = 32767;
