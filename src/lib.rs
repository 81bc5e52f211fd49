//! Netsock - one server/client interface over TCP, UDP and Unix sockets
//!
//! # Architecture
//!
//! ```text
//! Server / Client      lifecycle, dispatch, observability hooks
//! → Context            byte handle given to handlers
//! → Transport          socket establishment (tcp, udp, unix, unixgram, TLS)
//! ```
//!
//! ## Core Principles
//!
//! - Stream and datagram transports get separate cores behind one trait
//! - Shared mutable state is atomic (`ServerState`), callbacks are swappable slots
//! - Cancellation is a `CancellationToken`; stopping is never an error
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # NetworkProtocol, SocketAddress, ServerState, Hooks, Stream
//! ├── transport/       # tcp, udp, unix, unixgram, TLS material
//! ├── context/         # Context trait, stream and datagram contexts
//! ├── server/          # Server trait, stream and datagram cores
//! └── client/          # Client trait, stream and datagram cores
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod transport;
pub mod context;
pub mod server;
pub mod client;

// Supporting modules
pub mod config;

// Re-exports for convenience
pub use common::{ConnState, NetworkProtocol, ServerState, SocketAddress, Stream};
pub use error::{Error, Result};
pub use config::Config;

pub use client::Client;
pub use context::{handler, BoxContext, Context, Handler};
pub use server::Server;
pub use tokio_util::sync::CancellationToken;
