//! Observability callbacks
//!
//! Each slot holds at most one callback: registering replaces the previous
//! one and `None` disables the hook. Callers wanting several observers compose
//! them before registering. A panicking callback is logged and swallowed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use socket2::SockRef;
use tracing::{debug, error, warn};

use super::address::SocketAddress;
use super::state::ConnState;
use crate::error::Error;

/// Error callback
pub type FuncError = Arc<dyn Fn(&Error) + Send + Sync>;

/// Connection state callback: (local, remote, state)
pub type FuncInfo = Arc<dyn Fn(&SocketAddress, &SocketAddress, ConnState) + Send + Sync>;

/// Server lifecycle message callback
pub type FuncInfoSrv = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked once with the freshly bound socket for low-level tuning
pub type UpdateConn = Arc<dyn Fn(SockRef<'_>) + Send + Sync>;

/// Callback slots shared by servers, clients and their connection tasks
#[derive(Default)]
pub struct Hooks {
    error: ArcSwapOption<FuncError>,
    info: ArcSwapOption<FuncInfo>,
    server: ArcSwapOption<FuncInfoSrv>,
}

impl Hooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_error(&self, f: Option<FuncError>) {
        self.error.store(f.map(Arc::new));
    }

    pub fn set_info(&self, f: Option<FuncInfo>) {
        self.info.store(f.map(Arc::new));
    }

    pub fn set_server_info(&self, f: Option<FuncInfoSrv>) {
        self.server.store(f.map(Arc::new));
    }

    /// Report an error to tracing and the error callback
    pub fn error(&self, err: &Error) {
        warn!("{}", err);

        if let Some(f) = self.error.load_full() {
            if catch_unwind(AssertUnwindSafe(|| f(err))).is_err() {
                error!("Error callback panicked while reporting: {}", err);
            }
        }
    }

    /// Report a connection state change
    pub fn info(&self, local: &SocketAddress, remote: &SocketAddress, state: ConnState) {
        debug!("{} [local: {}, remote: {}]", state, local, remote);

        if let Some(f) = self.info.load_full() {
            if catch_unwind(AssertUnwindSafe(|| f(local, remote, state))).is_err() {
                error!("Info callback panicked on {}", state);
            }
        }
    }

    /// Report a server lifecycle message
    pub fn server_info(&self, msg: &str) {
        debug!("{}", msg);

        if let Some(f) = self.server.load_full() {
            if catch_unwind(AssertUnwindSafe(|| f(msg))).is_err() {
                error!("Server info callback panicked on: {}", msg);
            }
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("error", &self.error.load().is_some())
            .field("info", &self.info.load().is_some())
            .field("server", &self.server.load().is_some())
            .finish()
    }
}
