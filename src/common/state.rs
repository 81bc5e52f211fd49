//! Connection and server lifecycle state
//!
//! `ServerState` is the only mutable state shared between the accept loop,
//! the connection tasks and callers. Everything is atomic; no mutex.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio_util::sync::CancellationToken;

/// Connection state transitions reported to the info callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    /// A client is dialing its target
    Dial,
    /// A connection is established (accepted or dialed)
    New,
    /// A connection is closed
    Close,
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnState::Dial => write!(f, "Dial Connection"),
            ConnState::New => write!(f, "New Connection"),
            ConnState::Close => write!(f, "Close Connection"),
        }
    }
}

/// Server lifecycle flags and open-connection counter.
///
/// `running` and `gone` are independent: Idle is (false, false), Listening is
/// (true, false), Closed is (false, true). Draining is the window where the
/// derived token is cancelled but `running` is still set.
#[derive(Debug, Default)]
pub struct ServerState {
    running: AtomicBool,
    gone: AtomicBool,
    open: AtomicI64,
}

impl ServerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_gone(&self) -> bool {
        self.gone.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> i64 {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn start(&self) {
        self.gone.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.gone.store(true, Ordering::SeqCst);
    }

    /// Count one dispatched connection until the returned guard drops
    pub(crate) fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            state: Arc::clone(self),
        }
    }
}

/// Decrements the open-connection counter on drop, including on handler panic
pub(crate) struct ConnectionGuard {
    state: Arc<ServerState>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bridges `Shutdown` to the token derived by the running `Listen`.
///
/// A shutdown requested while nothing is listening stays pending and cancels
/// the next `Listen` as soon as it arms.
#[derive(Debug, Default)]
pub(crate) struct ShutdownSignal {
    active: ArcSwapOption<CancellationToken>,
    pending: AtomicBool,
}

impl ShutdownSignal {
    pub(crate) fn arm(&self, token: &CancellationToken) {
        self.active.store(Some(Arc::new(token.clone())));
        if self.pending.swap(false, Ordering::SeqCst) {
            token.cancel();
        }
    }

    pub(crate) fn disarm(&self) {
        self.active.store(None);
    }

    pub(crate) fn request(&self) {
        match self.active.load_full() {
            Some(token) => token.cancel(),
            None => {
                self.pending.store(true, Ordering::SeqCst);
                // Listen may have armed between the load and the store
                if let Some(token) = self.active.load_full() {
                    if self.pending.swap(false, Ordering::SeqCst) {
                        token.cancel();
                    }
                }
            }
        }
    }
}
