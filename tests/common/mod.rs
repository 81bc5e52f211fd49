#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use netsock::common::{ConnState, FuncInfo, SocketAddress};
use netsock::{CancellationToken, Result, Server};
use tokio::task::JoinHandle;

/// Start `listen` on its own task and wait until the address is bound
pub async fn start(server: &Arc<dyn Server>, token: &CancellationToken) -> (JoinHandle<Result<()>>, SocketAddress) {
    let srv = Arc::clone(server);
    let ctx = token.clone();
    let task = tokio::spawn(async move { srv.listen(&ctx).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(addr) = server.local_addr() {
            return (task, addr);
        }
        assert!(tokio::time::Instant::now() < deadline, "server did not start");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Poll `cond` for up to five seconds
pub async fn eventually<F: Fn() -> bool>(cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Info callback recording every state it sees
pub fn recorder() -> (FuncInfo, Arc<Mutex<Vec<ConnState>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let f: FuncInfo = Arc::new(move |_: &SocketAddress, _: &SocketAddress, state: ConnState| {
        s.lock().unwrap().push(state);
    });
    (f, seen)
}
