mod common;

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netsock::common::NetworkProtocol;
use netsock::context::{echo, handler};
use netsock::{client, server, CancellationToken, Error, Server};

use common::{eventually, start};

fn udp_server(h: netsock::Handler) -> Arc<dyn Server> {
    Arc::from(server::new(None, Some(h), NetworkProtocol::Udp, 0, "127.0.0.1:0", None).unwrap())
}

#[tokio::test]
async fn test_round_trip() {
    let server = udp_server(echo());
    let token = CancellationToken::new();
    let (task, addr) = start(&server, &token).await;

    let client = client::new(NetworkProtocol::Udp, &addr.to_string()).unwrap();
    client.connect(&CancellationToken::new()).await.unwrap();

    let payload = b"datagram payload \x00\x01\x02";
    client.write(payload).await.unwrap();
    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], payload);

    client.close().await.unwrap();
    token.cancel();
    task.await.unwrap().unwrap();
    assert!(!server.is_running());
    assert!(server.is_gone());
}

#[tokio::test]
async fn test_replies_follow_each_sender() {
    let server = udp_server(echo());
    let token = CancellationToken::new();
    let (task, addr) = start(&server, &token).await;

    let a = client::new(NetworkProtocol::Udp, &addr.to_string()).unwrap();
    let b = client::new(NetworkProtocol::Udp, &addr.to_string()).unwrap();
    a.connect(&CancellationToken::new()).await.unwrap();
    b.connect(&CancellationToken::new()).await.unwrap();

    let mut buf = [0u8; 16];
    a.write(b"from a").await.unwrap();
    let n = a.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"from a");

    b.write(b"from b").await.unwrap();
    let n = b.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"from b");

    token.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_once_single_response() {
    let server = udp_server(echo());
    let token = CancellationToken::new();
    let (task, addr) = start(&server, &token).await;

    let client = client::new(NetworkProtocol::Udp, &addr.to_string()).unwrap();
    let got = Arc::new(Mutex::new(Vec::new()));
    let g = Arc::clone(&got);
    client
        .once(
            &CancellationToken::new(),
            b"ping",
            Box::new(move |r: &mut dyn Read| {
                r.read_to_end(&mut g.lock().unwrap()).unwrap();
            }),
        )
        .await
        .unwrap();

    assert_eq!(*got.lock().unwrap(), b"ping");
    assert!(!client.is_connected());

    token.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_reader() {
    let server = udp_server(echo());
    let token = CancellationToken::new();
    let (task, _) = start(&server, &token).await;
    assert_eq!(server.open_connections(), 1);

    server.shutdown(&CancellationToken::new()).await.unwrap();
    assert_eq!(server.open_connections(), 0);
    task.await.unwrap().unwrap();
    assert!(server.is_gone());
}

#[tokio::test]
async fn test_handler_panic_ends_processing() {
    let h = handler(|_ctx| async move {
        panic!("datagram handler fails");
    });
    let server = udp_server(h);
    let panics = Arc::new(Mutex::new(0));
    let p = Arc::clone(&panics);
    server.register_func_error(Some(Arc::new(move |e: &Error| {
        if matches!(e, Error::Handler(_)) {
            *p.lock().unwrap() += 1;
        }
    })));

    let token = CancellationToken::new();
    let (task, _) = start(&server, &token).await;

    eventually(|| *panics.lock().unwrap() == 1).await;
    eventually(|| server.open_connections() == 0).await;
    // still listening, but nobody serves the socket any more
    assert!(server.is_running());

    token.cancel();
    task.await.unwrap().unwrap();
}

/// Echo until the context closes, then keep running for a while
fn lingering_echo(linger: Duration) -> netsock::Handler {
    handler(move |mut ctx| async move {
        let mut buf = [0u8; 64];
        while let Ok(n) = ctx.read(&mut buf).await {
            if ctx.write(&buf[..n]).await.is_err() {
                break;
            }
        }
        tokio::time::sleep(linger).await;
    })
}

#[tokio::test]
async fn test_lingering_handler_frees_port() {
    let server = udp_server(lingering_echo(Duration::from_millis(500)));
    let first = CancellationToken::new();
    let (task, addr) = start(&server, &first).await;
    first.cancel();
    task.await.unwrap().unwrap();

    // the old handler is still asleep here
    server.register_server(&addr.to_string()).unwrap();
    let second = CancellationToken::new();
    let (task, _) = start(&server, &second).await;

    let client = client::new(NetworkProtocol::Udp, &addr.to_string()).unwrap();
    client.connect(&CancellationToken::new()).await.unwrap();
    client.write(b"second run").await.unwrap();
    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"second run");
    client.close().await.unwrap();

    second.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_between_listens_stops_next_listen() {
    let server = udp_server(echo());
    let token = CancellationToken::new();
    let (task, _) = start(&server, &token).await;
    token.cancel();
    task.await.unwrap().unwrap();

    server.shutdown(&CancellationToken::new()).await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), server.listen(&CancellationToken::new())).await;
    assert!(matches!(next, Ok(Ok(()))));
    assert!(server.is_gone());
}

