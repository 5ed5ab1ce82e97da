#[path = "support/mod.rs"]
mod support;

use std::time::Duration;

use pooled_tls_proxy::pool::Pool;
use pooled_tls_proxy::relay::{self, Listener};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// End-to-end: a plaintext client connects to the relay, is handed a
/// pooled upstream connection, and whatever it writes comes back exactly
/// as sent — a byte-for-byte splice, no framing.
#[tokio::test]
async fn relay_round_trips_bytes_through_a_pooled_connection() {
    let (upstream_addr, roots) = support::spawn_echo_tls_server().await;
    let tls_config = support::client_tls_config(roots);
    let (pool, pool_handle) = Pool::new(support::test_pool_config(upstream_addr, tls_config, 1));
    let pool_join = pool.start();

    let listener = Listener::bind("127.0.0.1", 0, pool_handle.clone())
        .await
        .expect("bind relay listener");
    let bind_addr = listener.local_addr().expect("listener local addr");
    let relay_handle = relay::start(listener);

    let mut client = TcpStream::connect(bind_addr).await.expect("connect to relay");
    client.write_all(b"hello pool").await.expect("write");

    let mut buf = [0u8; 32];
    let n = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("read should not hang")
        .expect("read should succeed");
    assert_eq!(&buf[..n], b"hello pool");

    drop(client);
    relay_handle
        .stop(&pool_handle)
        .await
        .expect("relay stop should succeed");
    pool_join.await.expect("pool task should not panic");
}

/// Half-closing the client's write side ends that pump direction, which
/// tears down the paired direction too — the client should observe EOF on
/// its own read side shortly after, instead of the session hanging open.
#[tokio::test]
async fn relay_half_close_tears_down_both_directions() {
    let (upstream_addr, roots) = support::spawn_echo_tls_server().await;
    let tls_config = support::client_tls_config(roots);
    let (pool, pool_handle) = Pool::new(support::test_pool_config(upstream_addr, tls_config, 1));
    let pool_join = pool.start();

    let listener = Listener::bind("127.0.0.1", 0, pool_handle.clone())
        .await
        .expect("bind relay listener");
    let bind_addr = listener.local_addr().expect("listener local addr");
    let relay_handle = relay::start(listener);

    let mut client = TcpStream::connect(bind_addr).await.expect("connect to relay");
    client.write_all(b"ping").await.expect("write");
    let mut buf = [0u8; 32];
    let n = client.read(&mut buf).await.expect("echo read");
    assert_eq!(&buf[..n], b"ping");

    client.shutdown().await.expect("half-close write side");

    // The relay should see the client's half-close, end that pump, and
    // close its own write side in response — the client's read should
    // reach EOF rather than time out.
    let mut tail = Vec::new();
    let eof = timeout(Duration::from_secs(2), client.read_to_end(&mut tail))
        .await
        .expect("read-to-EOF should not hang");
    assert!(eof.is_ok());
    assert!(tail.is_empty());

    relay_handle
        .stop(&pool_handle)
        .await
        .expect("relay stop should succeed");
    pool_join.await.expect("pool task should not panic");
}

/// `Stop()` closes the listen socket before returning: a connection
/// attempt made after `stop()` completes must fail rather than be
/// accepted by a socket that should already be gone.
#[tokio::test]
async fn relay_stop_closes_the_listen_socket() {
    let (upstream_addr, roots) = support::spawn_echo_tls_server().await;
    let tls_config = support::client_tls_config(roots);
    let (pool, pool_handle) = Pool::new(support::test_pool_config(upstream_addr, tls_config, 1));
    let pool_join = pool.start();

    let listener = Listener::bind("127.0.0.1", 0, pool_handle.clone())
        .await
        .expect("bind relay listener");
    let bind_addr = listener.local_addr().expect("listener local addr");
    let relay_handle = relay::start(listener);

    relay_handle
        .stop(&pool_handle)
        .await
        .expect("relay stop should succeed");
    pool_join.await.expect("pool task should not panic");

    assert!(TcpStream::connect(bind_addr).await.is_err());
}
