#[path = "support/mod.rs"]
mod support;

use std::time::Duration;

use pooled_tls_proxy::pool::Pool;
use tokio::time::timeout;

/// A freshly started pool should be able to serve `size` concurrent
/// `Get()`s without any of them blocking on a fresh dial — the warm-up
/// debt is stabilized as soon as `Start()` runs.
#[tokio::test]
async fn pool_serves_warm_connections_without_extra_delay() {
    let (addr, roots) = support::spawn_echo_tls_server().await;
    let tls_config = support::client_tls_config(roots);
    let (pool, handle) = Pool::new(support::test_pool_config(addr, tls_config, 3));
    let pool_join = pool.start();

    // Give the stabilizer a moment to land the initial dials.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for _ in 0..3 {
        let conn = timeout(Duration::from_millis(100), handle.get())
            .await
            .expect("get() should not need a fresh dial")
            .expect("get() should succeed");
        drop(conn);
    }

    handle.stop().await.expect("stop() should succeed");
    pool_join.await.expect("pool task should not panic");
}

/// Every served connection is replaced in the background; a second round
/// of `Get()` calls after handing out the first `size` connections should
/// still succeed once the replacement dials land.
#[tokio::test]
async fn pool_replenishes_served_connections() {
    let (addr, roots) = support::spawn_echo_tls_server().await;
    let tls_config = support::client_tls_config(roots);
    let (pool, handle) = Pool::new(support::test_pool_config(addr, tls_config, 1));
    let pool_join = pool.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let first = handle.get().await.expect("first get() should succeed");
    drop(first);

    let second = timeout(Duration::from_millis(500), handle.get())
        .await
        .expect("replacement dial should land before the deadline")
        .expect("second get() should succeed");
    drop(second);

    handle.stop().await.expect("stop() should succeed");
    pool_join.await.expect("pool task should not panic");
}

/// A `Get()` that arrives before any dial has completed is queued as a
/// waiter and handed the connection directly from the dialer that
/// eventually succeeds, with no intervening trip through the reserve.
#[tokio::test]
async fn pool_serves_a_pending_get_as_soon_as_a_dial_completes() {
    let (addr, roots) = support::spawn_echo_tls_server().await;
    let tls_config = support::client_tls_config(roots);
    let (pool, handle) = Pool::new(support::test_pool_config(addr, tls_config, 1));
    let pool_join = pool.start();

    // No sleep: the `Get()` races the very first warm-up dial.
    let conn = timeout(Duration::from_secs(2), handle.get())
        .await
        .expect("get() should not hang")
        .expect("get() should succeed");
    drop(conn);

    handle.stop().await.expect("stop() should succeed");
    pool_join.await.expect("pool task should not panic");
}

/// `Stop()` must be idempotent-safe to await once, close out every
/// in-flight dialer, and leave the reserve empty; a `Get()` issued after
/// `Stop()` reports the pool as stopped rather than hanging forever.
#[tokio::test]
async fn pool_stop_drains_and_rejects_further_gets() {
    let (addr, roots) = support::spawn_echo_tls_server().await;
    let tls_config = support::client_tls_config(roots);
    let (pool, handle) = Pool::new(support::test_pool_config(addr, tls_config, 2));
    let pool_join = pool.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await.expect("stop() should succeed");
    pool_join.await.expect("pool task should not panic");

    let result = handle.get().await;
    assert!(result.is_err(), "get() after stop() should report the pool as stopped");
}

/// A pool pointed at a port nobody is listening on never stalls `Start()`
/// itself; dial attempts fail and retry on `backoff` without panicking or
/// blocking the actor loop.
#[tokio::test]
async fn pool_tolerates_an_unreachable_upstream() {
    let tls_config = support::client_tls_config(rustls::RootCertStore::empty());
    // Nothing listens on this port; every dial attempt fails immediately.
    let config = support::test_pool_config("127.0.0.1:1".parse().unwrap(), tls_config, 1);
    let (pool, handle) = Pool::new(config);
    let pool_join = pool.start();

    // Let at least one dial-fail/backoff/retry cycle run.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The pool keeps retrying quietly; Stop() still terminates cleanly.
    handle.stop().await.expect("stop() should succeed even mid-retry");
    pool_join.await.expect("pool task should not panic");
}
