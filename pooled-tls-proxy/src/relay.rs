//! The relay: the `Listener` and its per-client handler. Accepts plaintext
//! TCP clients, claims one pooled upstream per client, and splices bytes
//! bidirectionally until either side closes.

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pool::PoolHandle;

/// No protocol framing; pure byte splice.
const BUFSIZE: usize = 16 * 1024;

/// Binds once via [`Listener::bind`]; [`Listener::run`] drives the accept
/// loop until told to stop.
pub struct Listener {
    tcp_listener: TcpListener,
    pool: PoolHandle,
}

impl Listener {
    pub async fn bind(bind_address: &str, bind_port: u16, pool: PoolHandle) -> Result<Self> {
        let tcp_listener = TcpListener::bind((bind_address, bind_port))
            .await
            .with_context(|| format!("binding listen socket {bind_address}:{bind_port}"))?;
        info!("relay listening on {bind_address}:{bind_port}");
        Ok(Self { tcp_listener, pool })
    }

    /// The address actually bound — useful when `bind_port` was `0` and
    /// the OS picked an ephemeral port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp_listener.local_addr()
    }

    /// Accepts connections, spawning one handler task per client, until
    /// `stop_accepting` is cancelled. Tracks every spawned handler in a
    /// `JoinSet` and returns it — along with the per-session `halt`-style
    /// cancellation token shared by all handlers — so the caller can
    /// finish the rest of the shutdown sequence.
    pub async fn run(self, stop_accepting: CancellationToken) -> (JoinSet<()>, CancellationToken) {
        let Listener { tcp_listener, pool } = self;
        let mut children = JoinSet::new();
        let child_cancel = CancellationToken::new();

        loop {
            tokio::select! {
                biased;
                _ = stop_accepting.cancelled() => break,
                accept_res = tcp_listener.accept() => {
                    match accept_res {
                        Ok((sock, peer_addr)) => {
                            let pool = pool.clone();
                            let cancel = child_cancel.clone();
                            children.spawn(async move {
                                handle_connection(sock, peer_addr, pool, cancel).await;
                            });
                        }
                        Err(e) => warn!("failed to accept connection: {e}"),
                    }
                }
            }
        }

        // `tcp_listener` is dropped here, closing the listen socket: no
        // further accepts are possible from this point on.
        (children, child_cancel)
    }
}

/// Handle returned by starting a [`Listener`], used to drive its shutdown.
pub struct RelayHandle {
    stop_accepting: CancellationToken,
    run_task: tokio::task::JoinHandle<(JoinSet<()>, CancellationToken)>,
}

/// Spawn the accept loop, returning a handle to later stop it.
pub fn start(listener: Listener) -> RelayHandle {
    let stop_accepting = CancellationToken::new();
    let run_task = tokio::spawn(listener.run(stop_accepting.clone()));
    RelayHandle {
        stop_accepting,
        run_task,
    }
}

impl RelayHandle {
    /// Closes the listen socket (no new accepts), cancels the pool, then
    /// cancels all still-running child handlers and waits for them. A
    /// short grace delay afterward absorbs stragglers the underlying
    /// accept loop emitted in flight.
    pub async fn stop(self, pool: &PoolHandle) -> Result<()> {
        self.stop_accepting.cancel();
        let (mut children, child_cancel) = self
            .run_task
            .await
            .context("accept loop task panicked")?;

        if let Err(e) = pool.stop().await {
            warn!("pool reported an error while stopping: {e}");
        }

        debug!("cancelling {} in-flight client handlers", children.len());
        child_cancel.cancel();
        while let Some(res) = children.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    error!("client handler task panicked: {e}");
                }
            }
        }

        // The listener continues to emit handlers for a short while after
        // the accept loop returns; absorb those stragglers here.
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }
}

/// Handles one client end to end: claim an upstream, splice bytes, tear
/// down when either side is done.
async fn handle_connection(
    client: TcpStream,
    peer_addr: SocketAddr,
    pool: PoolHandle,
    cancel: CancellationToken,
) {
    info!("client {peer_addr} connected");

    let upstream = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("client {peer_addr}: cancelled before an upstream was claimed");
            return;
        }
        result = pool.get() => match result {
            Ok(conn) => conn,
            Err(e) => {
                warn!("client {peer_addr}: failed to obtain upstream: {e}");
                return;
            }
        },
    };

    // The `halt` signal: set by either direction's termination, observed by
    // both, so one half-close tears down the whole session. Derived from
    // `cancel` so a supervising `Stop()` also tears down sessions that are
    // idle mid-splice, not just ones still waiting on `pool.get()`.
    let halt = cancel.child_token();

    let (client_rd, mut client_wr) = tokio::io::split(client);
    let (upstream_rd, mut upstream_wr) = tokio::io::split(upstream);

    let to_client = pump(upstream_rd, &mut client_wr, halt.clone());
    let to_upstream = pump(client_rd, &mut upstream_wr, halt.clone());

    let (from_upstream, from_client) = tokio::join!(to_client, to_upstream);
    if let Err(e) = from_upstream {
        debug!("client {peer_addr}: upstream->client pump ended: {e}");
    }
    if let Err(e) = from_client {
        debug!("client {peer_addr}: client->upstream pump ended: {e}");
    }

    let _ = client_wr.shutdown().await;
    let _ = upstream_wr.shutdown().await;

    info!("client {peer_addr} disconnected");
}

/// One direction's copy loop. Reads from `src`, writes to `dst`, racing
/// every suspension point against `halt`. Any exit
/// path — EOF, I/O error, or `halt` winning a race — sets `halt` so the
/// paired pump in the other direction tears down too.
async fn pump<R, W>(mut src: R, dst: &mut W, halt: CancellationToken) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = pump_inner(&mut src, dst, &halt).await;
    halt.cancel();
    result
}

async fn pump_inner<R, W>(src: &mut R, dst: &mut W, halt: &CancellationToken) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFSIZE];
    loop {
        let n = tokio::select! {
            biased;
            _ = halt.cancelled() => return Ok(()),
            res = src.read(&mut buf) => res?,
        };
        if n == 0 {
            return Ok(()); // peer half-close (EOF): normal termination
        }
        tokio::select! {
            biased;
            _ = halt.cancelled() => return Ok(()),
            res = async {
                dst.write_all(&buf[..n]).await?;
                dst.flush().await
            } => res?,
        }
    }
}
