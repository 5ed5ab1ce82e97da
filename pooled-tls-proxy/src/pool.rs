//! The upstream connection pool. Modeled as a single-owner actor, the shape
//! that fits a preemptively-scheduled runtime best — one task owns
//! `reserve`, `waiters`, `debt` and the in-flight dialer set; every
//! operation (`Get`, dial completion, TTL expiry, `Stop`) is a message on
//! an mpsc channel, so no locks are needed anywhere in this module.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use rustls::ClientConfig;
use tokio::{
    io::AsyncWriteExt,
    sync::{mpsc, oneshot, Notify},
    task::JoinSet,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::dialer::{Connection, Dialer};
use crate::error::PoolError;

/// Immutable pool configuration.
#[derive(Clone)]
pub struct PoolConfig {
    pub upstream_host: String,
    pub upstream_port: u16,
    pub tls_config: Arc<ClientConfig>,
    pub dial_timeout: Duration,
    pub backoff: Duration,
    pub ttl: Duration,
    pub size: usize,
}

enum DialOutcome {
    HandedToWaiter,
    Reserved { claimed: oneshot::Receiver<()> },
}

enum PoolMsg {
    Get {
        reply: oneshot::Sender<Result<Connection, PoolError>>,
    },
    DialSucceeded {
        id: u64,
        connection: Connection,
        reply: oneshot::Sender<DialOutcome>,
    },
    DialFailed,
    SlotTtlExpired {
        id: u64,
        reply: oneshot::Sender<Option<Connection>>,
    },
    WithdrawSlot {
        id: u64,
        reply: oneshot::Sender<Option<Connection>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// The cheaply-clonable public face of the pool, handed to the relay's
/// per-client handlers. Carries only a channel sender.
#[derive(Clone)]
pub struct PoolHandle {
    msg_tx: mpsc::UnboundedSender<PoolMsg>,
}

impl PoolHandle {
    /// Transfers ownership of an established upstream
    /// connection to the caller. Cancelling the returned future (e.g. the
    /// caller's task is aborted) simply drops the pending request; any
    /// connection later handed to it by a completing dialer is recycled
    /// back into the reserve (see `DialSucceeded` handling below).
    pub async fn get(&self) -> Result<Connection, PoolError> {
        let (reply, rx) = oneshot::channel();
        self.msg_tx
            .send(PoolMsg::Get { reply })
            .map_err(|_| PoolError::Stopped)?;
        rx.await.map_err(|_| PoolError::Stopped)?
    }

    /// Safe to call exactly once; cancels the stabilizer,
    /// cancels every in-flight dialer, drains and closes the reserve, and
    /// waits for all of it to finish before returning.
    pub async fn stop(&self) -> Result<(), PoolError> {
        let (reply, rx) = oneshot::channel();
        self.msg_tx
            .send(PoolMsg::Stop { reply })
            .map_err(|_| PoolError::Stopped)?;
        rx.await.map_err(|_| PoolError::Stopped)
    }
}

/// Owns the actor loop. Constructed via [`Pool::new`], launched via
/// [`Pool::start`], after which only [`PoolHandle`] is needed.
pub struct Pool {
    msg_tx: mpsc::UnboundedSender<PoolMsg>,
    msg_rx: mpsc::UnboundedReceiver<PoolMsg>,
    dialer: Dialer,
    backoff: Duration,
    ttl: Duration,
    debt: usize,
    next_slot_id: u64,
    reserve: VecDeque<(u64, Connection)>,
    claim_signals: std::collections::HashMap<u64, oneshot::Sender<()>>,
    waiters: VecDeque<oneshot::Sender<Result<Connection, PoolError>>>,
    respawn: Arc<Notify>,
    cancel: CancellationToken,
}

impl Pool {
    pub fn new(config: PoolConfig) -> (Pool, PoolHandle) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let dialer = Dialer::new(
            config.upstream_host,
            config.upstream_port,
            config.tls_config,
            config.dial_timeout,
        );
        let handle = PoolHandle {
            msg_tx: msg_tx.clone(),
        };
        let pool = Pool {
            msg_tx,
            msg_rx,
            dialer,
            backoff: config.backoff,
            ttl: config.ttl,
            // `Start()` should immediately launch `size` dialers, so debt
            // begins there rather than at zero.
            debt: config.size,
            next_slot_id: 0,
            reserve: VecDeque::new(),
            claim_signals: std::collections::HashMap::new(),
            waiters: VecDeque::new(),
            respawn: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        };
        (pool, handle)
    }

    /// Spawns the actor loop (which immediately stabilizes
    /// the initial debt) and returns. After this call, `Get()` through the
    /// returned [`PoolHandle`] works.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        // The initial debt makes the first loop iteration stabilize right
        // away: notify the signal up front so the level-triggered wait does
        // not need a first external event to get going.
        self.respawn.notify_one();
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut stopping: Option<oneshot::Sender<()>> = None;

        loop {
            if stopping.is_some() && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(msg) = self.msg_rx.recv() => {
                    self.handle(msg, &mut stopping);
                }

                Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                    // one dialer task finished; loop re-checks the
                    // stopping/in_flight condition above.
                    if let Err(e) = res {
                        if e.is_panic() {
                            error!("dialer task panicked: {e}");
                        }
                    }
                }

                _ = self.respawn.notified(), if stopping.is_none() => {
                    self.stabilize(&mut in_flight);
                }
            }
        }

        debug!("pool stabilizer and all dialers stopped, draining reserve");
        while let Some((_, mut conn)) = self.reserve.pop_front() {
            let _ = tokio::time::timeout(Duration::from_millis(200), conn.shutdown()).await;
        }
        self.claim_signals.clear();

        if let Some(reply) = stopping {
            let _ = reply.send(());
        }
    }

    fn notify_respawn(&mut self) {
        self.debt += 1;
        self.respawn.notify_one();
    }

    fn stabilize(&mut self, in_flight: &mut JoinSet<()>) {
        let n = std::mem::take(&mut self.debt);
        if n == 0 {
            return;
        }
        debug!(count = n, "pool stabilizer spawning dial attempts");
        for _ in 0..n {
            let id = self.next_slot_id;
            self.next_slot_id += 1;
            let dialer = self.dialer.clone();
            let backoff = self.backoff;
            let ttl = self.ttl;
            let msg_tx = self.msg_tx.clone();
            let cancel = self.cancel.clone();
            in_flight.spawn(run_dialer(id, dialer, backoff, ttl, msg_tx, cancel));
        }
    }

    fn handle(&mut self, msg: PoolMsg, stopping: &mut Option<oneshot::Sender<()>>) {
        match msg {
            PoolMsg::Get { reply } => {
                if stopping.is_some() {
                    let _ = reply.send(Err(PoolError::Stopped));
                    return;
                }
                // Every served connection must be replaced; bump debt and
                // signal the stabilizer *before* touching the reserve so the
                // replacement dial races alongside the handler's work.
                self.notify_respawn();

                if let Some((id, conn)) = self.reserve.pop_front() {
                    if let Some(claim) = self.claim_signals.remove(&id) {
                        let _ = claim.send(());
                    }
                    if let Err(Ok(conn)) = reply.send(Ok(conn)) {
                        // Caller cancelled between pop and delivery; the
                        // debt bump above already owes this connection's
                        // replacement, so just drop it without incurring a
                        // second one.
                        drop(conn);
                    }
                } else {
                    self.waiters.push_back(reply);
                }
            }

            PoolMsg::DialSucceeded {
                id,
                connection,
                reply,
            } => {
                debug!("successfully built upstream connection");
                if let Some(waiter) = self.waiters.pop_front() {
                    match waiter.send(Ok(connection)) {
                        Ok(()) => {
                            let _ = reply.send(DialOutcome::HandedToWaiter);
                        }
                        Err(Ok(connection)) => {
                            // The waiting Get() was cancelled; fall back to
                            // reserving this connection instead of losing it.
                            self.place_in_reserve(id, connection, reply);
                        }
                        Err(Err(_)) => unreachable!("we only ever send Ok to waiters"),
                    }
                } else {
                    self.place_in_reserve(id, connection, reply);
                }
            }

            PoolMsg::DialFailed => {
                self.notify_respawn();
            }

            PoolMsg::SlotTtlExpired { id, reply } => {
                if let Some(pos) = self.reserve.iter().position(|(slot_id, _)| *slot_id == id) {
                    let (_, conn) = self.reserve.remove(pos).expect("position just found");
                    self.claim_signals.remove(&id);
                    self.notify_respawn();
                    let _ = reply.send(Some(conn));
                } else {
                    debug!(
                        "slot {id} not found in reserve on TTL expiry (already claimed); ignoring"
                    );
                    let _ = reply.send(None);
                }
            }

            PoolMsg::WithdrawSlot { id, reply } => {
                if let Some(pos) = self.reserve.iter().position(|(slot_id, _)| *slot_id == id) {
                    let (_, conn) = self.reserve.remove(pos).expect("position just found");
                    self.claim_signals.remove(&id);
                    // Shutting down: do not re-incur debt for this slot.
                    let _ = reply.send(Some(conn));
                } else {
                    let _ = reply.send(None);
                }
            }

            PoolMsg::Stop { reply } => {
                if stopping.is_some() {
                    warn!("Stop() called more than once; ignoring duplicate call");
                    let _ = reply.send(());
                    return;
                }
                *stopping = Some(reply);
                self.cancel.cancel();
            }
        }
    }

    fn place_in_reserve(
        &mut self,
        id: u64,
        connection: Connection,
        reply: oneshot::Sender<DialOutcome>,
    ) {
        let (claim_tx, claim_rx) = oneshot::channel();
        self.claim_signals.insert(id, claim_tx);
        self.reserve.push_back((id, connection));
        let _ = reply.send(DialOutcome::Reserved { claimed: claim_rx });
    }
}

/// Lifecycle of one dialer task: dial, then either hand straight to a
/// waiter, or sit in the reserve racing claim-vs-TTL-vs-cancellation.
async fn run_dialer(
    id: u64,
    dialer: Dialer,
    backoff: Duration,
    ttl: Duration,
    msg_tx: mpsc::UnboundedSender<PoolMsg>,
    cancel: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            // Cancelled mid-dial: abort without touching debt or reserve.
        }
        result = dialer.dial() => {
            match result {
                Err(e) => {
                    error!("upstream dial failed: {e}");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {}
                        _ = sleep(backoff) => {
                            let _ = msg_tx.send(PoolMsg::DialFailed);
                        }
                    }
                }
                Ok(connection) => {
                    let (reply, reply_rx) = oneshot::channel();
                    if msg_tx
                        .send(PoolMsg::DialSucceeded { id, connection, reply })
                        .is_err()
                    {
                        return;
                    }
                    match reply_rx.await {
                        Ok(DialOutcome::HandedToWaiter) => {
                            // Ownership transferred; nothing left to do.
                        }
                        Ok(DialOutcome::Reserved { claimed }) => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    let (reply, rx) = oneshot::channel();
                                    if msg_tx.send(PoolMsg::WithdrawSlot { id, reply }).is_ok() {
                                        if let Ok(Some(mut conn)) = rx.await {
                                            let _ = conn.shutdown().await;
                                        }
                                    }
                                }
                                res = claimed => {
                                    if res.is_err() {
                                        warn!("claim signal sender dropped unexpectedly for slot {id}");
                                    }
                                }
                                _ = sleep(ttl) => {
                                    let (reply, rx) = oneshot::channel();
                                    if msg_tx.send(PoolMsg::SlotTtlExpired { id, reply }).is_ok() {
                                        if let Ok(Some(mut conn)) = rx.await {
                                            let _ = conn.shutdown().await;
                                        }
                                    }
                                }
                            }
                        }
                        Err(_) => {
                            // Pool actor is gone; nothing we can do.
                        }
                    }
                }
            }
        }
    }
}
