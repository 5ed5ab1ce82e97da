//! The first `SIGINT`/`SIGTERM` triggers graceful shutdown via the given
//! `CancellationToken`; a second occurrence terminates the process
//! immediately with exit code 1.

use tokio_util::sync::CancellationToken;
use tracing::warn;

#[cfg(unix)]
pub async fn wait_for_shutdown_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    warn!("got first exit signal! shutting down gracefully");
    cancel.cancel();

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    warn!("got second exit signal! terminating hard");
    std::process::exit(1);
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    warn!("got first exit signal! shutting down gracefully");
    cancel.cancel();

    let _ = tokio::signal::ctrl_c().await;
    warn!("got second exit signal! terminating hard");
    std::process::exit(1);
}
