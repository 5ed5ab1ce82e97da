//! Binary entry-point for the pooling TLS wrapper.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, fmt, EnvFilter};

use pooled_tls_proxy::{cli, pool, readiness, relay, shutdown, tls};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load CLI flags ───────────────────────────────────────────────────
    let cli = match cli::Cli::parse().validated() {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    // ── 2. Init structured logging (env overrides -v/--verbosity) ──────────
    let log_level = cli
        .verbosity
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    let env_filter = EnvFilter::from_default_env().add_directive(log_level.into());

    let _logfile_guard = if let Some(path) = &cli.logfile {
        let (dir, file_name) = split_logfile_path(path);
        let file_appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        fmt().with_env_filter(env_filter).with_writer(non_blocking).init();
        Some(guard)
    } else {
        fmt().with_env_filter(env_filter).init();
        None
    };

    info!("listen   : {}:{}", cli.bind_address, cli.bind_port);
    info!("upstream : {}:{}", cli.dst_address, cli.dst_port);
    info!("pool size: {}", cli.pool_size);

    // ── 3. Build the upstream TLS client configuration ──────────────────────
    let tls_config = Arc::new(tls::build_client_config(&cli).context("building TLS client config")?);

    // ── 4. Start the pool ─────────────────────────────────────────────────
    let pool_config = pool::PoolConfig {
        upstream_host: cli.dst_address.clone(),
        upstream_port: cli.dst_port,
        tls_config,
        dial_timeout: Duration::from_secs_f64(cli.timeout),
        backoff: Duration::from_secs_f64(cli.backoff),
        ttl: Duration::from_secs_f64(cli.ttl),
        size: cli.pool_size,
    };
    let (pool, pool_handle) = pool::Pool::new(pool_config);
    let pool_join = pool.start();

    // ── 5. Start the relay ──────────────────────────────────────────────────
    let listener = relay::Listener::bind(&cli.bind_address, cli.bind_port, pool_handle.clone())
        .await
        .context("starting listener")?;
    let relay_handle = relay::start(listener);

    info!("server started");
    readiness::notify_ready();

    // ── 6. Wait for a shutdown signal ────────────────────────────────────────
    let shutdown_cancel = CancellationToken::new();
    tokio::spawn(shutdown::wait_for_shutdown_signal(shutdown_cancel.clone()));
    shutdown_cancel.cancelled().await;

    info!("event loop interrupted, shutting down");
    readiness::notify_stopping();

    if let Err(e) = relay_handle.stop(&pool_handle).await {
        error!("error while stopping relay: {e:?}");
    }
    if let Err(e) = pool_join.await {
        error!("pool task panicked: {e:?}");
    }

    info!("server finished its work");
    Ok(())
}

fn split_logfile_path(path: &std::path::Path) -> (std::path::PathBuf, std::ffi::OsString) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| std::ffi::OsString::from("pooled-tls-proxy.log"));
    (dir, file_name)
}
