//! Standalone TLS echo server used as the fixed upstream in manual smoke
//! tests and integration tests for `pooled-tls-proxy`. Not part of the core;
//! accepts mTLS connections and echoes back whatever it reads.

use std::{fs::File, io::BufReader, net::SocketAddr, path::Path, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore, ServerConfig,
};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::{
    io::{copy, split},
    net::TcpListener,
};
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "echo-tls-upstream", about = "Echoes bytes back over mTLS")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:9443")]
    listen: SocketAddr,

    #[arg(long)]
    cert: PathBuf,

    #[arg(long)]
    key: PathBuf,

    /// CA file used to authenticate client certificates. If omitted, any
    /// client is accepted without mutual auth.
    #[arg(long)]
    client_ca: Option<PathBuf>,
}

fn cert_reader<P: AsRef<Path>>(cert_path: P) -> Result<Vec<CertificateDer<'static>>> {
    let cert_file = File::open(&cert_path)
        .with_context(|| format!("opening {}", cert_path.as_ref().display()))?;
    let mut reader = BufReader::new(cert_file);
    let parsed: Result<Vec<CertificateDer>, _> = certs(&mut reader).collect();
    Ok(parsed?)
}

fn privkey_reader<P: AsRef<Path>>(key_path: P) -> Result<PrivateKeyDer<'static>> {
    let key_file = File::open(key_path.as_ref())
        .with_context(|| format!("opening {}", key_path.as_ref().display()))?;
    let mut reader = BufReader::new(key_file);
    let key = pkcs8_private_keys(&mut reader)
        .next()
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("no PKCS8 key found in {}", key_path.as_ref().display()))?;
    Ok(PrivateKeyDer::Pkcs8(key))
}

fn build_server_config(cli: &Cli) -> Result<ServerConfig> {
    let certs = cert_reader(&cli.cert)?;
    let key = privkey_reader(&cli.key)?;

    let mut config = if let Some(ca_file) = &cli.client_ca {
        let ca_certs = cert_reader(ca_file)?;
        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(ca_certs);
        let verifier = WebPkiClientVerifier::builder(roots.into())
            .build()
            .context("building client cert verifier")?;
        ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?
    } else {
        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?
    };
    config.alpn_protocols = vec![];
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = build_server_config(&cli)?;
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!("echo-tls-upstream listening on {}", cli.listen);

    loop {
        let (tcp_stream, peer_addr) = listener.accept().await?;
        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(tcp_stream).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("TLS handshake with {peer_addr} failed: {e:?}");
                    return;
                }
            };
            info!("{peer_addr} connected");
            let (mut rd, mut wr) = split(tls_stream);
            match copy(&mut rd, &mut wr).await {
                Ok(n) => info!("{peer_addr} closed after echoing {n} bytes"),
                Err(e) => warn!("{peer_addr} echo loop error: {e:?}"),
            }
        });
    }
}
