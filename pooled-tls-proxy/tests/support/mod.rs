//! Shared fixtures for the integration tests: a throwaway self-signed TLS
//! echo server standing in for the fixed upstream, and the small bits of
//! `pool`/`relay` wiring every test needs. Not part of the deliverable
//! crate; `tests/*.rs` files pull this in via `#[path] mod support`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use pooled_tls_proxy::pool::PoolConfig;

/// Starts a TLS server on `127.0.0.1:0` that echoes back whatever it
/// receives on each connection, and returns its address plus a trust
/// store that validates its (self-signed, "localhost") certificate.
pub async fn spawn_echo_tls_server() -> (SocketAddr, RootCertStore) {
    let certified_key =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("self-signed cert");
    let cert_der = rustls::pki_types::CertificateDer::from(certified_key.cert.der().to_vec());
    let key_der = rustls::pki_types::PrivateKeyDer::try_from(certified_key.key_pair.serialize_der())
        .expect("DER private key");

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .expect("server config");
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo server");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        loop {
            let (tcp, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(mut tls) = acceptor.accept(tcp).await {
                    let (mut rd, mut wr) = tokio::io::split(&mut tls);
                    let _ = tokio::io::copy(&mut rd, &mut wr).await;
                }
            });
        }
    });

    let mut roots = RootCertStore::empty();
    roots.add(cert_der).expect("add self-signed root");
    (addr, roots)
}

/// A `ClientConfig` that trusts only the echo server's certificate.
pub fn client_tls_config(roots: RootCertStore) -> Arc<ClientConfig> {
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// A small, fast-cycling pool configuration suitable for tests: short
/// timeout/backoff/ttl so warm-up and rotation happen in well under a
/// second instead of the production defaults.
pub fn test_pool_config(addr: SocketAddr, tls_config: Arc<ClientConfig>, size: usize) -> PoolConfig {
    PoolConfig {
        upstream_host: "localhost".to_string(),
        upstream_port: addr.port(),
        tls_config,
        dial_timeout: Duration::from_secs(2),
        backoff: Duration::from_millis(20),
        ttl: Duration::from_secs(30),
        size,
    }
}
