//! Establishes one TLS connection to the fixed upstream within a timeout,
//! distinguishing timeout from other failure. Fully cancel-safe — every
//! await point here is a single `tokio::select!` branch away from the
//! caller's cancellation.

use std::{sync::Arc, time::Duration};

use rustls::{pki_types::ServerName, ClientConfig};
use tokio::{net::TcpStream, time::timeout};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::debug;

use crate::error::DialError;

/// An established, TLS-handshaken duplex stream to the upstream. A thin
/// alias: `tokio_rustls::client::TlsStream<TcpStream>` already gives us a
/// byte-readable side, a byte-writable side, and an idempotent
/// `shutdown()`.
pub type Connection = TlsStream<TcpStream>;

#[derive(Clone)]
pub struct Dialer {
    host: String,
    port: u16,
    tls_config: Arc<ClientConfig>,
    dial_timeout: Duration,
}

impl Dialer {
    pub fn new(host: String, port: u16, tls_config: Arc<ClientConfig>, dial_timeout: Duration) -> Self {
        Self {
            host,
            port,
            tls_config,
            dial_timeout,
        }
    }

    /// TCP connect + TLS handshake to `(host, port)`, bounded by
    /// `dial_timeout`. Cancellation (the future being dropped) aborts any
    /// in-flight network wait and releases partial sockets — this falls out
    /// naturally from `TcpStream::connect`/`TlsConnector::connect` being
    /// ordinary cancel-safe futures with no intermediate state kept outside
    /// themselves.
    pub async fn dial(&self) -> Result<Connection, DialError> {
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|_| DialError::InvalidServerName(self.host.clone()))?;

        let attempt = async {
            let tcp = TcpStream::connect((self.host.as_str(), self.port))
                .await
                .map_err(DialError::Connect)?;
            let connector = TlsConnector::from(self.tls_config.clone());
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(DialError::Handshake)?;
            Ok(tls)
        };

        match timeout(self.dial_timeout, attempt).await {
            Ok(res) => {
                if res.is_ok() {
                    debug!("successfully built upstream connection");
                }
                res
            }
            Err(_) => Err(DialError::Timeout(self.dial_timeout)),
        }
    }
}
