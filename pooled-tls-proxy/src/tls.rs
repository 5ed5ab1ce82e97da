//! Builds the `rustls::ClientConfig` handed to the core's [`crate::dialer::Dialer`].
//!
//! The core never inspects the fields of the config it is given.
//! Everything in this module is CLI/file-loading plumbing, kept out of the
//! pool/relay core.

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use anyhow::{Context, Result};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use rustls_pemfile::{certs, pkcs8_private_keys};

use crate::cli::Cli;

fn cert_reader<P: AsRef<Path>>(cert_path: P) -> Result<Vec<CertificateDer<'static>>> {
    let cert_file = File::open(cert_path.as_ref())
        .with_context(|| format!("opening certificate file {}", cert_path.as_ref().display()))?;
    let mut reader = BufReader::new(cert_file);
    let parsed: Result<Vec<CertificateDer>, _> = certs(&mut reader).collect();
    Ok(parsed?)
}

fn privkey_reader<P: AsRef<Path>>(key_path: P) -> Result<PrivateKeyDer<'static>> {
    let key_file = File::open(key_path.as_ref())
        .with_context(|| format!("opening key file {}", key_path.as_ref().display()))?;
    let mut reader = BufReader::new(key_file);

    let key = pkcs8_private_keys(&mut reader)
        .next()
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("no PKCS8 key found in {}", key_path.as_ref().display()))?;

    Ok(PrivateKeyDer::Pkcs8(key))
}

fn load_root_store<P: AsRef<Path>>(ca_path: P) -> Result<RootCertStore> {
    let ca_certs = cert_reader(ca_path.as_ref())?;

    let mut root_store = RootCertStore::empty();
    root_store.add_parsable_certificates(ca_certs);

    if root_store.is_empty() {
        anyhow::bail!("CA file did not contain any valid certs");
    }
    Ok(root_store)
}

fn default_root_store() -> RootCertStore {
    RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned())
}

/// Verifies the certificate chain exactly as the standard webpki verifier
/// does, but tolerates a hostname mismatch. Only used when the operator has
/// supplied an explicit `--cafile` override and asked for
/// `--no-hostname-check`; this is never the default.
#[derive(Debug)]
struct ChainOnlyVerifier {
    inner: Arc<dyn ServerCertVerifier>,
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(ok) => Ok(ok),
            Err(rustls::Error::InvalidCertificate(rustls::CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Build the client TLS configuration from CLI-supplied material.
///
/// Honors: trust root (system roots by default, `--cafile` override),
/// optional client cert + key for mutual TLS, and `--no-hostname-check`
/// (only meaningful together with `--cafile`; `cli.rs` already rejected the
/// conflicting combination before this is called).
pub fn build_client_config(cli: &Cli) -> Result<ClientConfig> {
    let root_store = match &cli.cafile {
        Some(path) => load_root_store(path)?,
        None => default_root_store(),
    };

    let builder = ClientConfig::builder();

    let mut config = if cli.no_hostname_check {
        let verifier = rustls::client::WebPkiServerVerifier::builder(Arc::new(root_store))
            .build()
            .context("building webpki server verifier")?;
        let relaxed = Arc::new(ChainOnlyVerifier { inner: verifier });
        let dangerous = builder.dangerous().with_custom_certificate_verifier(relaxed);
        match (&cli.cert, &cli.key) {
            (Some(cert), Some(key)) => {
                let certs = cert_reader(cert)?;
                let privkey = privkey_reader(key)?;
                dangerous.with_client_auth_cert(certs, privkey)?
            }
            _ => dangerous.with_no_client_auth(),
        }
    } else {
        let with_roots = builder.with_root_certificates(root_store);
        match (&cli.cert, &cli.key) {
            (Some(cert), Some(key)) => {
                let certs = cert_reader(cert)?;
                let privkey = privkey_reader(key)?;
                with_roots.with_client_auth_cert(certs, privkey)?
            }
            _ => with_roots.with_no_client_auth(),
        }
    };

    config.alpn_protocols = vec![];
    Ok(config)
}
