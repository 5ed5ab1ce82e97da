//! Command-line surface: a flat set of flags/positionals, no config file.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "pooled-tls-proxy", version, about = "Pooling TLS wrapper")]
pub struct Cli {
    /// Target hostname
    pub dst_address: String,

    /// Target port
    #[arg(value_parser = parse_nonzero_port)]
    pub dst_port: u16,

    /// Logging verbosity
    #[arg(short = 'v', long, default_value = "info")]
    pub verbosity: String,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long)]
    pub logfile: Option<PathBuf>,

    /// Bind address
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    pub bind_address: String,

    /// Bind port
    #[arg(short = 'p', long, default_value_t = 57800)]
    pub bind_port: u16,

    /// Connection pool size
    #[arg(short = 'n', long, default_value_t = 25)]
    pub pool_size: usize,

    /// Delay after connection attempt failure, in seconds
    #[arg(short = 'B', long, default_value_t = 5.0)]
    pub backoff: f64,

    /// Lifetime of an idle pooled connection, in seconds
    #[arg(short = 'T', long, default_value_t = 30.0)]
    pub ttl: f64,

    /// Upstream connect + handshake timeout, in seconds
    #[arg(short = 'w', long, default_value_t = 4.0)]
    pub timeout: f64,

    /// Client certificate for upstream TLS auth
    #[arg(short = 'c', long, requires = "key")]
    pub cert: Option<PathBuf>,

    /// Key for the client certificate
    #[arg(short = 'k', long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// Override the default CA trust set with one from this file
    #[arg(short = 'C', long)]
    pub cafile: Option<PathBuf>,

    /// Do not check hostname in the upstream cert subject. Requires --cafile.
    #[arg(long = "no-hostname-check", default_value_t = false)]
    pub no_hostname_check: bool,
}

impl Cli {
    /// Validate cross-flag constraints that `clap` itself can't express.
    /// Returns the CLI on success; on conflict, returns the message the
    /// caller should print before exiting with status 2.
    pub fn validated(self) -> Result<Self, String> {
        if self.no_hostname_check && self.cafile.is_none() {
            return Err(
                "--no-hostname-check requires --cafile: hostname checking \
                 can only be disabled against an explicit, private trust root"
                    .to_string(),
            );
        }
        if self.pool_size == 0 {
            return Err("--pool-size must be positive".to_string());
        }
        if self.backoff <= 0.0 || self.ttl <= 0.0 || self.timeout <= 0.0 {
            return Err("--backoff, --ttl and --timeout must be positive".to_string());
        }
        Ok(self)
    }
}

fn parse_nonzero_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("`{s}` is not a valid port"))?;
    if port == 0 {
        return Err("port 0 is not a valid destination port".to_string());
    }
    Ok(port)
}
