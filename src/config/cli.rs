use clap::Parser;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use super::types::LogLevel;

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub listen_addr: SocketAddr,
    pub log_level: LogLevel,
    pub backend: BackendSource,
    pub handshake_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub max_handshake_packet: usize,
}

#[derive(Clone, Debug)]
pub enum BackendSource {
    Dsn(String),
    File(PathBuf),
}

impl CliConfig {
    /// Parse argv + env. Exits the process on `--help`, `--version` or bad input.
    pub fn from_args() -> Self {
        let args = Args::try_parse().unwrap_or_else(|e| e.exit());
        Self::from_parsed(args)
    }

    pub fn try_from_iter<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Args::try_parse_from(iter).map(Self::from_parsed)
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn from_parsed(args: Args) -> Self {
        let backend = match (args.backend, args.backend_file) {
            (Some(dsn), _) => BackendSource::Dsn(dsn),
            (None, Some(path)) => BackendSource::File(path),
            // the backend_source group requires one of the two
            (None, None) => BackendSource::Dsn(String::new()),
        };

        Self {
            listen_addr: SocketAddr::from((args.host, args.port)),
            log_level: args.log_level,
            backend,
            handshake_timeout: non_zero(args.handshake_timeout),
            idle_timeout: non_zero(args.idle_timeout),
            max_handshake_packet: args.max_handshake_packet,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "mysql-auth-proxy",
    version,
    about = "MySQL proxy that accepts any client login and relays to an authenticated backend"
)]
#[command(group(
    clap::ArgGroup::new("backend_source")
        .required(true)
        .args(["backend", "backend_file"]),
))]
struct Args {
    // IPv4 or IPv6 literal (e.g., 0.0.0.0, 127.0.0.1, ::, ::1).
    #[arg(long = "host", short = 'H', env = "MYSQL_AUTH_PROXY_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    // 0 picks an ephemeral port; the chosen one is logged.
    #[arg(long = "port", short = 'p', env = "MYSQL_AUTH_PROXY_PORT")]
    port: u16,

    #[arg(long = "log", default_value = "info")]
    log_level: LogLevel,

    // user:password@host:port/database?tls=preferred
    #[arg(long = "backend", env = "MYSQL_AUTH_PROXY_BACKEND", hide_env_values = true)]
    backend: Option<String>,

    // TOML file with a [backend] table.
    #[arg(long = "backend-file", env = "MYSQL_AUTH_PROXY_BACKEND_FILE")]
    backend_file: Option<PathBuf>,

    // "0s" waits forever for the client's handshake response.
    #[arg(long = "handshake-timeout", default_value = "30s", value_parser = humantime::parse_duration)]
    handshake_timeout: Duration,

    // "0s" disables the relay idle timeout.
    #[arg(long = "idle-timeout", default_value = "0s", value_parser = humantime::parse_duration)]
    idle_timeout: Duration,

    #[arg(long = "max-handshake-packet", default_value_t = 64 * 1024)]
    max_handshake_packet: usize,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
