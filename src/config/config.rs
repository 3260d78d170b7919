use parking_lot::RwLock;
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use super::{
    backend::BackendConfig,
    cli::{BackendSource, CliConfig},
    types::LogLevel,
};
use crate::errors::ProxyError;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static ROOT_CONFIG: OnceLock<Arc<RwLock<Config>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- ProxySettings ---------------------------------------------------------

/// Per-connection knobs shared by the listener, forger and relay.
#[derive(Clone, Debug)]
pub struct ProxySettings {
    /// `None` waits forever for the client's handshake response.
    pub handshake_timeout: Option<Duration>,
    /// `None` never tears down a quiet relay direction.
    pub idle_timeout: Option<Duration>,
    /// Upper bound for any frame read during a handshake.
    pub max_handshake_packet: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(Duration::from_secs(30)),
            idle_timeout: None,
            max_handshake_packet: 64 * 1024,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: LogLevel,
    pub backend: Arc<BackendConfig>,
    pub settings: ProxySettings,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Async because the backend file is read with non-blocking IO.
    pub async fn init() -> Result<(), ProxyError> {
        let cli = CliConfig::from_args();
        let next = Self::load(cli).await?;

        if let Some(handle) = ROOT_CONFIG.get() {
            *handle.write() = next;
        } else {
            let _ = ROOT_CONFIG.set(Arc::new(RwLock::new(next)));
        }

        Ok(())
    }

    pub fn snapshot() -> Config {
        Self::handle().read().clone()
    }

    pub async fn load(cli: CliConfig) -> Result<Config, ProxyError> {
        let backend = match &cli.backend {
            BackendSource::Dsn(dsn) => BackendConfig::from_dsn(dsn),
            BackendSource::File(path) => BackendConfig::from_file(path).await,
        }
        .map_err(|e| ProxyError::Config(e.to_string()))?;

        Ok(Config {
            listen_addr: cli.listen_addr,
            log_level: cli.log_level,
            backend: Arc::new(backend),
            settings: ProxySettings {
                handshake_timeout: cli.handshake_timeout,
                idle_timeout: cli.idle_timeout,
                max_handshake_packet: cli.max_handshake_packet,
            },
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Private -------------------------------------------------------

impl Config {
    fn handle() -> Arc<RwLock<Config>> {
        ROOT_CONFIG
            .get()
            .expect("Config not initialized; call Config::init().await first")
            .clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
