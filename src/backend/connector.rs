use std::fmt;

use async_trait::async_trait;
use tokio_rustls::TlsConnector;
use tracing::info;

use super::backend_connection::BackendConnection;
use super::greeting::ServerGreeting;
use super::stream::BackendStream;
use crate::config::BackendConfig;
use crate::errors::ProxyError;
use crate::tls;
use crate::wire::CapabilityFlags;

// -----------------------------------------------------------------------------
// ----- BackendLink -----------------------------------------------------------

/// An authenticated backend session, positioned right after the auth OK.
#[derive(Debug)]
pub struct BackendLink {
    pub stream: BackendStream,
    pub greeting: ServerGreeting,
    /// Flags negotiated with the backend (SSL included when upgraded).
    pub capabilities: CapabilityFlags,
    /// Status flags from the backend's auth OK.
    pub status_flags: u16,
}

// -----------------------------------------------------------------------------
// ----- BackendConnector ------------------------------------------------------

/// Opens real, credentialed backend sessions. The proxy core only talks to
/// this trait, so tests can substitute a scripted backend.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, config: &BackendConfig) -> Result<BackendLink, ProxyError>;
}

// -----------------------------------------------------------------------------
// ----- MysqlConnector --------------------------------------------------------

/// Speaks the MySQL login to the real backend. The TLS client config is
/// built once from the backend settings and shared by every connection.
#[derive(Clone, Default)]
pub struct MysqlConnector {
    tls: Option<TlsConnector>,
}

impl MysqlConnector {
    pub fn new(config: &BackendConfig) -> Result<Self, ProxyError> {
        let tls = tls::connector_for(config)
            .map_err(|e| ProxyError::Config(format!("backend tls: {e}")))?;
        Ok(Self { tls })
    }
}

impl fmt::Debug for MysqlConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlConnector")
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

#[async_trait]
impl BackendConnector for MysqlConnector {
    async fn connect(&self, config: &BackendConfig) -> Result<BackendLink, ProxyError> {
        let link = BackendConnection::connect(config, self.tls.as_ref())
            .await?
            .authenticate(config)
            .await?;

        info!(
            backend = %config.address(),
            user = %config.user,
            version = %link.greeting.server_version,
            tls = link.stream.is_tls(),
            "backend session ready"
        );

        Ok(link)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsMode;
    use std::path::PathBuf;

    fn backend(tls: TlsMode) -> BackendConfig {
        let mut cfg = BackendConfig::new("db.internal", 3306, "app", "pw");
        cfg.tls = tls;
        cfg
    }

    #[test]
    fn tls_connector_is_built_once_up_front() {
        assert!(MysqlConnector::new(&backend(TlsMode::Disabled)).unwrap().tls.is_none());
        assert!(MysqlConnector::new(&backend(TlsMode::Preferred)).unwrap().tls.is_some());
        assert!(MysqlConnector::default().tls.is_none());
    }

    #[test]
    fn bad_ca_file_fails_at_startup() {
        let mut cfg = backend(TlsMode::VerifyCa);
        cfg.tls_ca_file = Some(PathBuf::from("/nonexistent/ca.pem"));

        let Err(err) = MysqlConnector::new(&cfg) else {
            panic!("missing CA file must be rejected");
        };
        assert!(matches!(err, ProxyError::Config(_)));
        assert!(err.is_fatal());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
