use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, info};

use super::forger::forge_login;
use super::proxy_responses::ServerIdentity;
use super::session::ConnectionSession;
use crate::backend::BackendConnector;
use crate::config::{BackendConfig, ProxySettings};
use crate::errors::ProxyError;
use crate::relay::{RelayStats, relay};

// -----------------------------------------------------------------------------
// ----- FrontendConnection ----------------------------------------------------

/// One accepted client, from backend login through relay teardown.
pub struct FrontendConnection {
    stream: TcpStream,
    session: ConnectionSession,
    backend: Arc<BackendConfig>,
    connector: Arc<dyn BackendConnector>,
    settings: ProxySettings,
}

// -----------------------------------------------------------------------------
// ----- FrontendConnection: Static --------------------------------------------

impl FrontendConnection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        backend: Arc<BackendConfig>,
        connector: Arc<dyn BackendConnector>,
        settings: ProxySettings,
    ) -> Self {
        Self {
            stream,
            session: ConnectionSession::new(peer),
            backend,
            connector,
            settings,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- FrontendConnection: Public --------------------------------------------

impl FrontendConnection {
    /// Backend first: if it cannot be reached the client is dropped before it
    /// ever sees a greeting.
    pub async fn serve(mut self) -> Result<RelayStats, ProxyError> {
        let peer = self.session.peer();

        let link = self.connector.connect(&self.backend).await?;
        let identity = ServerIdentity::from_link(&link);

        forge_login(&mut self.stream, &mut self.session, &identity, &self.settings).await?;
        info!(peer = %peer, backend = %self.backend.address(), "client login forged; relaying");

        let stats = relay(self.stream, link.stream, self.settings.idle_timeout).await;
        debug!(
            peer = %peer,
            client_to_backend = stats.client_to_backend,
            backend_to_client = stats.backend_to_client,
            "relay finished"
        );

        Ok(stats)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
