//! Listener and dispatcher: bind, report the port, accept, one task per client.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::backend::BackendConnector;
use crate::config::{BackendConfig, ProxySettings};
use crate::errors::ProxyError;
use crate::frontend::FrontendConnection;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const LISTEN_BACKLOG: u32 = 1024;

// -----------------------------------------------------------------------------
// ----- ListenerState ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Bound,
    Serving,
    Stopped,
}

// -----------------------------------------------------------------------------
// ----- Proxy -----------------------------------------------------------------

pub struct Proxy {
    listen_addr: SocketAddr,
    backend: Arc<BackendConfig>,
    connector: Arc<dyn BackendConnector>,
    settings: ProxySettings,
    state: ListenerState,
}

// -----------------------------------------------------------------------------
// ----- Proxy: Static ---------------------------------------------------------

impl Proxy {
    pub fn new(
        listen_addr: SocketAddr,
        backend: Arc<BackendConfig>,
        connector: Arc<dyn BackendConnector>,
        settings: ProxySettings,
    ) -> Self {
        Self {
            listen_addr,
            backend,
            connector,
            settings,
            state: ListenerState::Unbound,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Proxy: Public ---------------------------------------------------------

impl Proxy {
    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Bind, report the bound port once through `port_tx`, then accept until
    /// `shutdown` flips to true (or its sender goes away).
    ///
    /// Only a bind failure is returned; accept and per-connection errors are
    /// logged and the loop keeps going. Connections already handed off keep
    /// running after shutdown.
    pub async fn listen_and_serve(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        port_tx: Option<oneshot::Sender<u16>>,
    ) -> Result<(), ProxyError> {
        let listener = self.bind()?;
        self.state = ListenerState::Bound;

        let local = listener.local_addr().map_err(|source| ProxyError::Bind {
            addr: self.listen_addr.to_string(),
            source,
        })?;
        info!(addr = %local, backend = %self.backend.address(), "proxy listening");

        if let Some(tx) = port_tx {
            // The caller may have stopped waiting; that is not our problem.
            let _ = tx.send(local.port());
        }

        self.state = ListenerState::Serving;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(e) => {
                        let err = ProxyError::Accept(e);
                        warn!(error = %err, class = ?err.class(), "accept failed; continuing");
                    }
                },
            }
        }

        self.state = ListenerState::Stopped;
        info!(addr = %local, "proxy stopped accepting");
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Proxy: Private --------------------------------------------------------

impl Proxy {
    fn bind(&self) -> Result<TcpListener, ProxyError> {
        let bind_error = |source| ProxyError::Bind {
            addr: self.listen_addr.to_string(),
            source,
        };

        let socket = if self.listen_addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;

        socket.bind(self.listen_addr).map_err(bind_error)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_error)
    }

    fn dispatch(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        debug!(peer = %peer, "accepted client");

        let conn = FrontendConnection::new(
            stream,
            peer,
            Arc::clone(&self.backend),
            Arc::clone(&self.connector),
            self.settings.clone(),
        );

        tokio::spawn(async move {
            match conn.serve().await {
                Ok(_) => debug!(peer = %peer, "client disconnected"),
                Err(e @ (ProxyError::BackendUnavailable(_) | ProxyError::BackendAuthFailed(_))) => {
                    error!(peer = %peer, error = %e, "backend login failed; dropping client")
                }
                Err(e) => warn!(peer = %peer, error = %e, "client connection failed"),
            }
        });
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
