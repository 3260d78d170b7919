use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::{oneshot, watch};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use mysql_auth_proxy::{Config, MysqlConnector, Proxy};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "mysql-auth-proxy";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = Config::init().await {
        // No subscriber yet; stderr is all we have.
        eprintln!("{APP_NAME}: {e}");
        return ExitCode::FAILURE;
    }

    init_tracing();

    match run_until_signal().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "{} failed", APP_NAME);
            ExitCode::FAILURE
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

fn init_tracing() {
    let config = Config::snapshot();
    let filter =
        EnvFilter::try_new(config.log_level.as_str()).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_until_signal() -> Result<(), mysql_auth_proxy::ProxyError> {
    // Listener fields are fixed at startup.
    let config = Config::snapshot();
    let connector = MysqlConnector::new(&config.backend)?;

    let mut proxy = Proxy::new(
        config.listen_addr,
        Arc::clone(&config.backend),
        Arc::new(connector),
        config.settings.clone(),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Ok(port) = port_rx.await {
            info!("{} ready on port {}", APP_NAME, port);
        }
    });

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("{} shutting down", APP_NAME);
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would read as a shutdown request.
                error!(error = %e, "cannot listen for ctrl-c; running until killed");
                let _keep_open = stop_tx;
                std::future::pending::<()>().await;
            }
        }
    });

    proxy.listen_and_serve(stop_rx, Some(port_tx)).await
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
