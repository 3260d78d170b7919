pub mod backend;
pub mod config;
pub mod errors;
pub mod frontend;
pub mod relay;
pub mod server;
pub mod tls;
pub mod wire;

pub use backend::{BackendConnector, BackendLink, MysqlConnector};
pub use config::{BackendConfig, Config, ProxySettings};
pub use errors::{ErrorClass, ProxyError};
pub use frontend::connection::FrontendConnection;
pub use server::{ListenerState, Proxy};
