pub mod backend;
pub mod cli;
#[allow(clippy::module_inception)]
pub mod config;
pub mod types;

pub use backend::{BackendConfig, BackendConfigError};
pub use config::{Config, ProxySettings};
pub use types::{LogLevel, TlsMode};
