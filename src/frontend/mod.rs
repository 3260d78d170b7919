pub mod connection;
pub mod forger;
pub mod session;

pub(crate) mod proxy_responses;

pub use connection::FrontendConnection;
pub use forger::forge_login;
pub use proxy_responses::ServerIdentity;
pub use session::{AuthStage, ConnectionSession};
