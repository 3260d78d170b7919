pub mod auth;
mod backend_connection;
pub mod connector;
pub mod greeting;
pub mod stream;

pub use connector::{BackendConnector, BackendLink, MysqlConnector};
pub use greeting::ServerGreeting;
pub use stream::BackendStream;
