pub mod connection;
pub mod registry;

pub use connection::{ConnId, Connection, Outgoing};
pub use registry::{Binding, SessionError, SessionRegistry, TokenGrant};
