//! High-level client API
//!
//! [`Connector`] walks the host list and returns a [`Session`];
//! [`ConnectionInfo`] parses URLs into a [`ConnectionConfig`](crate::connection::ConnectionConfig).

mod connection_string;
mod connector;
mod session;

pub use connection_string::ConnectionInfo;
pub use connector::Connector;
pub use session::Session;
