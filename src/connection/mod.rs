//! Connection management
//!
//! This module handles:
//! * Transport abstraction (plain TCP and TLS over TCP)
//! * Connection lifecycle (SSL negotiation, startup, authentication)
//! * State machine enforcement
//! * TLS configuration and support

mod conn;
mod state;
mod stream;
mod tls;
mod transport;

pub use conn::{
    parse_server_version, BackendKey, Connection, ConnectionConfig, ConnectionConfigBuilder,
    VendorParams,
};
pub use state::ConnectionState;
pub use stream::PgStream;
pub use tls::{
    default_cert_dir, parse_server_name, HostnameVerifier, SslMode, TlsConfig, TlsOptions,
    TlsOptionsBuilder,
};
pub use transport::{SocketOptions, Transport};
