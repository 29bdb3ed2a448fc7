//! Authenticated session handle

use crate::connection::{BackendKey, Connection};
use crate::hostchooser::{HostEndpoint, HostStatus};
use crate::protocol::BackendMessage;
use crate::Result;

/// A live, authenticated connection to one server
#[derive(Debug)]
pub struct Session {
    conn: Connection,
    role: HostStatus,
}

impl Session {
    pub(crate) fn new(conn: Connection, role: HostStatus) -> Self {
        Self { conn, role }
    }

    /// Server this session is connected to
    pub fn endpoint(&self) -> &HostEndpoint {
        self.conn.endpoint()
    }

    /// Role reported to the host status cache: `Primary` or `Secondary` when
    /// it was checked, `ConnectOk` otherwise
    pub fn role(&self) -> HostStatus {
        self.role
    }

    /// Whether the transport is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.conn.is_encrypted()
    }

    /// Every parameter the server reported
    pub fn server_params(&self) -> &[(String, String)] {
        self.conn.server_params()
    }

    /// One server parameter, e.g. `server_version`
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.conn.server_param(name)
    }

    /// Cancellation key
    pub fn backend_key(&self) -> Option<BackendKey> {
        self.conn.backend_key()
    }

    /// Execute one simple query and return the raw backend messages
    pub async fn simple_query(&mut self, query: &str) -> Result<Vec<BackendMessage>> {
        self.conn.simple_query(query).await
    }

    /// First column of the first row, as text
    pub async fn query_scalar(&mut self, query: &str) -> Result<Option<String>> {
        self.conn.query_scalar(query).await
    }

    /// Send Terminate and close the transport
    pub async fn close(self) -> Result<()> {
        self.conn.close().await
    }

    /// Underlying connection
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}
