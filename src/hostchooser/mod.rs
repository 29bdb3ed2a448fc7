//! Host roster and failover
//!
//! Candidate hosts are produced lazily against a [`HostRequirement`], consulting
//! a shared [`HostStatusTracker`] that remembers what earlier attempts learned
//! about each endpoint.

mod chooser;
mod requirement;
mod tracker;

pub use chooser::{CandidateHost, Candidates, HostChooser};
pub use requirement::{HostRequirement, HostStatus};
pub use tracker::HostStatusTracker;

use std::fmt;

/// Default PostgreSQL port
pub const DEFAULT_PORT: u16 = 5432;

/// A server address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostEndpoint {
    /// Host name or IP literal
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl HostEndpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(HostEndpoint::new("db1", 5432).to_string(), "db1:5432");
        assert_eq!(HostEndpoint::new("::1", 5433).to_string(), "[::1]:5433");
    }
}
