//! Error types

use crate::hostchooser::{HostEndpoint, HostRequirement};
use crate::protocol::ErrorFields;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure classes callers and the failover loop branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Socket closed, reset, timed out, or TLS handshake failure
    IoFailure,
    /// Unexpected frame or byte from the server
    ProtocolViolation,
    /// The server sent an error frame or refused the connection
    ServerRejected,
    /// Requested mechanism not implemented or not available in this build
    UnsupportedMechanism,
    /// SCRAM server signature did not verify
    SignatureMismatch,
    /// Missing or invalid client-side configuration
    ConfigurationError,
    /// Every candidate host was tried or skipped
    NoSuitableHost,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::IoFailure => "io_failure",
            ErrorCategory::ProtocolViolation => "protocol_violation",
            ErrorCategory::ServerRejected => "server_rejected",
            ErrorCategory::UnsupportedMechanism => "unsupported_mechanism",
            ErrorCategory::SignatureMismatch => "signature_mismatch",
            ErrorCategory::ConfigurationError => "configuration_error",
            ErrorCategory::NoSuitableHost => "no_suitable_host",
        };
        f.write_str(s)
    }
}

/// Connection-layer error
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the socket mid-conversation
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Connect or read deadline elapsed
    #[error("timed out while {0}")]
    Timeout(String),

    /// TLS handshake or peer verification failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// ErrorResponse from the server
    #[error("server error: {0}")]
    Server(ErrorFields),

    /// Server-side refusal that did not arrive as an ErrorResponse
    #[error("{message}")]
    Rejected {
        /// Human-readable reason
        message: String,
        /// SQLSTATE attached by the client, if any
        sql_state: Option<&'static str>,
    },

    /// Authentication mechanism not implemented or not available
    #[error("unsupported authentication: {0}")]
    UnsupportedMechanism(String),

    /// Server proof did not match the locally computed signature
    #[error("server signature verification failed: {0}")]
    SignatureMismatch(String),

    /// Configuration error
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An external credential or crypto provider failed
    #[error("credential provider failed: {0}")]
    Provider(String),

    /// Operation attempted in the wrong connection state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Candidate hosts exhausted without a usable server
    #[error("Could not find a server with specified targetServerType: {0}")]
    NoSuitableHost(HostRequirement),

    /// Failure of a specific endpoint, optionally with the error raised by
    /// the SSL-mode fallback attempt
    #[error("{endpoint}: {source}")]
    Connect {
        /// Endpoint that failed
        endpoint: HostEndpoint,
        /// Error of the primary attempt
        #[source]
        source: Box<Error>,
        /// Error of the fallback attempt, when one was made
        fallback: Option<Box<Error>>,
    },
}

impl Error {
    /// Failure class; `Connect` reports the class of its primary error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::Timeout(_) | Error::Tls(_) => {
                ErrorCategory::IoFailure
            }
            Error::Protocol(_) => ErrorCategory::ProtocolViolation,
            Error::Server(_) | Error::Rejected { .. } => ErrorCategory::ServerRejected,
            Error::UnsupportedMechanism(_) => ErrorCategory::UnsupportedMechanism,
            Error::SignatureMismatch(_) => ErrorCategory::SignatureMismatch,
            Error::Config(_) | Error::Provider(_) | Error::InvalidState { .. } => {
                ErrorCategory::ConfigurationError
            }
            Error::NoSuitableHost(_) => ErrorCategory::NoSuitableHost,
            Error::Connect { source, .. } => source.category(),
        }
    }

    /// SQLSTATE of a server error, if known
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            Error::Rejected { sql_state, .. } => *sql_state,
            Error::Connect { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Endpoint the error is attributed to
    pub fn endpoint(&self) -> Option<&HostEndpoint> {
        match self {
            Error::Connect { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Error raised by the SSL-mode fallback attempt, if one was made
    pub fn fallback(&self) -> Option<&Error> {
        match self {
            Error::Connect { fallback, .. } => fallback.as_deref(),
            _ => None,
        }
    }

    /// Whether the failure should mark the host as unreachable in the
    /// host status cache
    pub fn marks_host_unreachable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::IoFailure | ErrorCategory::ServerRejected
        )
    }

    /// Attach an endpoint, unless one is already attached
    pub(crate) fn at(self, endpoint: &HostEndpoint) -> Error {
        match self {
            err @ Error::Connect { .. } => err,
            other => Error::Connect {
                endpoint: endpoint.clone(),
                source: Box::new(other),
                fallback: None,
            },
        }
    }
}
