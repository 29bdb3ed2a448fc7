//! Connection state machine

use crate::{Error, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, nothing sent
    Initial,

    /// SSLRequest sent, awaiting the one-byte answer
    NegotiatingTls,

    /// Startup packet sent, awaiting the first authentication request
    StartupSent,

    /// Inside the authentication loop
    Authenticating,

    /// Authentication loop exited, draining until ReadyForQuery
    FinishingStartup,

    /// Ready for query
    Idle,

    /// Simple query in flight
    QueryInProgress,

    /// Closed
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Initial, NegotiatingTls)
                | (Initial, StartupSent)
                | (NegotiatingTls, StartupSent)
                | (StartupSent, Authenticating)
                | (Authenticating, FinishingStartup)
                | (FinishingStartup, Idle)
                | (Idle, QueryInProgress)
                | (QueryInProgress, Idle)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        tracing::trace!(from = %self, to = %next, "connection state");
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::NegotiatingTls => write!(f, "negotiating_tls"),
            Self::StartupSent => write!(f, "startup_sent"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::FinishingStartup => write!(f, "finishing_startup"),
            Self::Idle => write!(f, "idle"),
            Self::QueryInProgress => write!(f, "query_in_progress"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
