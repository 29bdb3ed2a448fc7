//! Connection orchestration across hosts and SSL modes

use super::session::Session;
use crate::connection::{Connection, ConnectionConfig, SslMode};
use crate::hostchooser::{
    CandidateHost, HostChooser, HostEndpoint, HostRequirement, HostStatus, HostStatusTracker,
};
use crate::protocol::constants::sqlstate;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

/// Opens sessions for one configuration
///
/// Each call to [`connect`](Connector::connect) makes one pass over the
/// configured hosts, consulting and updating the host status tracker.
#[derive(Debug, Clone)]
pub struct Connector {
    config: ConnectionConfig,
    tracker: Arc<HostStatusTracker>,
}

impl Connector {
    /// Create a connector sharing the process-wide host status tracker
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_tracker(config, HostStatusTracker::global())
    }

    /// Create a connector with its own tracker
    pub fn with_tracker(config: ConnectionConfig, tracker: Arc<HostStatusTracker>) -> Self {
        Self { config, tracker }
    }

    /// Configuration this connector uses
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Host status tracker this connector reports to
    pub fn tracker(&self) -> &Arc<HostStatusTracker> {
        &self.tracker
    }

    /// Connect to the first suitable host
    ///
    /// # Errors
    ///
    /// Returns the last candidate's error, attributed to its endpoint, when
    /// the final attempt failed; `NoSuitableHost` when every candidate was
    /// skipped or connected with the wrong role.
    pub async fn connect(&self) -> Result<Session> {
        let config = &self.config;
        if config.hosts.is_empty() {
            return Err(Error::Config("no hosts configured".into()));
        }
        let requirement = config.target_server_type;

        async {
            let chooser = HostChooser::new(config.hosts.clone(), requirement, self.tracker.clone())
                .recheck_after(config.host_recheck)
                .load_balance(config.load_balance_hosts);

            // outcomes of this pass only; the tracker is for later passes
            let mut known: HashMap<HostEndpoint, HostStatus> = HashMap::new();
            let mut candidates = chooser.candidates().peekable();

            while let Some(candidate) = candidates.next() {
                let endpoint = candidate.endpoint.clone();
                if let Some(status) = known.get(&endpoint) {
                    if !candidate.requirement.allow_connecting_to(*status) {
                        tracing::debug!(
                            host = %endpoint,
                            %status,
                            required = %candidate.requirement,
                            "skipping host"
                        );
                        continue;
                    }
                }

                tracing::debug!(host = %endpoint, required = %candidate.requirement, "trying host");
                crate::metrics::counters::host_attempted(endpoint.to_string());

                match self.attempt(&candidate, &mut known).await {
                    Ok(Some(session)) => return Ok(session),
                    Ok(None) => {}
                    Err(e) => {
                        crate::metrics::counters::host_failed(
                            endpoint.to_string(),
                            e.category().to_string(),
                        );
                        if e.marks_host_unreachable() {
                            self.tracker.report(&endpoint, HostStatus::ConnectFail);
                            known.insert(endpoint.clone(), HostStatus::ConnectFail);
                        }
                        if candidates.peek().is_none() {
                            return Err(e.at(&endpoint));
                        }
                        tracing::debug!(host = %endpoint, error = %e, "attempt failed, trying next host");
                    }
                }
            }

            Err(Error::NoSuitableHost(requirement))
        }
        .instrument(tracing::info_span!(
            "connect",
            hosts = config.hosts.len(),
            target = %requirement
        ))
        .await
    }

    /// One host: establish, classify, report. `Ok(None)` when the server
    /// has the wrong role.
    async fn attempt(
        &self,
        candidate: &CandidateHost,
        known: &mut HashMap<HostEndpoint, HostStatus>,
    ) -> Result<Option<Session>> {
        let endpoint = &candidate.endpoint;
        let mut conn = self.establish_with_fallback(endpoint).await?;

        let status = if candidate.requirement == HostRequirement::Any {
            HostStatus::ConnectOk
        } else {
            detect_role(&mut conn).await?
        };
        self.tracker.report(endpoint, status);
        known.insert(endpoint.clone(), status);

        if !candidate.requirement.allow_connecting_to(status) {
            tracing::debug!(host = %endpoint, %status, required = %candidate.requirement, "host has the wrong role");
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "error closing rejected connection");
            }
            return Ok(None);
        }

        tracing::info!(host = %endpoint, %status, "connected");
        Ok(Some(Session::new(conn, status)))
    }

    /// Establish with the configured SSL mode, retrying once with the opposite
    /// mode when the server rejects the authorization under `prefer` or `allow`
    async fn establish_with_fallback(&self, endpoint: &HostEndpoint) -> Result<Connection> {
        let config = &self.config;
        let mode = config.sslmode;

        let err = match Connection::establish(endpoint, config, mode).await {
            Ok(conn) => return Ok(conn),
            Err(e) => e,
        };

        let Some(fallback) = fallback_mode(mode, &err) else {
            return Err(err);
        };

        tracing::debug!(host = %endpoint, from = %mode, to = %fallback, error = %err, "retrying with another SSL mode");
        crate::metrics::counters::ssl_fallback(mode.to_string(), fallback.to_string());

        match Connection::establish(endpoint, config, fallback).await {
            Ok(conn) => {
                tracing::debug!(host = %endpoint, encrypted = conn.is_encrypted(), "SSL fallback succeeded");
                Ok(conn)
            }
            Err(retry) => {
                tracing::debug!(host = %endpoint, error = %retry, "SSL fallback failed as well");
                Err(Error::Connect {
                    endpoint: endpoint.clone(),
                    source: Box::new(err),
                    fallback: Some(Box::new(retry)),
                })
            }
        }
    }
}

/// SSL mode to retry with after `err`, if any
fn fallback_mode(mode: SslMode, err: &Error) -> Option<SslMode> {
    if err.sql_state() != Some(sqlstate::INVALID_AUTHORIZATION_SPECIFICATION) {
        return None;
    }
    match mode {
        SslMode::Prefer => Some(SslMode::Disable),
        SslMode::Allow => Some(SslMode::Require),
        _ => None,
    }
}

/// `Primary` unless the server reports `transaction_read_only = on`
async fn detect_role(conn: &mut Connection) -> Result<HostStatus> {
    let read_only = conn.query_scalar("show transaction_read_only").await?;
    tracing::debug!(?read_only, "transaction_read_only");
    Ok(match read_only.as_deref() {
        Some(v) if v.eq_ignore_ascii_case("off") => HostStatus::Primary,
        _ => HostStatus::Secondary,
    })
}
