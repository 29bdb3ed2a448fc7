//! Shared cache of per-host connection outcomes

use super::{HostEndpoint, HostStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct StatusEntry {
    status: HostStatus,
    updated: Instant,
}

/// Thread-safe map from endpoint to last known [`HostStatus`]
///
/// Entries are created on first report, overwritten by every later report
/// and never removed. Readers pass a maximum age; older entries read back as
/// [`HostStatus::Unknown`].
#[derive(Debug, Default)]
pub struct HostStatusTracker {
    entries: RwLock<HashMap<HostEndpoint, StatusEntry>>,
}

static GLOBAL: OnceLock<Arc<HostStatusTracker>> = OnceLock::new();

impl HostStatusTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide tracker shared by connectors that were not given one
    pub fn global() -> Arc<HostStatusTracker> {
        GLOBAL
            .get_or_init(|| Arc::new(HostStatusTracker::new()))
            .clone()
    }

    /// Record the outcome of an attempt against `endpoint`
    pub fn report(&self, endpoint: &HostEndpoint, status: HostStatus) {
        tracing::trace!(host = %endpoint, %status, "host status reported");
        self.entries.write().insert(
            endpoint.clone(),
            StatusEntry {
                status,
                updated: Instant::now(),
            },
        );
    }

    /// Cached status, or `Unknown` when missing or older than `max_age`
    pub fn status(&self, endpoint: &HostEndpoint, max_age: Duration) -> HostStatus {
        match self.entries.read().get(endpoint) {
            Some(entry) if entry.updated.elapsed() <= max_age => entry.status,
            _ => HostStatus::Unknown,
        }
    }

    /// Number of endpoints ever reported
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been reported yet
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
