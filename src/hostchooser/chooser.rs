//! Lazy candidate iteration over a host list

use super::{HostEndpoint, HostRequirement, HostStatusTracker};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

/// One host to attempt, with the role it must turn out to have
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateHost {
    /// Where to connect
    pub endpoint: HostEndpoint,
    /// Role the server must satisfy once connected
    pub requirement: HostRequirement,
}

/// Produces candidate hosts for one connection request
#[derive(Debug, Clone)]
pub struct HostChooser {
    hosts: Vec<HostEndpoint>,
    requirement: HostRequirement,
    tracker: Arc<HostStatusTracker>,
    recheck: Duration,
    load_balance: bool,
}

impl HostChooser {
    /// Create a chooser over `hosts` (in preference order)
    pub fn new(
        hosts: Vec<HostEndpoint>,
        requirement: HostRequirement,
        tracker: Arc<HostStatusTracker>,
    ) -> Self {
        Self {
            hosts,
            requirement,
            tracker,
            recheck: Duration::from_secs(10),
            load_balance: false,
        }
    }

    /// How long a cached status stays authoritative
    pub fn recheck_after(mut self, recheck: Duration) -> Self {
        self.recheck = recheck;
        self
    }

    /// Shuffle host order on every pass
    pub fn load_balance(mut self, enabled: bool) -> Self {
        self.load_balance = enabled;
        self
    }

    /// Requested role
    pub fn requirement(&self) -> HostRequirement {
        self.requirement
    }

    /// Start a fresh pass over the hosts
    ///
    /// The iterator reads the status cache as each candidate is produced, so
    /// failures reported during the pass affect later phases.
    pub fn candidates(&self) -> Candidates<'_> {
        let phases: &'static [HostRequirement] = if self.hosts.len() == 1 {
            &[]
        } else {
            self.requirement.phases()
        };
        Candidates {
            chooser: self,
            phases,
            phase: 0,
            order: self.ordering(),
            pos: 0,
            yielded: false,
            fallback: false,
            single_done: false,
        }
    }

    fn ordering(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.hosts.len()).collect();
        if self.load_balance {
            order.shuffle(&mut rand::thread_rng());
        }
        order
    }
}

/// Iterator returned by [`HostChooser::candidates`]
#[derive(Debug)]
pub struct Candidates<'a> {
    chooser: &'a HostChooser,
    phases: &'static [HostRequirement],
    phase: usize,
    order: Vec<usize>,
    pos: usize,
    yielded: bool,
    fallback: bool,
    single_done: bool,
}

impl Candidates<'_> {
    fn candidate(&self, index: usize, requirement: HostRequirement) -> CandidateHost {
        CandidateHost {
            endpoint: self.chooser.hosts[index].clone(),
            requirement,
        }
    }
}

impl Iterator for Candidates<'_> {
    type Item = CandidateHost;

    fn next(&mut self) -> Option<CandidateHost> {
        let chooser = self.chooser;

        if chooser.hosts.len() == 1 {
            if self.single_done {
                return None;
            }
            self.single_done = true;
            return Some(self.candidate(0, chooser.requirement));
        }

        while self.phase < self.phases.len() {
            let requirement = self.phases[self.phase];
            while self.pos < self.order.len() {
                let index = self.order[self.pos];
                self.pos += 1;
                let endpoint = &chooser.hosts[index];
                let status = chooser.tracker.status(endpoint, chooser.recheck);
                if requirement.allow_connecting_to(status) {
                    self.yielded = true;
                    return Some(self.candidate(index, requirement));
                }
                tracing::debug!(host = %endpoint, %status, %requirement, "skipping host");
            }
            self.phase += 1;
            self.pos = 0;
            self.order = chooser.ordering();
        }

        // Every host was filtered out: try them all once instead of giving up
        if !self.yielded && !self.fallback && !chooser.hosts.is_empty() {
            self.fallback = true;
            self.pos = 0;
            tracing::debug!("all hosts filtered by cached status, retrying every host");
        }
        if self.fallback && self.pos < self.order.len() {
            let requirement = self.phases.last().copied().unwrap_or(chooser.requirement);
            let index = self.order[self.pos];
            self.pos += 1;
            return Some(self.candidate(index, requirement));
        }
        None
    }
}
