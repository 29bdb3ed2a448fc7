//! Target server roles and cached host states

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// What role the caller wants the chosen server to have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostRequirement {
    /// Any reachable server
    #[default]
    Any,
    /// A server that accepts writes
    Primary,
    /// A read-only standby
    Secondary,
    /// Standbys first, then anything
    PreferSecondary,
    /// Primaries first, then anything
    PreferPrimary,
}

impl HostRequirement {
    /// Whether a host in `status` may be attempted or kept
    pub fn allow_connecting_to(self, status: HostStatus) -> bool {
        match self {
            HostRequirement::Any
            | HostRequirement::PreferSecondary
            | HostRequirement::PreferPrimary => status != HostStatus::ConnectFail,
            HostRequirement::Primary => matches!(
                status,
                HostStatus::Unknown | HostStatus::ConnectOk | HostStatus::Primary
            ),
            HostRequirement::Secondary => matches!(
                status,
                HostStatus::Unknown | HostStatus::ConnectOk | HostStatus::Secondary
            ),
        }
    }

    /// Requirements tried in order when more than one host is configured
    pub(crate) fn phases(self) -> &'static [HostRequirement] {
        match self {
            HostRequirement::Any => &[HostRequirement::Any],
            HostRequirement::Primary => &[HostRequirement::Primary],
            HostRequirement::Secondary => &[HostRequirement::Secondary],
            HostRequirement::PreferSecondary => {
                &[HostRequirement::Secondary, HostRequirement::Any]
            }
            HostRequirement::PreferPrimary => &[HostRequirement::Primary, HostRequirement::Any],
        }
    }
}

impl fmt::Display for HostRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostRequirement::Any => "any",
            HostRequirement::Primary => "primary",
            HostRequirement::Secondary => "secondary",
            HostRequirement::PreferSecondary => "preferSecondary",
            HostRequirement::PreferPrimary => "preferPrimary",
        };
        f.write_str(s)
    }
}

impl FromStr for HostRequirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "any" => Ok(HostRequirement::Any),
            "primary" | "master" => Ok(HostRequirement::Primary),
            "secondary" | "slave" => Ok(HostRequirement::Secondary),
            "preferSecondary" | "preferSlave" => Ok(HostRequirement::PreferSecondary),
            "preferPrimary" | "preferMaster" => Ok(HostRequirement::PreferPrimary),
            _ => Err(Error::Config(format!(
                "Invalid targetServerType value: {}",
                s
            ))),
        }
    }
}

/// Last known state of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostStatus {
    /// Never tried, or the cached entry expired
    #[default]
    Unknown,
    /// Authenticated, role not determined
    ConnectOk,
    /// Last attempt failed
    ConnectFail,
    /// Accepts writes
    Primary,
    /// Read-only standby
    Secondary,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostStatus::Unknown => "unknown",
            HostStatus::ConnectOk => "connect_ok",
            HostStatus::ConnectFail => "connect_fail",
            HostStatus::Primary => "primary",
            HostStatus::Secondary => "secondary",
        };
        f.write_str(s)
    }
}
