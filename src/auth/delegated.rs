//! Delegated (Kerberos / SSPI) authentication contexts

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Which delegated library to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GssLib {
    /// Kerberos for GSS requests, SSPI for SSPI requests when available
    #[default]
    Auto,
    /// Always Kerberos
    Gssapi,
    /// Always SSPI; fails where SSPI is not available
    Sspi,
}

impl fmt::Display for GssLib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GssLib::Auto => "auto",
            GssLib::Gssapi => "gssapi",
            GssLib::Sspi => "sspi",
        })
    }
}

impl FromStr for GssLib {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(GssLib::Auto),
            "gssapi" => Ok(GssLib::Gssapi),
            "sspi" => Ok(GssLib::Sspi),
            _ => Err(Error::Config(format!(
                "invalid gsslib '{}': expected auto, gssapi, or sspi",
                s
            ))),
        }
    }
}

/// The server's delegated-auth request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegatedRequest {
    /// AuthenticationGSS
    Gss,
    /// AuthenticationSSPI
    Sspi,
}

/// What a delegated context authenticates against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedTarget {
    /// Server host name used for the service principal
    pub host: String,
    /// Database user
    pub user: String,
    /// Kerberos service name, `postgres` by default
    pub service: String,
}

/// One in-progress Kerberos or SSPI exchange
pub trait DelegatedAuth: Send {
    /// Whether this context can run on the current machine
    fn is_supported(&self) -> bool;

    /// Produce the initial token
    fn start(&mut self) -> Result<Option<Vec<u8>>>;

    /// Consume a server token, producing the next reply if any
    fn continue_with(&mut self, token: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Release the context
    fn dispose(&mut self) -> Result<()>;
}

/// Factory for delegated contexts
pub trait DelegatedAuthProvider: Send + Sync {
    /// Open a GSSAPI context for `target`
    fn kerberos(&self, target: &DelegatedTarget) -> Result<Box<dyn DelegatedAuth>>;

    fn sspi(&self, _target: &DelegatedTarget) -> Result<Box<dyn DelegatedAuth>> {
        Err(Error::UnsupportedMechanism("SSPI is not available".into()))
    }
}

/// Pick and create the context for `request` under the `gsslib` policy
pub fn select_context(
    provider: Option<&dyn DelegatedAuthProvider>,
    request: DelegatedRequest,
    gsslib: GssLib,
    target: &DelegatedTarget,
) -> Result<Box<dyn DelegatedAuth>> {
    let provider = provider.ok_or_else(|| {
        Error::UnsupportedMechanism(
            "the server requested GSS/SSPI authentication but no provider is configured".into(),
        )
    })?;

    let use_kerberos = gsslib == GssLib::Gssapi
        || (request == DelegatedRequest::Gss && gsslib != GssLib::Sspi);
    if use_kerberos {
        tracing::debug!(?request, %gsslib, "using Kerberos context");
        return provider.kerberos(target);
    }

    if cfg!(windows) {
        match provider.sspi(target) {
            Ok(ctx) if ctx.is_supported() => {
                tracing::debug!(?request, "using SSPI context");
                return Ok(ctx);
            }
            Ok(_) => tracing::debug!("SSPI context reported unsupported"),
            Err(e) => tracing::debug!(error = %e, "SSPI context unavailable"),
        }
    }

    if gsslib == GssLib::Sspi {
        return Err(Error::Config(
            "SSPI forced with gsslib=sspi, but SSPI not available".into(),
        ));
    }
    tracing::debug!(?request, "SSPI unavailable, falling back to Kerberos");
    provider.kerberos(target)
}

/// Release `ctx`; failures are logged, never propagated
pub fn dispose_quietly(ctx: &mut dyn DelegatedAuth) {
    if let Err(e) = ctx.dispose() {
        tracing::warn!(error = %e, "failed to dispose delegated auth context");
    }
}
