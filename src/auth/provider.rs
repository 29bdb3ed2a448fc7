//! Pluggable credential and crypto collaborators

use super::delegated::DelegatedAuthProvider;
use super::vendor::SystemIdentity;
use crate::{Error, Result};
use rand::RngCore;
use std::fmt;
use std::sync::Arc;

/// Source of the local identity material the vendor mechanisms send
pub trait IdentitySource: Send + Sync {
    /// Hardware addresses of the local network interfaces
    fn mac_addresses(&self) -> Result<Vec<[u8; 6]>>;

    /// Encoded software watermark
    fn watermark(&self) -> Result<Vec<u8>> {
        Err(Error::UnsupportedMechanism(
            "no watermark source configured".into(),
        ))
    }

    /// Per-user application key
    fn app_key(&self, _user: &str) -> Result<String> {
        Err(Error::UnsupportedMechanism("no app key source configured".into()))
    }

    /// Per-user MAC code
    fn mac_code(&self, _user: &str) -> Result<String> {
        Err(Error::UnsupportedMechanism(
            "no MAC code source configured".into(),
        ))
    }
}

/// Signs the vendor challenge with the user's certificate
pub trait ChallengeSigner: Send + Sync {
    /// Signature of `buf` under `user`'s key
    fn sign(&self, user: &str, buf: &[u8]) -> Result<Vec<u8>>;

    /// `len` random bytes for the client half of the challenge
    fn random(&self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut out);
        Ok(out)
    }
}

/// Keyed block hash used by the national SCRAM variant
pub trait NationalHash: Send + Sync {
    /// `H(key, data)`
    fn block_hash(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;
}

/// The set of collaborators available to the authentication loop
#[derive(Clone)]
pub struct AuthProviders {
    identity: Arc<dyn IdentitySource>,
    signer: Option<Arc<dyn ChallengeSigner>>,
    national_hash: Option<Arc<dyn NationalHash>>,
    delegated: Option<Arc<dyn DelegatedAuthProvider>>,
}

impl Default for AuthProviders {
    fn default() -> Self {
        Self {
            identity: Arc::new(SystemIdentity),
            signer: None,
            national_hash: None,
            delegated: None,
        }
    }
}

impl fmt::Debug for AuthProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProviders")
            .field("signer", &self.signer.is_some())
            .field("national_hash", &self.national_hash.is_some())
            .field("delegated", &self.delegated.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthProviders {
    /// Replace the identity source
    pub fn identity(mut self, identity: Arc<dyn IdentitySource>) -> Self {
        self.identity = identity;
        self
    }

    /// Set the challenge signer
    pub fn signer(mut self, signer: Arc<dyn ChallengeSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Set the national block hash
    pub fn national_hash(mut self, hash: Arc<dyn NationalHash>) -> Self {
        self.national_hash = Some(hash);
        self
    }

    /// Set the Kerberos/SSPI context provider
    pub fn delegated(mut self, provider: Arc<dyn DelegatedAuthProvider>) -> Self {
        self.delegated = Some(provider);
        self
    }

    /// Identity lookups, [`SystemIdentity`] unless replaced
    pub fn identity_source(&self) -> &dyn IdentitySource {
        self.identity.as_ref()
    }

    /// Signer for the signed-challenge exchange, if configured
    pub fn challenge_signer(&self) -> Option<&dyn ChallengeSigner> {
        self.signer.as_deref()
    }

    /// Block hash backing SCRAM-GM-256
    pub fn national(&self) -> Option<Arc<dyn NationalHash>> {
        self.national_hash.clone()
    }

    /// GSS/SSPI context factory
    pub fn delegated_provider(&self) -> Option<&dyn DelegatedAuthProvider> {
        self.delegated.as_deref()
    }
}
