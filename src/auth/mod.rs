//! Authentication mechanisms and their collaborators

pub mod delegated;
pub mod national;
pub mod password;
pub mod provider;
pub mod scram;
pub mod vendor;

pub use delegated::{
    dispose_quietly, select_context, DelegatedAuth, DelegatedAuthProvider, DelegatedRequest,
    DelegatedTarget, GssLib,
};
pub use national::NationalAlgorithm;
pub use password::compute_md5_password;
pub use provider::{AuthProviders, ChallengeSigner, IdentitySource, NationalHash};
pub use scram::{
    select_mechanism, ChannelBinding, ChannelBindingMode, ScramAlgorithm, ScramClient,
    ScramError, ScramState, StandardAlgorithm,
};
pub use vendor::{format_mac_list, SignedChallenge, SystemIdentity};
