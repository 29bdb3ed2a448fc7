//! SCRAM authentication
//!
//! Implements the Salted Challenge Response Authentication Mechanism of
//! RFC 5802 / RFC 7677 for SCRAM-SHA-1, SCRAM-SHA-256 and SCRAM-SHA-256-PLUS.
//! The exchange is generic over [`ScramAlgorithm`], which also carries the
//! national-algorithm variant in [`super::national`].

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// SCRAM authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScramError {
    /// Invalid proof from server
    InvalidServerProof(String),
    /// Invalid server message format
    InvalidServerMessage(String),
    /// UTF-8 encoding/decoding error
    Utf8Error(String),
    /// Base64 decoding error
    Base64Error(String),
    /// Server ended the exchange with `e=<reason>`
    ServerError(String),
    /// No offered mechanism is usable
    NoCommonMechanism(String),
    /// A pluggable hash primitive failed
    Crypto(String),
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramError::InvalidServerProof(msg) => write!(f, "invalid server proof: {}", msg),
            ScramError::InvalidServerMessage(msg) => write!(f, "invalid server message: {}", msg),
            ScramError::Utf8Error(msg) => write!(f, "UTF-8 error: {}", msg),
            ScramError::Base64Error(msg) => write!(f, "Base64 error: {}", msg),
            ScramError::ServerError(msg) => write!(f, "SCRAM authentication failed: {}", msg),
            ScramError::NoCommonMechanism(msg) => write!(f, "{}", msg),
            ScramError::Crypto(msg) => write!(f, "hash primitive failed: {}", msg),
        }
    }
}

impl std::error::Error for ScramError {}

impl From<ScramError> for crate::Error {
    fn from(err: ScramError) -> Self {
        match err {
            ScramError::InvalidServerProof(msg) => crate::Error::SignatureMismatch(msg),
            ScramError::ServerError(msg) => crate::Error::Rejected {
                message: msg,
                sql_state: None,
            },
            ScramError::NoCommonMechanism(msg) => crate::Error::UnsupportedMechanism(msg),
            ScramError::Crypto(msg) => crate::Error::Provider(msg),
            other => crate::Error::Protocol(other.to_string()),
        }
    }
}

/// Key-derivation and keyed-hash primitives of one SCRAM mechanism.
///
/// With `keyed(k, d)` and `digest(d)` the exchange computes:
/// `ClientKey = keyed(SaltedPassword, "Client Key")`,
/// `StoredKey = digest(ClientKey)`,
/// `ServerKey = keyed(SaltedPassword, "Server Key")`,
/// and signatures as `keyed(key, AuthMessage)`.
pub trait ScramAlgorithm: Send + Sync {
    /// Base mechanism name, without `-PLUS`
    fn name(&self) -> &'static str;

    /// `Hi(password, salt, iterations)`
    fn salted_password(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
    ) -> Result<Vec<u8>, ScramError>;

    /// Keyed hash of `data`
    fn keyed(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, ScramError>;

    /// Unkeyed hash of `data`
    fn digest(&self, data: &[u8]) -> Result<Vec<u8>, ScramError>;
}

/// The RFC mechanisms, built from HMAC and PBKDF2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardAlgorithm {
    /// SCRAM-SHA-1
    Sha1,
    /// SCRAM-SHA-256
    Sha256,
}

impl ScramAlgorithm for StandardAlgorithm {
    fn name(&self) -> &'static str {
        match self {
            StandardAlgorithm::Sha1 => "SCRAM-SHA-1",
            StandardAlgorithm::Sha256 => "SCRAM-SHA-256",
        }
    }

    fn salted_password(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
    ) -> Result<Vec<u8>, ScramError> {
        let (result, len) = match self {
            StandardAlgorithm::Sha1 => {
                let mut out = vec![0u8; 20];
                (pbkdf2::<HmacSha1>(password, salt, iterations, &mut out), out)
            }
            StandardAlgorithm::Sha256 => {
                let mut out = vec![0u8; 32];
                (pbkdf2::<HmacSha256>(password, salt, iterations, &mut out), out)
            }
        };
        result.map_err(|_| ScramError::Crypto("PBKDF2 key length".to_string()))?;
        Ok(len)
    }

    fn keyed(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, ScramError> {
        match self {
            StandardAlgorithm::Sha1 => {
                let mut mac = HmacSha1::new_from_slice(key)
                    .map_err(|_| ScramError::Crypto("HMAC key error".to_string()))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            StandardAlgorithm::Sha256 => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .map_err(|_| ScramError::Crypto("HMAC key error".to_string()))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    fn digest(&self, data: &[u8]) -> Result<Vec<u8>, ScramError> {
        Ok(match self {
            StandardAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            StandardAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        })
    }
}

/// Channel binding type for SCRAM authentication
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelBinding {
    /// Client does not support channel binding (`n`)
    None,
    /// Client supports it but the server did not offer it (`y`)
    Unused,
    /// tls-server-end-point: SHA-256 hash of the server's DER-encoded certificate
    TlsServerEndPoint(Vec<u8>),
}

/// Channel binding policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelBindingMode {
    /// Never bind
    Disable,
    /// Bind when the server offers a `-PLUS` mechanism over TLS
    #[default]
    Prefer,
    /// Fail unless binding is possible
    Require,
}

impl std::str::FromStr for ChannelBindingMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            _ => Err(crate::Error::Config(format!(
                "invalid channelBinding '{}': expected disable, prefer, or require",
                s
            ))),
        }
    }
}

/// Choose the strongest usable standard mechanism from the server's list.
///
/// `binding_data` is the `tls-server-end-point` hash when the transport is
/// encrypted.
pub fn select_mechanism(
    offered: &[String],
    binding_data: Option<Vec<u8>>,
    mode: ChannelBindingMode,
) -> Result<(StandardAlgorithm, ChannelBinding), ScramError> {
    let offers = |name: &str| offered.iter().any(|m| m == name);

    if let Some(data) = binding_data.clone() {
        if mode != ChannelBindingMode::Disable && offers("SCRAM-SHA-256-PLUS") {
            return Ok((
                StandardAlgorithm::Sha256,
                ChannelBinding::TlsServerEndPoint(data),
            ));
        }
    }
    if mode == ChannelBindingMode::Require {
        return Err(ScramError::NoCommonMechanism(
            "channel binding required but SCRAM-SHA-256-PLUS over TLS is not available"
                .to_string(),
        ));
    }

    let binding = match (binding_data, mode) {
        (Some(_), ChannelBindingMode::Prefer) => ChannelBinding::Unused,
        _ => ChannelBinding::None,
    };
    if offers("SCRAM-SHA-256") {
        return Ok((StandardAlgorithm::Sha256, binding));
    }
    if offers("SCRAM-SHA-1") {
        return Ok((StandardAlgorithm::Sha1, binding));
    }
    Err(ScramError::NoCommonMechanism(format!(
        "none of the server's SASL authentication mechanisms are supported: {}",
        offered.join(", ")
    )))
}

/// Internal state needed to verify the server-final message
#[derive(Clone, Debug)]
pub struct ScramState {
    /// Combined authentication message (for verification)
    auth_message: Vec<u8>,
    /// Server key (for verification calculation)
    server_key: Vec<u8>,
}

/// SCRAM client for one exchange
pub struct ScramClient {
    username: String,
    password: String,
    nonce: String,
    channel_binding: ChannelBinding,
    algorithm: Arc<dyn ScramAlgorithm>,
    auth_message: Option<String>,
}

impl fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramClient")
            .field("username", &self.username)
            .field("mechanism", &self.mechanism())
            .field("channel_binding", &self.channel_binding)
            .finish_non_exhaustive()
    }
}

impl ScramClient {
    /// Create a SCRAM-SHA-256 client without channel binding
    pub fn new(username: String, password: String) -> Self {
        Self::with_algorithm(
            username,
            password,
            Arc::new(StandardAlgorithm::Sha256),
            ChannelBinding::None,
        )
    }

    /// Create a client for `algorithm` with the given channel binding
    pub fn with_algorithm(
        username: String,
        password: String,
        algorithm: Arc<dyn ScramAlgorithm>,
        channel_binding: ChannelBinding,
    ) -> Self {
        let mut rng = rand::thread_rng();
        let nonce_bytes: Vec<u8> = (0..24).map(|_| rng.gen()).collect();
        let nonce = BASE64.encode(&nonce_bytes);

        Self {
            username,
            password,
            nonce,
            channel_binding,
            algorithm,
            auth_message: None,
        }
    }

    /// Replace the random client nonce
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = nonce.into();
        self
    }

    /// Mechanism name sent in the SASLInitialResponse
    pub fn mechanism(&self) -> String {
        match self.channel_binding {
            ChannelBinding::TlsServerEndPoint(_) => format!("{}-PLUS", self.algorithm.name()),
            _ => self.algorithm.name().to_string(),
        }
    }

    /// GS2 header for the SCRAM exchange
    fn gs2_header(&self) -> &'static str {
        match self.channel_binding {
            ChannelBinding::None => "n,,",
            ChannelBinding::Unused => "y,,",
            ChannelBinding::TlsServerEndPoint(_) => "p=tls-server-end-point,,",
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", escape_username(&self.username), self.nonce)
    }

    /// Generate client first message
    pub fn client_first(&self) -> String {
        format!("{}{}", self.gs2_header(), self.client_first_bare())
    }

    /// Transcript over which both proofs are computed; the first call fixes it
    fn auth_message(&mut self, server_first: &str, client_final_without_proof: &str) -> &str {
        if self.auth_message.is_none() {
            self.auth_message = Some(format!(
                "{},{},{}",
                self.client_first_bare(),
                server_first,
                client_final_without_proof
            ));
        }
        self.auth_message.as_deref().unwrap_or_default()
    }

    /// Process server first message and generate client final message
    ///
    /// Returns (client_final_message, internal_state)
    pub fn client_final(&mut self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        let first = parse_server_first(server_first)?;

        if !first.nonce.starts_with(&self.nonce) || first.nonce.len() == self.nonce.len() {
            return Err(ScramError::InvalidServerMessage(
                "server nonce doesn't extend client nonce".to_string(),
            ));
        }

        let salt = BASE64
            .decode(&first.salt)
            .map_err(|_| ScramError::Base64Error("invalid salt encoding".to_string()))?;
        let iterations = first
            .iterations
            .parse::<u32>()
            .ok()
            .filter(|&i| i > 0)
            .ok_or_else(|| {
                ScramError::InvalidServerMessage("invalid iteration count".to_string())
            })?;

        // RFC 5802: c = base64(gs2-header + channel-binding-data)
        let mut cbind_input = self.gs2_header().as_bytes().to_vec();
        if let ChannelBinding::TlsServerEndPoint(data) = &self.channel_binding {
            cbind_input.extend_from_slice(data);
        }
        let client_final_without_proof =
            format!("c={},r={}", BASE64.encode(&cbind_input), first.nonce);

        let algorithm = self.algorithm.clone();
        let salted_password =
            algorithm.salted_password(self.password.as_bytes(), &salt, iterations)?;
        let client_key = algorithm.keyed(&salted_password, b"Client Key")?;
        let stored_key = algorithm.digest(&client_key)?;
        let server_key = algorithm.keyed(&salted_password, b"Server Key")?;

        let auth_message = self
            .auth_message(server_first, &client_final_without_proof)
            .to_string();
        let client_signature = algorithm.keyed(&stored_key, auth_message.as_bytes())?;

        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let client_final = format!("{},p={}", client_final_without_proof, BASE64.encode(&proof));

        let state = ScramState {
            auth_message: auth_message.into_bytes(),
            server_key,
        };

        Ok((client_final, state))
    }

    /// Verify server final message and confirm authentication
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        let first_attr = server_final.split(',').next().unwrap_or_default();

        if let Some(reason) = first_attr.strip_prefix("e=") {
            return Err(ScramError::ServerError(reason.to_string()));
        }

        let server_sig_encoded = first_attr
            .strip_prefix("v=")
            .ok_or_else(|| ScramError::InvalidServerMessage("missing 'v=' prefix".to_string()))?;

        let server_signature = BASE64.decode(server_sig_encoded).map_err(|_| {
            ScramError::Base64Error("invalid server signature encoding".to_string())
        })?;

        let expected_signature = self.algorithm.keyed(&state.server_key, &state.auth_message)?;

        if constant_time_compare(&server_signature, &expected_signature) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof(
                "server signature verification failed".to_string(),
            ))
        }
    }
}

/// `saslname`: `=` and `,` escaped as `=3D` and `=2C`
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

struct ServerFirst {
    nonce: String,
    salt: String,
    iterations: String,
}

/// Parse server first message format: r=<nonce>,s=<salt>,i=<iterations>
fn parse_server_first(msg: &str) -> Result<ServerFirst, ScramError> {
    if msg.starts_with("m=") {
        return Err(ScramError::InvalidServerMessage(
            "unsupported mandatory extension".to_string(),
        ));
    }

    let mut nonce = String::new();
    let mut salt = String::new();
    let mut iterations = String::new();

    for part in msg.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            nonce = value.to_string();
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = value.to_string();
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = value.to_string();
        }
    }

    if nonce.is_empty() || salt.is_empty() || iterations.is_empty() {
        return Err(ScramError::InvalidServerMessage(
            "missing required fields in server first message".to_string(),
        ));
    }

    Ok(ServerFirst {
        nonce,
        salt,
        iterations,
    })
}

/// Constant-time comparison over the full length of both inputs
pub(crate) fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
