//! TLS configuration for the SSLRequest upgrade.
//!
//! Certificate material follows the libpq layout: root certificates,
//! client certificate and client key default to files under
//! `~/.postgresql/` (`%APPDATA%\postgresql\` on Windows).

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::Item;
use rustls_pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime,
};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// SSL/TLS connection mode matching the PostgreSQL `sslmode` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SslMode {
    /// Never send an SSLRequest
    Disable,
    /// Start in cleartext; encryption only through the authorization fallback
    Allow,
    /// Request encryption, continue in cleartext if the server refuses
    #[default]
    Prefer,
    /// Encryption required, certificate not validated
    Require,
    /// Encryption required, certificate chain validated
    VerifyCa,
    /// Encryption required, chain and host name validated
    VerifyFull,
}

impl SslMode {
    /// Whether a refusal to encrypt is fatal
    pub fn requires_encryption(&self) -> bool {
        matches!(self, Self::Require | Self::VerifyCa | Self::VerifyFull)
    }

    /// Whether the server certificate chain is validated
    pub fn verify_certificate(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }

    /// Whether the certificate must match the host name
    pub fn verify_peer_name(&self) -> bool {
        matches!(self, Self::VerifyFull)
    }

    /// Whether an SSLRequest is sent at all
    pub fn sends_request(&self) -> bool {
        !matches!(self, Self::Disable | Self::Allow)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Allow => write!(f, "allow"),
            Self::Prefer => write!(f, "prefer"),
            Self::Require => write!(f, "require"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "allow" => Ok(Self::Allow),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!(
                "invalid sslmode '{}': expected disable, allow, prefer, require, verify-ca, or verify-full",
                s
            ))),
        }
    }
}

/// Application-supplied check of the server identity, run after the handshake
/// in place of the built-in host name match.
pub trait HostnameVerifier: Send + Sync {
    /// Return `true` when `peer_cert` is acceptable for `hostname`
    fn verify(&self, hostname: &str, peer_cert: &CertificateDer<'_>) -> bool;
}

/// Certificate locations and verification hooks.
///
/// # Examples
///
/// ```ignore
/// use herodb_wire::connection::TlsOptions;
///
/// let tls = TlsOptions::builder()
///     .root_cert("/etc/herodb/root.crt")
///     .client_cert("/etc/herodb/client.crt", "/etc/herodb/client.pk8")
///     .build();
/// ```
#[derive(Clone, Default)]
pub struct TlsOptions {
    root_cert: Option<PathBuf>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    native_roots: bool,
    hostname_verifier: Option<Arc<dyn HostnameVerifier>>,
}

impl TlsOptions {
    /// Create a new builder
    pub fn builder() -> TlsOptionsBuilder {
        TlsOptionsBuilder::default()
    }

    /// Explicit root certificate path, if any
    pub fn root_cert(&self) -> Option<&Path> {
        self.root_cert.as_deref()
    }

    /// Explicit client certificate path, if any
    pub fn client_cert(&self) -> Option<&Path> {
        self.client_cert.as_deref()
    }

    /// Explicit client key path, if any
    pub fn client_key(&self) -> Option<&Path> {
        self.client_key.as_deref()
    }
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("root_cert", &self.root_cert)
            .field("client_cert", &self.client_cert)
            .field("client_key", &self.client_key)
            .field("native_roots", &self.native_roots)
            .field(
                "hostname_verifier",
                &self.hostname_verifier.as_ref().map(|_| "<custom>"),
            )
            .finish()
    }
}

/// Builder for [`TlsOptions`]
#[derive(Default)]
pub struct TlsOptionsBuilder {
    inner: TlsOptions,
}

impl TlsOptionsBuilder {
    /// Root certificate file (PEM) used by `verify-ca` and `verify-full`.
    ///
    /// Defaults to `~/.postgresql/root.crt`.
    pub fn root_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.root_cert = Some(path.into());
        self
    }

    /// Client certificate (PEM) and key (PEM, or DER PKCS#8 when the file
    /// ends in `.pk8`).
    ///
    /// Defaults to `~/.postgresql/postgresql.crt` and
    /// `~/.postgresql/postgresql.pk8`, used only when both exist.
    pub fn client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.inner.client_cert = Some(cert.into());
        self.inner.client_key = Some(key.into());
        self
    }

    /// Trust the operating system certificate store instead of the root
    /// certificate file
    pub fn native_roots(mut self, enabled: bool) -> Self {
        self.inner.native_roots = enabled;
        self
    }

    /// Replace the built-in host name match used by `verify-full`
    pub fn hostname_verifier(mut self, verifier: Arc<dyn HostnameVerifier>) -> Self {
        self.inner.hostname_verifier = Some(verifier);
        self
    }

    /// Build the options
    pub fn build(self) -> TlsOptions {
        self.inner
    }
}

/// Compiled TLS client configuration for one [`SslMode`]
#[derive(Clone)]
pub struct TlsConfig {
    mode: SslMode,
    client_config: Arc<ClientConfig>,
    hostname_verifier: Option<Arc<dyn HostnameVerifier>>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("mode", &self.mode)
            .field("client_config", &"<ClientConfig>")
            .field(
                "hostname_verifier",
                &self.hostname_verifier.as_ref().map(|_| "<custom>"),
            )
            .finish()
    }
}

impl TlsConfig {
    /// Build the rustls configuration `mode` calls for.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required certificate file is
    /// missing or unparsable.
    pub fn for_mode(mode: SslMode, options: &TlsOptions) -> Result<TlsConfig> {
        let provider = crypto_provider();

        let verifier: Arc<dyn ServerCertVerifier> = if !mode.verify_certificate() {
            Arc::new(NonValidatingVerifier {
                provider: provider.clone(),
            })
        } else {
            let roots = Arc::new(load_roots(options)?);
            let webpki = WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
                .build()
                .map_err(|e| Error::Config(format!("invalid root certificates: {}", e)))?;
            if mode.verify_peer_name() && options.hostname_verifier.is_none() {
                webpki
            } else {
                Arc::new(ChainOnlyVerifier { inner: webpki })
            }
        };

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Config(format!("TLS configuration failed: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let client_config = match load_client_identity(options)? {
            Some((certs, key)) => builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::Config(format!("invalid client certificate: {}", e)))?,
            None => builder.with_no_client_auth(),
        };

        Ok(TlsConfig {
            mode,
            client_config: Arc::new(client_config),
            hostname_verifier: if mode.verify_peer_name() {
                options.hostname_verifier.clone()
            } else {
                None
            },
        })
    }

    /// Mode this configuration was built for
    pub fn mode(&self) -> SslMode {
        self.mode
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Post-handshake identity check; only does work when a custom
    /// [`HostnameVerifier`] replaces the built-in one.
    pub fn verify_peer(&self, hostname: &str, peer_cert: Option<&CertificateDer<'_>>) -> Result<()> {
        let Some(verifier) = &self.hostname_verifier else {
            return Ok(());
        };
        let accepted = peer_cert.is_some_and(|cert| verifier.verify(hostname, cert));
        if accepted {
            Ok(())
        } else {
            Err(Error::Tls(format!(
                "The hostname {} could not be verified by the configured hostname verifier",
                hostname
            )))
        }
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Directory holding the default certificate files
pub fn default_cert_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("APPDATA").map(|dir| PathBuf::from(dir).join("postgresql"))
    } else {
        std::env::var_os("HOME").map(|dir| PathBuf::from(dir).join(".postgresql"))
    }
}

fn load_roots(options: &TlsOptions) -> Result<RootCertStore> {
    if options.native_roots && options.root_cert.is_none() {
        let result = rustls_native_certs::load_native_certs();
        let mut store = RootCertStore::empty();
        store.add_parsable_certificates(result.certs);
        if store.is_empty() {
            return Err(Error::Config(
                "Failed to load any system root certificates".to_string(),
            ));
        }
        return Ok(store);
    }

    let path = match &options.root_cert {
        Some(path) => path.clone(),
        None => default_cert_dir()
            .map(|dir| dir.join("root.crt"))
            .ok_or_else(|| {
                Error::Config("no home directory to locate root.crt; set sslrootcert".into())
            })?,
    };
    load_custom_ca(&path)
}

/// Load CA certificates from a PEM file.
fn load_custom_ca(ca_path: &Path) -> Result<RootCertStore> {
    let ca_cert_data = fs::read(ca_path).map_err(|e| {
        Error::Config(format!(
            "Could not open SSL root certificate file {}: {}",
            ca_path.display(),
            e
        ))
    })?;

    let mut reader = std::io::Cursor::new(&ca_cert_data);
    let mut root_store = RootCertStore::empty();

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                root_store.add(cert).map_err(|e| {
                    Error::Config(format!(
                        "Could not read SSL root certificate file {}: {}",
                        ca_path.display(),
                        e
                    ))
                })?;
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Config(format!(
                    "Could not read SSL root certificate file {}",
                    ca_path.display()
                )));
            }
        }
    }

    if root_store.is_empty() {
        return Err(Error::Config(format!(
            "No valid certificates found in {}",
            ca_path.display()
        )));
    }

    Ok(root_store)
}

type ClientIdentity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn load_client_identity(options: &TlsOptions) -> Result<Option<ClientIdentity>> {
    let (cert_path, key_path) = match (&options.client_cert, &options.client_key) {
        (Some(cert), Some(key)) => (cert.clone(), key.clone()),
        (Some(_), None) | (None, Some(_)) => {
            return Err(Error::Config(
                "sslcert and sslkey must be configured together".into(),
            ))
        }
        (None, None) => {
            let Some(dir) = default_cert_dir() else {
                return Ok(None);
            };
            let cert = dir.join("postgresql.crt");
            let key = dir.join("postgresql.pk8");
            if !cert.is_file() || !key.is_file() {
                return Ok(None);
            }
            (cert, key)
        }
    };

    let cert_data = fs::read(&cert_path).map_err(|e| {
        Error::Config(format!(
            "Could not open SSL certificate file {}: {}",
            cert_path.display(),
            e
        ))
    })?;
    let certs = rustls_pemfile::certs(&mut std::io::Cursor::new(&cert_data))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Config(format!(
                "Could not read SSL certificate file {}: {}",
                cert_path.display(),
                e
            ))
        })?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No valid certificates found in {}",
            cert_path.display()
        )));
    }

    let key_data = fs::read(&key_path).map_err(|e| {
        Error::Config(format!(
            "Could not open SSL key file {}: {}",
            key_path.display(),
            e
        ))
    })?;
    let key = if key_path.extension().is_some_and(|ext| ext == "pk8") {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_data))
    } else {
        rustls_pemfile::private_key(&mut std::io::Cursor::new(&key_data))
            .map_err(|e| {
                Error::Config(format!(
                    "Could not read SSL key file {}: {}",
                    key_path.display(),
                    e
                ))
            })?
            .ok_or_else(|| {
                Error::Config(format!("No private key found in {}", key_path.display()))
            })?
    };

    Ok(Some((certs, key)))
}

/// Accepts any certificate; handshake signatures are still checked.
#[derive(Debug)]
struct NonValidatingVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NonValidatingVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Validates the chain against the roots but tolerates a name mismatch.
#[derive(Debug)]
struct ChainOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

fn is_name_mismatch(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(
            rustls::CertificateError::NotValidForName
                | rustls::CertificateError::NotValidForNameContext { .. }
        )
    )
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(err) if is_name_mismatch(&err) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Parse a host name or IP literal into a TLS server name (SNI).
///
/// # Errors
///
/// Returns an error if the hostname is invalid.
pub fn parse_server_name(hostname: &str) -> Result<ServerName<'static>> {
    let trimmed = hostname.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }

    let hostname = hostname.trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "Invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
    {
        return Err(Error::Config(format!(
            "Invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Config(format!("Invalid hostname for TLS: '{}'", hostname)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FIXTURE_CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/server.crt");
    const FIXTURE_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/server.key");

    #[test]
    fn test_ssl_mode_from_str() {
        assert_eq!("disable".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert_eq!("allow".parse::<SslMode>().unwrap(), SslMode::Allow);
        assert_eq!("prefer".parse::<SslMode>().unwrap(), SslMode::Prefer);
        assert_eq!("require".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("verify-ca".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
        assert_eq!(
            "verify-full".parse::<SslMode>().unwrap(),
            SslMode::VerifyFull
        );
        assert!("invalid".parse::<SslMode>().is_err());
    }

    #[test]
    fn test_ssl_mode_default_is_prefer() {
        assert_eq!(SslMode::default(), SslMode::Prefer);
    }

    #[test]
    fn test_ssl_mode_properties() {
        assert!(!SslMode::Disable.sends_request());
        assert!(!SslMode::Allow.sends_request());
        assert!(SslMode::Prefer.sends_request());
        assert!(!SslMode::Prefer.requires_encryption());
        assert!(SslMode::Require.requires_encryption());
        assert!(!SslMode::Require.verify_certificate());
        assert!(SslMode::VerifyCa.verify_certificate());
        assert!(!SslMode::VerifyCa.verify_peer_name());
        assert!(SslMode::VerifyFull.verify_peer_name());
    }

    #[test]
    fn test_require_builds_without_files() {
        let tls = TlsConfig::for_mode(SslMode::Require, &TlsOptions::default()).unwrap();
        assert_eq!(tls.mode(), SslMode::Require);
    }

    #[test]
    fn test_verify_ca_with_fixture_root() {
        let options = TlsOptions::builder().root_cert(FIXTURE_CERT).build();
        assert!(TlsConfig::for_mode(SslMode::VerifyCa, &options).is_ok());
        assert!(TlsConfig::for_mode(SslMode::VerifyFull, &options).is_ok());
    }

    #[test]
    fn test_missing_root_cert_is_config_error() {
        let options = TlsOptions::builder()
            .root_cert("/nonexistent/root.crt")
            .build();
        let err = TlsConfig::for_mode(SslMode::VerifyFull, &options).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("root certificate"));
    }

    #[test]
    fn test_root_cert_without_certificates_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let options = TlsOptions::builder().root_cert(file.path()).build();
        assert!(TlsConfig::for_mode(SslMode::VerifyCa, &options).is_err());
    }

    #[test]
    fn test_client_identity_pem_key() {
        let options = TlsOptions::builder()
            .client_cert(FIXTURE_CERT, FIXTURE_KEY)
            .build();
        let identity = load_client_identity(&options).unwrap().unwrap();
        assert_eq!(identity.0.len(), 1);
    }

    #[test]
    fn test_client_identity_requires_both_files() {
        let options = TlsOptions {
            client_cert: Some(PathBuf::from(FIXTURE_CERT)),
            ..Default::default()
        };
        assert!(load_client_identity(&options).is_err());
    }

    #[test]
    fn test_name_mismatch_classification() {
        assert!(is_name_mismatch(&rustls::Error::InvalidCertificate(
            rustls::CertificateError::NotValidForName
        )));
        assert!(!is_name_mismatch(&rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer
        )));
        assert!(!is_name_mismatch(&rustls::Error::InvalidCertificate(
            rustls::CertificateError::Expired
        )));
        assert!(!is_name_mismatch(&rustls::Error::DecryptError));
    }

    #[test]
    fn test_parse_server_name_valid() {
        assert!(parse_server_name("localhost").is_ok());
        assert!(parse_server_name("db.internal.example.com").is_ok());
        assert!(parse_server_name("example.com.").is_ok());
    }

    #[test]
    fn test_parse_server_name_ip_literals() {
        assert!(matches!(
            parse_server_name("127.0.0.1").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            parse_server_name("::1").unwrap(),
            ServerName::IpAddress(_)
        ));
    }

    #[test]
    fn test_parse_server_name_invalid() {
        assert!(parse_server_name("").is_err());
        assert!(parse_server_name("bad host").is_err());
        assert!(parse_server_name("example.com:5432").is_err());
    }

    struct RejectAll;

    impl HostnameVerifier for RejectAll {
        fn verify(&self, _hostname: &str, _peer_cert: &CertificateDer<'_>) -> bool {
            false
        }
    }

    #[test]
    fn test_custom_hostname_verifier_failure_is_fatal() {
        let options = TlsOptions::builder()
            .root_cert(FIXTURE_CERT)
            .hostname_verifier(Arc::new(RejectAll))
            .build();
        let tls = TlsConfig::for_mode(SslMode::VerifyFull, &options).unwrap();
        let cert = CertificateDer::from(vec![0u8; 4]);
        let err = tls.verify_peer("db1", Some(&cert)).unwrap_err();
        assert!(matches!(err, Error::Tls(_)));

        // Below verify-full the override is not consulted
        let tls = TlsConfig::for_mode(SslMode::VerifyCa, &options).unwrap();
        assert!(tls.verify_peer("db1", Some(&cert)).is_ok());
    }
}
