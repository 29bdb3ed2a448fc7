//! Core connection type

use super::state::ConnectionState;
use super::stream::PgStream;
use super::tls::{SslMode, TlsConfig, TlsOptions};
use super::transport::SocketOptions;
use crate::auth::{
    compute_md5_password, dispose_quietly, format_mac_list, national, select_context,
    select_mechanism, AuthProviders, ChannelBinding, ChannelBindingMode, DelegatedAuth,
    DelegatedRequest, DelegatedTarget, GssLib, NationalAlgorithm, ScramClient, ScramState,
    SignedChallenge,
};
use crate::hostchooser::{HostEndpoint, HostRequirement, DEFAULT_PORT};
use crate::protocol::constants::{sqlstate, ssl_response, PROTOCOL_VERSION};
use crate::protocol::{AuthenticationMessage, BackendMessage, ErrorFields, FrontendMessage};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Server version from which `extra_float_digits=3` and `application_name`
/// are understood
const VERSION_9_0: u32 = 90000;
/// Server version from which the `replication` startup parameter exists
const VERSION_9_4: u32 = 90400;

/// Opaque vendor strings forwarded as startup parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorParams {
    /// `mac`
    pub mac: Option<String>,
    /// `token`
    pub token: Option<String>,
    /// `appkey`
    pub appkey: Option<String>,
    /// `certdelay`; `on` defers the signed challenge
    pub certdelay: Option<String>,
    /// `extauth`
    pub extauth: Option<String>,
}

impl VendorParams {
    /// Whether the signed challenge is deferred
    pub fn cert_delay(&self) -> bool {
        self.certdelay
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("on"))
    }

    fn startup_pairs(&self) -> impl Iterator<Item = (&'static str, &String)> {
        [
            ("mac", self.mac.as_ref()),
            ("token", self.token.as_ref()),
            ("appkey", self.appkey.as_ref()),
            ("certdelay", self.certdelay.as_ref()),
            ("extauth", self.extauth.as_ref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
    }
}

/// Connection configuration
///
/// Stores everything one connection request needs: the host list, credentials,
/// transport policy, startup parameters and the authentication collaborators.
/// Use `ConnectionConfig::builder()` for anything beyond database and user.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Candidate hosts, in preference order
    pub hosts: Vec<HostEndpoint>,
    /// Database name
    pub database: String,
    /// Username
    pub user: String,
    /// Password (optional)
    pub password: Option<String>,
    /// Role the chosen server must have
    pub target_server_type: HostRequirement,
    /// SSL/TLS mode
    pub sslmode: SslMode,
    /// Certificate material
    pub tls: TlsOptions,
    /// Timeouts and socket options
    pub socket: SocketOptions,
    /// Shuffle hosts on every pass
    pub load_balance_hosts: bool,
    /// How long a cached host status stays valid
    pub host_recheck: Duration,
    /// Server version assumed before the server reports its own, in
    /// `server_version_num` form (`90400` for 9.4)
    pub assume_min_server_version: Option<u32>,
    /// Application name for server logs
    pub application_name: Option<String>,
    /// Sent as `search_path`
    pub current_schema: Option<String>,
    /// Sent as `options`
    pub options: Option<String>,
    /// Sent as `replication` (`true` or `database`)
    pub replication: Option<String>,
    /// Sent as `TimeZone`; defaults to `$TZ`, then `UTC`
    pub timezone: Option<String>,
    /// Additional startup parameters, in insertion order
    pub params: Vec<(String, String)>,
    /// Vendor startup strings
    pub vendor: VendorParams,
    /// Delegated library selection
    pub gsslib: GssLib,
    /// Kerberos service principal name
    pub kerberos_service: String,
    /// SCRAM channel binding policy
    pub channel_binding: ChannelBindingMode,
    /// Authentication collaborators
    pub providers: AuthProviders,
}

impl ConnectionConfig {
    /// Create a configuration for `localhost:5432` with defaults
    ///
    /// # Defaults
    ///
    /// - `sslmode`: prefer
    /// - `target_server_type`: any
    /// - `connect_timeout`: 10 seconds, no socket timeout
    /// - `host_recheck`: 10 seconds
    /// - `gsslib`: auto, `channel_binding`: prefer
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            hosts: vec![HostEndpoint::new("localhost", DEFAULT_PORT)],
            database: database.into(),
            user: user.into(),
            password: None,
            target_server_type: HostRequirement::Any,
            sslmode: SslMode::default(),
            tls: TlsOptions::default(),
            socket: SocketOptions::default(),
            load_balance_hosts: false,
            host_recheck: Duration::from_secs(10),
            assume_min_server_version: None,
            application_name: None,
            current_schema: None,
            options: None,
            replication: None,
            timezone: None,
            params: Vec::new(),
            vendor: VendorParams::default(),
            gsslib: GssLib::default(),
            kerberos_service: "postgres".to_string(),
            channel_binding: ChannelBindingMode::default(),
            providers: AuthProviders::default(),
        }
    }

    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = ConnectionConfig::builder("mydb", "user")
    ///     .host("db1", 5432)
    ///     .host("db2", 5432)
    ///     .target_server_type(HostRequirement::Primary)
    ///     .connect_timeout(Duration::from_secs(5))
    ///     .build();
    /// ```
    pub fn builder(
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: Self::new(database, user),
            hosts: Vec::new(),
        }
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a startup parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    fn assumed_version(&self) -> u32 {
        self.assume_min_server_version.unwrap_or(0)
    }

    /// Startup packet parameters, in wire order
    pub fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("user".to_string(), self.user.clone()),
            ("database".to_string(), self.database.clone()),
            ("client_encoding".to_string(), "UTF8".to_string()),
            ("DateStyle".to_string(), "ISO".to_string()),
            ("TimeZone".to_string(), self.timezone_name()),
        ];

        let version = self.assumed_version();
        if version >= VERSION_9_0 {
            params.push(("extra_float_digits".to_string(), "3".to_string()));
            if let Some(app) = &self.application_name {
                params.push(("application_name".to_string(), app.clone()));
            }
        } else {
            params.push(("extra_float_digits".to_string(), "2".to_string()));
        }

        if let Some(replication) = &self.replication {
            if version >= VERSION_9_4 {
                params.push(("replication".to_string(), replication.clone()));
            }
        }
        if let Some(schema) = &self.current_schema {
            params.push(("search_path".to_string(), schema.clone()));
        }
        if let Some(options) = &self.options {
            params.push(("options".to_string(), options.clone()));
        }

        for (key, value) in self.vendor.startup_pairs() {
            params.push((key.to_string(), value.clone()));
        }
        params.extend(self.params.iter().cloned());
        params
    }

    fn timezone_name(&self) -> String {
        self.timezone
            .clone()
            .or_else(|| std::env::var("TZ").ok().filter(|tz| !tz.is_empty()))
            .unwrap_or_else(|| "UTC".to_string())
    }
}

/// Builder for creating `ConnectionConfig` with advanced options
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
    hosts: Vec<HostEndpoint>,
}

impl ConnectionConfigBuilder {
    /// Append a candidate host
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.hosts.push(HostEndpoint::new(host, port));
        self
    }

    /// Replace the candidate host list
    pub fn hosts(mut self, hosts: impl IntoIterator<Item = HostEndpoint>) -> Self {
        self.hosts = hosts.into_iter().collect();
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Add a startup parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.params.push((key.into(), value.into()));
        self
    }

    /// Required server role
    pub fn target_server_type(mut self, requirement: HostRequirement) -> Self {
        self.config.target_server_type = requirement;
        self
    }

    /// Set SSL/TLS mode
    pub fn sslmode(mut self, mode: SslMode) -> Self {
        self.config.sslmode = mode;
        self
    }

    /// Set certificate material
    pub fn tls(mut self, options: TlsOptions) -> Self {
        self.config.tls = options;
        self
    }

    /// Set TCP connection timeout
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.socket.connect_timeout = duration;
        self
    }

    /// Bound every read
    ///
    /// Default: None (wait forever)
    pub fn socket_timeout(mut self, duration: Duration) -> Self {
        self.config.socket.socket_timeout = Some(duration);
        self
    }

    /// Enable TCP keepalive
    pub fn tcp_keepalive(mut self, enabled: bool) -> Self {
        self.config.socket.tcp_keepalive = enabled;
        self
    }

    /// SO_SNDBUF size
    pub fn send_buffer_size(mut self, size: u32) -> Self {
        self.config.socket.send_buffer_size = Some(size);
        self
    }

    /// SO_RCVBUF size
    pub fn receive_buffer_size(mut self, size: u32) -> Self {
        self.config.socket.receive_buffer_size = Some(size);
        self
    }

    /// Shuffle the host list on every pass
    pub fn load_balance_hosts(mut self, enabled: bool) -> Self {
        self.config.load_balance_hosts = enabled;
        self
    }

    /// How long cached host states stay valid
    pub fn host_recheck(mut self, duration: Duration) -> Self {
        self.config.host_recheck = duration;
        self
    }

    /// Server version assumed before startup, e.g. `"9.4"`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `version` is not a version number.
    pub fn assume_min_server_version(mut self, version: &str) -> Result<Self> {
        let num = parse_server_version(version).ok_or_else(|| {
            Error::Config(format!("invalid assumeMinServerVersion '{}'", version))
        })?;
        self.config.assume_min_server_version = Some(num);
        Ok(self)
    }

    /// Set application name for server logs
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = Some(name.into());
        self
    }

    /// Initial `search_path`
    pub fn current_schema(mut self, schema: impl Into<String>) -> Self {
        self.config.current_schema = Some(schema.into());
        self
    }

    /// Command-line options for the backend
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.config.options = Some(options.into());
        self
    }

    /// Replication mode (`true`, `database`)
    pub fn replication(mut self, mode: impl Into<String>) -> Self {
        self.config.replication = Some(mode.into());
        self
    }

    /// Session time zone
    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.config.timezone = Some(tz.into());
        self
    }

    /// Vendor startup strings
    pub fn vendor(mut self, vendor: VendorParams) -> Self {
        self.config.vendor = vendor;
        self
    }

    /// Delegated library selection
    pub fn gsslib(mut self, gsslib: GssLib) -> Self {
        self.config.gsslib = gsslib;
        self
    }

    /// Kerberos service name (default `postgres`)
    pub fn kerberos_service(mut self, service: impl Into<String>) -> Self {
        self.config.kerberos_service = service.into();
        self
    }

    /// SCRAM channel binding policy
    pub fn channel_binding(mut self, mode: ChannelBindingMode) -> Self {
        self.config.channel_binding = mode;
        self
    }

    /// Authentication collaborators
    pub fn providers(mut self, providers: AuthProviders) -> Self {
        self.config.providers = providers;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        let mut config = self.config;
        if !self.hosts.is_empty() {
            config.hosts = self.hosts;
        }
        config
    }
}

/// Parse `major[.minor[.patch]]` into `server_version_num` form.
///
/// Trailing text such as `" (Debian 16.2-1)"` or `"beta1"` is ignored.
pub fn parse_server_version(text: &str) -> Option<u32> {
    let numeric: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = numeric.split('.').filter(|p| !p.is_empty());
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().map_or(Ok(0), str::parse).ok()?;
    let patch: u32 = parts.next().map_or(Ok(0), str::parse).ok()?;
    if major >= 10 {
        Some(major * 10000 + minor)
    } else {
        Some(major * 10000 + minor * 100 + patch)
    }
}

/// Cancellation key sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    pub process_id: i32,
    pub secret_key: i32,
}

/// In-flight SCRAM exchange
struct ScramExchange {
    client: ScramClient,
    state: Option<ScramState>,
}

enum ActiveMechanism {
    None,
    Scram(ScramExchange),
    Delegated(Box<dyn DelegatedAuth>),
}

/// Per-attempt authentication state; lives for one authentication loop
struct AuthSession<'a> {
    config: &'a ConnectionConfig,
    target: DelegatedTarget,
    label: &'static str,
    active: ActiveMechanism,
}

impl<'a> AuthSession<'a> {
    fn new(config: &'a ConnectionConfig, endpoint: &HostEndpoint) -> Self {
        Self {
            config,
            target: DelegatedTarget {
                host: endpoint.host.clone(),
                user: config.user.clone(),
                service: config.kerberos_service.clone(),
            },
            label: "none",
            active: ActiveMechanism::None,
        }
    }

    fn password(&self) -> Result<&'a str> {
        self.config.password.as_deref().ok_or_else(|| {
            Error::Config(
                "The server requested password-based authentication, but no password was provided."
                    .into(),
            )
        })
    }

    fn activate(&mut self, mechanism: ActiveMechanism) {
        self.release();
        self.active = mechanism;
    }

    fn scram(&mut self) -> Result<&mut ScramExchange> {
        match &mut self.active {
            ActiveMechanism::Scram(exchange) => Ok(exchange),
            _ => Err(Error::Protocol(
                "SASL continuation received without a SASL exchange in progress".into(),
            )),
        }
    }

    fn release(&mut self) {
        if let ActiveMechanism::Delegated(mut ctx) =
            std::mem::replace(&mut self.active, ActiveMechanism::None)
        {
            dispose_quietly(ctx.as_mut());
        }
    }
}

impl Drop for AuthSession<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// How the loop proceeds after a signed challenge
enum ChallengeOutcome {
    Deferred,
    Answered,
}

/// Postgres connection
#[derive(Debug)]
pub struct Connection {
    stream: PgStream,
    state: ConnectionState,
    server_params: Vec<(String, String)>,
    backend_key: Option<BackendKey>,
}

impl Connection {
    /// Create connection from an opened stream
    pub fn new(stream: PgStream) -> Self {
        Self {
            stream,
            state: ConnectionState::Initial,
            server_params: Vec::new(),
            backend_key: None,
        }
    }

    /// Run one complete attempt against `endpoint`: transport upgrade,
    /// startup, authentication and startup completion.
    pub async fn establish(
        endpoint: &HostEndpoint,
        config: &ConnectionConfig,
        sslmode: SslMode,
    ) -> Result<Connection> {
        async {
            let stream = PgStream::connect(endpoint.clone(), config.socket.clone()).await?;
            let mut conn = Connection::new(stream);

            if sslmode.sends_request() {
                let tls = TlsConfig::for_mode(sslmode, &config.tls)?;
                conn.negotiate_tls(&tls).await?;
            }
            conn.send_startup(config).await?;
            conn.authenticate(config).await?;
            conn.finish_startup().await?;
            conn.run_initial_queries(config).await?;

            tracing::info!(encrypted = conn.is_encrypted(), "startup complete");
            Ok(conn)
        }
        .instrument(tracing::info_span!(
            "startup",
            user = %config.user,
            database = %config.database,
            host = %endpoint
        ))
        .await
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Endpoint of the underlying stream
    pub fn endpoint(&self) -> &HostEndpoint {
        self.stream.endpoint()
    }

    /// Whether traffic is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.stream.is_encrypted()
    }

    /// Parameters reported by the server during startup
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Look up one server parameter
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Cancellation key, if the server sent one
    pub fn backend_key(&self) -> Option<BackendKey> {
        self.backend_key
    }

    /// Negotiate TLS upgrade with the server via the SSLRequest protocol.
    ///
    /// Sends the 8-byte SSLRequest and reads the server's single-byte response.
    /// `S` upgrades the transport; `N` and `E` either fail (when the mode
    /// requires encryption) or continue in cleartext, `E` on a fresh socket.
    pub async fn negotiate_tls(&mut self, tls: &TlsConfig) -> Result<()> {
        self.state.transition(ConnectionState::NegotiatingTls)?;
        let mode = tls.mode();

        self.stream.send_message(&FrontendMessage::SslRequest)?;
        self.stream.flush().await?;

        match self.stream.receive_char().await? {
            ssl_response::ACCEPTED => {
                tracing::debug!("server accepted TLS, upgrading connection");
                self.stream.upgrade_tls(tls).await?;
                let host = self.stream.endpoint().host.clone();
                tls.verify_peer(&host, self.stream.transport()?.peer_certificate())?;
                tracing::debug!("TLS connection established");
                Ok(())
            }
            ssl_response::REFUSED => {
                tracing::debug!(%mode, "server refused TLS");
                if mode.requires_encryption() {
                    return Err(ssl_not_supported());
                }
                Ok(())
            }
            ssl_response::UNSUPPORTED => {
                tracing::debug!(%mode, "server does not understand SSLRequest");
                if mode.requires_encryption() {
                    return Err(ssl_not_supported());
                }
                // the server closes after 'E'; continue in cleartext elsewhere
                self.stream.reconnect().await?;
                Ok(())
            }
            other => Err(Error::Protocol(format!(
                "An error occurred while setting up the SSL connection: unexpected response byte 0x{:02X}",
                other
            ))),
        }
    }

    /// Serialize and send the startup packet. No response is read.
    pub async fn send_startup(&mut self, config: &ConnectionConfig) -> Result<()> {
        let params = config.startup_params();
        tracing::trace!(count = params.len(), "sending startup packet");
        self.stream.send_message(&FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params,
        })?;
        self.stream.flush().await?;
        self.state.transition(ConnectionState::StartupSent)
    }

    /// Run the authentication loop until the server accepts the credentials
    /// or a vendor mechanism ends the exchange.
    pub async fn authenticate(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.state.transition(ConnectionState::Authenticating)?;
        let auth_start = Instant::now();
        let endpoint = self.stream.endpoint().clone();
        let mut session = AuthSession::new(config, &endpoint);

        let result = self.auth_loop(&mut session).await;
        let mechanism = session.label;
        session.release();

        match &result {
            Ok(()) => {
                tracing::debug!(mechanism, "authentication successful");
                crate::metrics::counters::auth_succeeded(mechanism);
                crate::metrics::histograms::auth_duration(mechanism, auth_start.elapsed());
                self.state.transition(ConnectionState::FinishingStartup)?;
            }
            Err(e) => {
                crate::metrics::counters::auth_failed(mechanism, e.category().to_string());
            }
        }
        result
    }

    async fn auth_loop(&mut self, session: &mut AuthSession<'_>) -> Result<()> {
        let config = session.config;
        loop {
            let auth = match self.stream.receive_message().await? {
                BackendMessage::Authentication(auth) => auth,
                BackendMessage::ErrorResponse(fields) => return Err(Error::Server(fields)),
                other => {
                    return Err(Error::Protocol(format!(
                        "Protocol error. Session setup failed: unexpected {} during authentication",
                        other.kind()
                    )))
                }
            };

            let label = auth.mechanism();
            if label != "ok" && label != session.label {
                session.label = label;
                crate::metrics::counters::auth_attempted(label);
            }

            match auth {
                AuthenticationMessage::Ok => return Ok(()),
                AuthenticationMessage::CleartextPassword => {
                    let password = session.password()?;
                    self.stream
                        .send_message(&FrontendMessage::Password(password.to_string()))?;
                }
                AuthenticationMessage::Md5Password { salt } => {
                    let password = session.password()?;
                    let digest = compute_md5_password(&config.user, password, &salt);
                    self.stream.send_message(&FrontendMessage::Password(digest))?;
                }
                AuthenticationMessage::Gss => {
                    self.start_delegated(session, DelegatedRequest::Gss)?;
                }
                AuthenticationMessage::Sspi => {
                    self.start_delegated(session, DelegatedRequest::Sspi)?;
                }
                AuthenticationMessage::GssContinue { data } => {
                    let ActiveMechanism::Delegated(ctx) = &mut session.active else {
                        return Err(Error::Protocol(
                            "GSS continuation received without an active context".into(),
                        ));
                    };
                    if let Some(token) = ctx.continue_with(&data)? {
                        self.stream.send_message(&FrontendMessage::GssResponse(token))?;
                    }
                }
                AuthenticationMessage::Sasl { mechanisms } => {
                    self.start_scram(session, &mechanisms)?;
                }
                AuthenticationMessage::NationalSasl { mechanisms } => {
                    self.start_national_scram(session, &mechanisms)?;
                }
                AuthenticationMessage::SaslContinue { data }
                | AuthenticationMessage::NationalSaslContinue { data } => {
                    let exchange = session.scram()?;
                    let server_first = utf8(data, "server-first")?;
                    let (client_final, state) = exchange.client.client_final(&server_first)?;
                    exchange.state = Some(state);
                    self.stream.send_message(&FrontendMessage::SaslResponse {
                        data: client_final.into_bytes(),
                    })?;
                }
                AuthenticationMessage::SaslFinal { data }
                | AuthenticationMessage::NationalSaslFinal { data } => {
                    let exchange = session.scram()?;
                    let server_final = utf8(data, "server-final")?;
                    let state = exchange.state.as_ref().ok_or_else(|| {
                        Error::Protocol("SASL final message before client-final".into())
                    })?;
                    exchange.client.verify_server_final(&server_final, state)?;
                    tracing::debug!("server signature verified");
                }
                AuthenticationMessage::Watermark => {
                    let watermark = config.providers.identity_source().watermark()?;
                    self.stream
                        .send_message(&FrontendMessage::CredentialResponse(watermark))?;
                }
                AuthenticationMessage::MacAddress => {
                    let macs = config.providers.identity_source().mac_addresses()?;
                    let list = format_mac_list(&macs).ok_or_else(|| {
                        Error::Config(
                            "The server requested mac-based authentication, but no MAC address was found."
                                .into(),
                        )
                    })?;
                    tracing::debug!(macs = %list, "sending MAC address list");
                    self.stream
                        .send_message(&FrontendMessage::CredentialResponse(list.into_bytes()))?;
                }
                AuthenticationMessage::AppKey => {
                    let key = config.providers.identity_source().app_key(&config.user)?;
                    self.stream
                        .send_message(&FrontendMessage::CredentialResponse(key.into_bytes()))?;
                }
                AuthenticationMessage::MacCode => {
                    let code = config.providers.identity_source().mac_code(&config.user)?;
                    self.stream
                        .send_message(&FrontendMessage::CredentialResponse(code.into_bytes()))?;
                }
                AuthenticationMessage::Challenge { data } => {
                    match self.answer_challenge(config, &data)? {
                        ChallengeOutcome::Deferred => continue,
                        ChallengeOutcome::Answered => {
                            self.stream.flush().await?;
                            return Ok(());
                        }
                    }
                }
                AuthenticationMessage::Unsupported(code) => {
                    return Err(Error::UnsupportedMechanism(format!(
                        "The authentication type {} is not supported.",
                        code
                    )));
                }
            }
            self.stream.flush().await?;
        }
    }

    fn start_delegated(
        &mut self,
        session: &mut AuthSession<'_>,
        request: DelegatedRequest,
    ) -> Result<()> {
        let config = session.config;
        let mut ctx = select_context(
            config.providers.delegated_provider(),
            request,
            config.gsslib,
            &session.target,
        )?;
        let token = ctx.start();
        session.activate(ActiveMechanism::Delegated(ctx));
        if let Some(token) = token? {
            self.stream.send_message(&FrontendMessage::GssResponse(token))?;
        }
        Ok(())
    }

    fn start_scram(&mut self, session: &mut AuthSession<'_>, mechanisms: &[String]) -> Result<()> {
        let config = session.config;
        let password = session.password()?;
        let binding_data = self.stream.transport()?.channel_binding_data();
        let (algorithm, binding) =
            select_mechanism(mechanisms, binding_data, config.channel_binding)?;

        let client = ScramClient::with_algorithm(
            "*".to_string(),
            password.to_string(),
            Arc::new(algorithm),
            binding,
        );
        self.send_scram_first(session, client)
    }

    fn start_national_scram(
        &mut self,
        session: &mut AuthSession<'_>,
        mechanisms: &[String],
    ) -> Result<()> {
        let config = session.config;
        let hash = config.providers.national().ok_or_else(|| {
            Error::UnsupportedMechanism(format!(
                "{} authentication is not available: no national hash provider configured",
                national::MECHANISM
            ))
        })?;
        national::offered(mechanisms)?;
        let password = session.password()?;

        let client = ScramClient::with_algorithm(
            "*".to_string(),
            password.to_string(),
            Arc::new(NationalAlgorithm::new(hash)),
            ChannelBinding::None,
        );
        self.send_scram_first(session, client)
    }

    fn send_scram_first(&mut self, session: &mut AuthSession<'_>, client: ScramClient) -> Result<()> {
        let mechanism = client.mechanism();
        tracing::debug!(%mechanism, "initiating SCRAM authentication");
        self.stream.send_message(&FrontendMessage::SaslInitialResponse {
            mechanism,
            data: client.client_first().into_bytes(),
        })?;
        session.activate(ActiveMechanism::Scram(ScramExchange {
            client,
            state: None,
        }));
        Ok(())
    }

    fn answer_challenge(
        &mut self,
        config: &ConnectionConfig,
        blob: &[u8],
    ) -> Result<ChallengeOutcome> {
        if config.vendor.cert_delay() {
            tracing::debug!(len = blob.len(), "signed challenge deferred (certdelay=on)");
            return Ok(ChallengeOutcome::Deferred);
        }

        let signer = config.providers.challenge_signer().ok_or_else(|| {
            Error::UnsupportedMechanism(
                "The server requested a signed challenge, but no challenge signer is configured."
                    .into(),
            )
        })?;
        let challenge = SignedChallenge::parse(blob)?;
        tracing::trace!(
            tag = %String::from_utf8_lossy(challenge.tag()),
            "received signed challenge"
        );
        let response = challenge.response(&config.user, signer)?;
        self.stream
            .send_message(&FrontendMessage::ChallengeResponse(response))?;
        Ok(ChallengeOutcome::Answered)
    }

    /// Read server parameters and the backend key until ReadyForQuery
    pub async fn finish_startup(&mut self) -> Result<()> {
        loop {
            match self.stream.receive_message().await? {
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::trace!("parameter status: {} = {}", name, value);
                    match self.server_params.iter_mut().find(|(k, _)| *k == name) {
                        Some(entry) => entry.1 = value,
                        None => self.server_params.push((name, value)),
                    }
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.backend_key = Some(BackendKey {
                        process_id,
                        secret_key,
                    });
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!("notice during startup: {}", notice);
                }
                BackendMessage::Authentication(AuthenticationMessage::Ok) => {}
                BackendMessage::ReadyForQuery { .. } => break,
                BackendMessage::ErrorResponse(fields) => return Err(Error::Server(fields)),
                other => {
                    return Err(Error::Protocol(format!(
                        "Protocol error. Session setup failed: unexpected {} during startup",
                        other.kind()
                    )))
                }
            }
        }
        self.state.transition(ConnectionState::Idle)
    }

    /// Settings the startup packet could not carry because the assumed
    /// server version was too old
    async fn run_initial_queries(&mut self, config: &ConnectionConfig) -> Result<()> {
        if config.assumed_version() >= VERSION_9_0 {
            return Ok(());
        }
        let actual = self
            .server_param("server_version")
            .and_then(parse_server_version)
            .unwrap_or(0);
        if actual < VERSION_9_0 {
            return Ok(());
        }

        self.simple_query("SET extra_float_digits = 3").await?;
        if let Some(app) = &config.application_name {
            let sql = format!("SET application_name = '{}'", app.replace('\'', "''"));
            self.simple_query(&sql).await?;
        }
        Ok(())
    }

    /// Execute a simple query (returns all backend messages)
    pub async fn simple_query(&mut self, query: &str) -> Result<Vec<BackendMessage>> {
        self.state.transition(ConnectionState::QueryInProgress)?;

        self.stream
            .send_message(&FrontendMessage::Query(query.to_string()))?;
        self.stream.flush().await?;

        let mut messages = Vec::new();
        let mut error: Option<ErrorFields> = None;
        loop {
            let msg = self.stream.receive_message().await?;
            match msg {
                BackendMessage::ReadyForQuery { .. } => break,
                BackendMessage::ErrorResponse(fields) => {
                    error.get_or_insert(fields);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    match self.server_params.iter_mut().find(|(k, _)| *k == name) {
                        Some(entry) => entry.1 = value,
                        None => self.server_params.push((name, value)),
                    }
                }
                other => messages.push(other),
            }
        }

        self.state.transition(ConnectionState::Idle)?;
        match error {
            Some(fields) => Err(Error::Server(fields)),
            None => Ok(messages),
        }
    }

    /// First column of the first row of `query`, as text
    pub async fn query_scalar(&mut self, query: &str) -> Result<Option<String>> {
        let messages = self.simple_query(query).await?;
        let value = messages.into_iter().find_map(|msg| match msg {
            BackendMessage::DataRow(mut cols) if !cols.is_empty() => Some(cols.swap_remove(0)),
            _ => None,
        });
        match value.flatten() {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| Error::Protocol(format!("invalid UTF-8 in query result: {}", e))),
            None => Ok(None),
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.state.transition(ConnectionState::Closed)?;
        if self.stream.send_message(&FrontendMessage::Terminate).is_ok() {
            let _ = self.stream.flush().await;
        }
        self.stream.close().await
    }
}

fn ssl_not_supported() -> Error {
    Error::Rejected {
        message: "The server does not support SSL.".into(),
        sql_state: Some(sqlstate::CONNECTION_REJECTED),
    }
}

fn utf8(data: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(data)
        .map_err(|e| Error::Protocol(format!("invalid UTF-8 in SCRAM {} message: {}", what, e)))
}
