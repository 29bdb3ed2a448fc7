//! Protocol message types

use bytes::Bytes;

/// Frontend message (client → server)
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// Startup message
    Startup {
        /// Protocol version
        version: i32,
        /// Connection parameters, in wire order
        params: Vec<(String, String)>,
    },

    /// Password message (cleartext or MD5 digest text)
    Password(String),

    /// Opaque credential bytes followed by a NUL terminator
    /// (watermark, MAC list, app key, MAC code)
    CredentialResponse(Vec<u8>),

    /// Signed challenge response; unlike every other `'p'` frame it has no
    /// trailing terminator
    ChallengeResponse(Vec<u8>),

    /// GSSAPI/SSPI token
    GssResponse(Vec<u8>),

    /// Query message
    Query(String),

    /// Terminate message
    Terminate,

    /// SASL initial response message
    SaslInitialResponse {
        /// SASL mechanism name (e.g., "SCRAM-SHA-256")
        mechanism: String,
        /// SASL client first message data
        data: Vec<u8>,
    },

    /// SASL response message
    SaslResponse {
        /// SASL client final message data
        data: Vec<u8>,
    },

    /// SSLRequest message (TLS negotiation)
    SslRequest,
}

/// Backend message (server → client)
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationMessage),

    /// Backend key data (for cancellation)
    BackendKeyData {
        /// Process ID
        process_id: i32,
        /// Secret key
        secret_key: i32,
    },

    /// Command complete
    CommandComplete(String),

    /// Data row
    DataRow(Vec<Option<Bytes>>),

    /// Empty query string was submitted
    EmptyQueryResponse,

    /// Error response
    ErrorResponse(ErrorFields),

    /// Notice response
    NoticeResponse(ErrorFields),

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery {
        /// Transaction status
        status: u8,
    },

    /// Row description
    RowDescription(Vec<FieldDescription>),
}

impl BackendMessage {
    /// Short name used in protocol violation messages
    pub fn kind(&self) -> &'static str {
        match self {
            BackendMessage::Authentication(_) => "Authentication",
            BackendMessage::BackendKeyData { .. } => "BackendKeyData",
            BackendMessage::CommandComplete(_) => "CommandComplete",
            BackendMessage::DataRow(_) => "DataRow",
            BackendMessage::EmptyQueryResponse => "EmptyQueryResponse",
            BackendMessage::ErrorResponse(_) => "ErrorResponse",
            BackendMessage::NoticeResponse(_) => "NoticeResponse",
            BackendMessage::ParameterStatus { .. } => "ParameterStatus",
            BackendMessage::ReadyForQuery { .. } => "ReadyForQuery",
            BackendMessage::RowDescription(_) => "RowDescription",
        }
    }
}

/// Authentication request sub-types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMessage {
    /// Authentication OK
    Ok,

    /// Cleartext password required
    CleartextPassword,

    /// MD5 password required
    Md5Password {
        /// Salt for MD5 hash
        salt: [u8; 4],
    },

    /// GSSAPI negotiation requested
    Gss,

    /// GSSAPI/SSPI continuation token
    GssContinue {
        /// Server token
        data: Vec<u8>,
    },

    /// SSPI negotiation requested
    Sspi,

    /// SASL authentication mechanisms available (Postgres 10+)
    Sasl {
        /// List of SASL mechanism names (e.g., ["SCRAM-SHA-256"])
        mechanisms: Vec<String>,
    },

    /// SASL continuation message (server challenge)
    SaslContinue {
        /// SASL server first/continue message data
        data: Vec<u8>,
    },

    /// SASL final message (server verification)
    SaslFinal {
        /// SASL server final message data
        data: Vec<u8>,
    },

    /// National-algorithm SASL mechanisms available
    NationalSasl {
        /// Offered mechanism names (e.g., ["SCRAM-GM-256"])
        mechanisms: Vec<String>,
    },

    /// National-algorithm SASL server-first message
    NationalSaslContinue {
        /// Server-first message data
        data: Vec<u8>,
    },

    /// National-algorithm SASL server-final message
    NationalSaslFinal {
        /// Server-final message data
        data: Vec<u8>,
    },

    /// Vendor signed challenge
    Challenge {
        /// Challenge blob (frame length minus 8 bytes)
        data: Vec<u8>,
    },

    /// Vendor watermark requested
    Watermark,

    /// Vendor MAC address list requested
    MacAddress,

    /// Vendor application key requested
    AppKey,

    /// Vendor MAC code requested
    MacCode,

    /// Any sub-type this client does not implement
    Unsupported(i32),
}

impl AuthenticationMessage {
    /// Mechanism label used in logs and metrics
    pub fn mechanism(&self) -> &'static str {
        match self {
            AuthenticationMessage::Ok => "ok",
            AuthenticationMessage::CleartextPassword => "cleartext",
            AuthenticationMessage::Md5Password { .. } => "md5",
            AuthenticationMessage::Gss
            | AuthenticationMessage::GssContinue { .. }
            | AuthenticationMessage::Sspi => "gss",
            AuthenticationMessage::Sasl { .. }
            | AuthenticationMessage::SaslContinue { .. }
            | AuthenticationMessage::SaslFinal { .. } => "scram",
            AuthenticationMessage::NationalSasl { .. }
            | AuthenticationMessage::NationalSaslContinue { .. }
            | AuthenticationMessage::NationalSaslFinal { .. } => "scram-gm",
            AuthenticationMessage::Challenge { .. } => "challenge",
            AuthenticationMessage::Watermark => "watermark",
            AuthenticationMessage::MacAddress => "mac",
            AuthenticationMessage::AppKey => "appkey",
            AuthenticationMessage::MacCode => "maccode",
            AuthenticationMessage::Unsupported(_) => "unsupported",
        }
    }
}

/// Field description (column metadata)
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// Column name
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: i32,
    /// Column attribute number (0 if not a table column)
    pub column_attr: i16,
    /// Data type OID
    pub type_oid: u32,
    /// Data type size
    pub type_size: i16,
    /// Type modifier
    pub type_modifier: i32,
    /// Format code (0 = text, 1 = binary)
    pub format_code: i16,
}

/// Error/notice fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity (ERROR, WARNING, etc.)
    pub severity: Option<String>,
    /// SQLSTATE code
    pub code: Option<String>,
    /// Human-readable message
    pub message: Option<String>,
    /// Additional detail
    pub detail: Option<String>,
    /// Hint
    pub hint: Option<String>,
    /// Position in query string
    pub position: Option<String>,
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref severity) = self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(ref msg) = self.message {
            write!(f, "{}", msg)?;
        }
        if let Some(ref code) = self.code {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}
