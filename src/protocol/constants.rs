//! Protocol constants

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// SSLRequest code (80877103 = 1234 << 16 | 5679)
pub const SSL_REQUEST_CODE: i32 = 0x04D2_162F;

/// Single-byte answers to an SSLRequest
pub mod ssl_response {
    /// Server accepts and expects a TLS handshake next
    pub const ACCEPTED: u8 = b'S';

    /// Server refuses encryption, continue in cleartext
    pub const REFUSED: u8 = b'N';

    /// Server predates SSLRequest and answered with an error frame
    pub const UNSUPPORTED: u8 = b'E';
}

/// Message type tags
pub mod tags {
    /// Authentication request
    pub const AUTHENTICATION: u8 = b'R';

    /// Backend key data
    pub const BACKEND_KEY_DATA: u8 = b'K';

    /// Command complete
    pub const COMMAND_COMPLETE: u8 = b'C';

    /// Data row
    pub const DATA_ROW: u8 = b'D';

    /// Empty query response
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';

    /// Error response
    pub const ERROR_RESPONSE: u8 = b'E';

    /// Notice response
    pub const NOTICE_RESPONSE: u8 = b'N';

    /// Parameter status
    pub const PARAMETER_STATUS: u8 = b'S';

    /// Ready for query
    pub const READY_FOR_QUERY: u8 = b'Z';

    /// Row description
    pub const ROW_DESCRIPTION: u8 = b'T';

    /// Every credential-bearing frontend message (password, SASL, GSS, vendor)
    pub const PASSWORD_MESSAGE: u8 = b'p';
}

/// Authentication request sub-types carried in an `'R'` frame
pub mod auth {
    /// Authentication successful
    pub const OK: i32 = 0;

    /// Kerberos V4 (obsolete)
    pub const KERBEROS_V4: i32 = 1;

    /// Kerberos V5 (obsolete)
    pub const KERBEROS_V5: i32 = 2;

    /// Cleartext password required
    pub const CLEARTEXT_PASSWORD: i32 = 3;

    /// crypt(3) password (obsolete)
    pub const CRYPT_PASSWORD: i32 = 4;

    /// MD5 password required
    pub const MD5_PASSWORD: i32 = 5;

    /// SCM credentials (unix sockets only)
    pub const SCM_CREDENTIAL: i32 = 6;

    /// GSSAPI negotiation start
    pub const GSS: i32 = 7;

    /// GSSAPI/SSPI continuation token
    pub const GSS_CONTINUE: i32 = 8;

    /// SSPI negotiation start
    pub const SSPI: i32 = 9;

    /// SASL mechanisms available (Postgres 10+)
    pub const SASL: i32 = 10;

    /// SASL server challenge
    pub const SASL_CONTINUE: i32 = 11;

    /// SASL server final message
    pub const SASL_FINAL: i32 = 12;

    /// Vendor signed challenge
    pub const CHALLENGE: i32 = 20;

    /// Vendor client watermark
    pub const WATERMARK: i32 = 21;

    /// Vendor MAC address list
    pub const MAC_ADDRESS: i32 = 22;

    /// National-algorithm SASL mechanisms available
    pub const NATIONAL_SASL: i32 = 23;

    /// National-algorithm SASL server challenge
    pub const NATIONAL_SASL_CONTINUE: i32 = 24;

    /// National-algorithm SASL server final message
    pub const NATIONAL_SASL_FINAL: i32 = 25;

    /// Vendor per-user application key
    pub const APP_KEY: i32 = 26;

    /// Vendor per-user MAC code
    pub const MAC_CODE: i32 = 27;
}

/// SQLSTATE codes the connection layer inspects
pub mod sqlstate {
    /// invalid_authorization_specification; drives the SSL-mode fallback
    pub const INVALID_AUTHORIZATION_SPECIFICATION: &str = "28000";

    /// sqlclient_unable_to_establish_sqlconnection
    pub const CONNECTION_REJECTED: &str = "08004";

    /// connection_failure
    pub const CONNECTION_FAILURE: &str = "08006";

    /// protocol_violation
    pub const PROTOCOL_VIOLATION: &str = "08P01";
}

/// Transaction status
pub mod tx_status {
    /// Idle (not in transaction)
    pub const IDLE: u8 = b'I';

    /// In transaction block
    pub const IN_TRANSACTION: u8 = b'T';

    /// Failed transaction (queries will be rejected until END)
    pub const FAILED: u8 = b'E';
}
