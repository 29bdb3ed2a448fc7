//! Metric names and label values

/// Authentication attempts, by mechanism
pub const AUTH_ATTEMPTED: &str = "herodb_wire_auth_attempted_total";
/// Authentications that reached AuthenticationOk or the vendor exit
pub const AUTH_SUCCEEDED: &str = "herodb_wire_auth_succeeded_total";
/// Authentication failures, by mechanism and reason
pub const AUTH_FAILED: &str = "herodb_wire_auth_failed_total";
/// Time spent in the authentication loop
pub const AUTH_DURATION: &str = "herodb_wire_auth_duration_ms";
/// Connection attempts per endpoint
pub const HOST_ATTEMPTS: &str = "herodb_wire_host_attempts_total";
/// Failed connection attempts per endpoint
pub const HOST_FAILURES: &str = "herodb_wire_host_failures_total";
/// Retries with a different SSL mode
pub const SSL_FALLBACKS: &str = "herodb_wire_ssl_fallbacks_total";

pub const LABEL_MECHANISM: &str = "mechanism";
pub const LABEL_REASON: &str = "reason";
pub const LABEL_ENDPOINT: &str = "endpoint";
pub const LABEL_CATEGORY: &str = "category";
pub const LABEL_FROM: &str = "from";
pub const LABEL_TO: &str = "to";
