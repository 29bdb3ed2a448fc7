//! Counter helpers

use super::labels;
use metrics::counter;

/// The server requested `mechanism`
pub fn auth_attempted(mechanism: &'static str) {
    counter!(labels::AUTH_ATTEMPTED, labels::LABEL_MECHANISM => mechanism).increment(1);
}

pub fn auth_succeeded(mechanism: &'static str) {
    counter!(labels::AUTH_SUCCEEDED, labels::LABEL_MECHANISM => mechanism).increment(1);
}

pub fn auth_failed(mechanism: &'static str, reason: String) {
    counter!(
        labels::AUTH_FAILED,
        labels::LABEL_MECHANISM => mechanism,
        labels::LABEL_REASON => reason
    )
    .increment(1);
}

pub fn host_attempted(endpoint: String) {
    counter!(labels::HOST_ATTEMPTS, labels::LABEL_ENDPOINT => endpoint).increment(1);
}

pub fn host_failed(endpoint: String, category: String) {
    counter!(
        labels::HOST_FAILURES,
        labels::LABEL_ENDPOINT => endpoint,
        labels::LABEL_CATEGORY => category
    )
    .increment(1);
}

/// An attempt is being retried with another SSL mode
pub fn ssl_fallback(from: String, to: String) {
    counter!(labels::SSL_FALLBACKS, labels::LABEL_FROM => from, labels::LABEL_TO => to)
        .increment(1);
}
