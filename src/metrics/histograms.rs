//! Histogram helpers

use super::labels;
use metrics::histogram;
use std::time::Duration;

/// Time from the first authentication request to loop exit
pub fn auth_duration(mechanism: &'static str, elapsed: Duration) {
    histogram!(labels::AUTH_DURATION, labels::LABEL_MECHANISM => mechanism)
        .record(elapsed.as_secs_f64() * 1000.0);
}
