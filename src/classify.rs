//! Maps failures to status codes and decides how loudly to log them.

use once_cell::sync::Lazy;
use regex::Regex;

use http::StatusCode;

use crate::error::Error;

/// Classifies an invocation failure cause into the status code an
/// [`crate::response::ResponseWriter`] should send when the codec reports
/// `failure_response_fails_session`, per SPEC_FULL §4.F: a request timeout
/// maps to `503`, everything else to `500`.
pub fn invocation_status(cause: &Error) -> StatusCode {
    if cause.is_request_timeout() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

// Connection resets and broken pipes are a normal consequence of clients
// disconnecting early; logging them at `warn` would just be noise for any
// server with real traffic.
static BENIGN_TRANSPORT_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i).*(connection.*(reset|closed|abort|broken)|broken.*pipe).*")
        .expect("benign transport error pattern is valid")
});

/// Whether a transport-error message matches a known-benign disconnect
/// pattern, in which case it should be logged at `debug` rather than `warn`.
pub fn is_benign_transport_message(message: &str) -> bool {
    BENIGN_TRANSPORT_ERROR.is_match(message)
}

/// Logs a transport-layer error at the appropriate level given the benign
/// pattern filter.
pub fn log_transport_error(err: &Error) {
    let message = err.to_string();
    if is_benign_transport_message(&message) {
        tracing::debug!(error = %message, "benign transport error, closing connection");
    } else {
        tracing::warn!(error = %message, "transport error, closing connection");
    }
}
