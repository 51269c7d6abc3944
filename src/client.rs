pub mod payment;
pub mod risk;

/// Sent on every outbound call so collaborators can attribute traffic.
pub const CALLER_SERVICE_HEADER: &str = "X-Caller-Service";
pub const CALLER_SERVICE: &str = "core-bank-service";

/// Joins a configured base url and an absolute api path without doubling the
/// slash.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
