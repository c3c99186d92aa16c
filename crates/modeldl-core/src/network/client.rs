//! HTTP client construction for the streaming fetcher.

use crate::config::NetworkConfig;
use crate::{DownloadError, Result};
use reqwest::{Client, StatusCode};

/// Build the shared [`reqwest::Client`] used for all model file transfers.
/// A single client is constructed once and reused so connection pooling
/// works across files and across downloads.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
        .user_agent(concat!("modeldl/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(DownloadError::Network)
}

/// Whether an HTTP status represents a transient fault worth retrying.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

/// Whether an HTTP status represents a permanent failure not worth retrying.
pub fn is_permanent_failure(status: StatusCode) -> bool {
    matches!(status.as_u16(), 400 | 401 | 403 | 404)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_status_codes() {
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::OK));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn permanent_failure_status_codes() {
        assert!(is_permanent_failure(StatusCode::UNAUTHORIZED));
        assert!(is_permanent_failure(StatusCode::NOT_FOUND));
        assert!(!is_permanent_failure(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn build_client_succeeds() {
        assert!(build_client().is_ok());
    }
}
