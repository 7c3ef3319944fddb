//! Shared HTTP plumbing for the REST adapters (WebDAV, Azure, Upyun).

use std::time::Duration;

use futures::StreamExt;
use stowage_core::{Settings, StorageError, StorageResult};

use crate::traits::ByteStream;

const REQUEST_TIMEOUT_SECS: u64 = 300;
const ERROR_BODY_LIMIT: usize = 512;

/// Client with the dial bounded by `connect_timeout` and the whole request
/// bounded by a fixed ceiling.
pub fn build_client(settings: &Settings, tls_skip_verify: bool) -> StorageResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .danger_accept_invalid_certs(tls_skip_verify)
        .build()
        .map_err(|e| StorageError::internal("failed to create HTTP client").with_source(e))
}

/// Transport-level failure (no HTTP status available).
pub fn network_error(context: impl Into<String>, err: reqwest::Error) -> StorageError {
    let context = context.into();
    let message = if err.is_timeout() {
        format!("{}: request timed out", context)
    } else if err.is_connect() {
        format!("{}: connection failed", context)
    } else {
        context
    };
    StorageError::network(message).with_source(err)
}

/// Categorized error for a non-success response, carrying a body excerpt.
pub async fn status_error(context: impl Into<String>, response: reqwest::Response) -> StorageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let message = if excerpt.trim().is_empty() {
        format!("{}: HTTP {}", context.into(), status)
    } else {
        format!("{}: HTTP {}: {}", context.into(), status, excerpt.trim())
    };
    StorageError::from_http_status(status.as_u16(), message)
}

/// Response body as an adapter byte stream.
pub fn body_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| network_error("response body stream failed", e))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client() {
        assert!(build_client(&Settings::default(), false).is_ok());
        assert!(build_client(&Settings::default(), true).is_ok());
    }
}
