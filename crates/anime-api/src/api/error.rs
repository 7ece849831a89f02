//! Terminal failures surfaced by the Jikan client.

use thiserror::Error;

/// A failed API call.
///
/// Every variant is terminal: transient conditions are retried inside the
/// transport and only reach the caller once retries are exhausted.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// HTTP 429 on every allowed attempt
    #[error("rate limited: {message} ({url}, attempt {attempt})")]
    RateLimited {
        message: String,
        url: String,
        status: u16,
        attempt: u32,
    },

    /// HTTP 5xx on every allowed attempt
    #[error("server error {status}: {message} ({url}, attempt {attempt})")]
    ServerError {
        message: String,
        url: String,
        status: u16,
        attempt: u32,
        body: Option<String>,
    },

    /// Any 4xx other than 429; never retried
    #[error("client error {status}: {message} ({url})")]
    ClientError {
        message: String,
        url: String,
        status: u16,
        attempt: u32,
        body: Option<String>,
    },

    /// No HTTP response at all (DNS, connection reset, timeout)
    #[error("network failure: {message} ({url}, attempt {attempt})")]
    NetworkFailure {
        message: String,
        url: String,
        attempt: u32,
    },

    /// A 2xx body that is not the JSON shape the caller expected
    #[error("failed to decode response from {url}: {message}")]
    Decode { message: String, url: String },
}

impl ApiError {
    /// URL of the request that failed
    pub fn url(&self) -> &str {
        match self {
            ApiError::RateLimited { url, .. }
            | ApiError::ServerError { url, .. }
            | ApiError::ClientError { url, .. }
            | ApiError::NetworkFailure { url, .. }
            | ApiError::Decode { url, .. } => url,
        }
    }

    /// HTTP status, when a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited { status, .. }
            | ApiError::ServerError { status, .. }
            | ApiError::ClientError { status, .. } => Some(*status),
            ApiError::NetworkFailure { .. } | ApiError::Decode { .. } => None,
        }
    }

    /// Attempt number on which the failure became terminal
    pub fn attempt(&self) -> Option<u32> {
        match self {
            ApiError::RateLimited { attempt, .. }
            | ApiError::ServerError { attempt, .. }
            | ApiError::ClientError { attempt, .. }
            | ApiError::NetworkFailure { attempt, .. } => Some(*attempt),
            ApiError::Decode { .. } => None,
        }
    }

    /// Response body text, for server and client errors
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::ServerError { body, .. } | ApiError::ClientError { body, .. } => {
                body.as_deref()
            }
            _ => None,
        }
    }

    pub(crate) fn decode(url: &str, err: impl std::fmt::Display) -> Self {
        ApiError::Decode {
            message: err.to_string(),
            url: url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let err = ApiError::ServerError {
            message: "Service Unavailable".to_string(),
            url: "https://api.jikan.moe/v4/anime/1?sfw=true".to_string(),
            status: 503,
            attempt: 4,
            body: Some("maintenance".to_string()),
        };

        assert_eq!(err.url(), "https://api.jikan.moe/v4/anime/1?sfw=true");
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.attempt(), Some(4));
        assert_eq!(err.body(), Some("maintenance"));
    }

    #[test]
    fn test_network_failure_has_no_status() {
        let err = ApiError::NetworkFailure {
            message: "connection reset".to_string(),
            url: "https://api.jikan.moe/v4/top/anime?sfw=true".to_string(),
            attempt: 4,
        };

        assert_eq!(err.status(), None);
        assert_eq!(err.body(), None);
        assert!(err.to_string().contains("connection reset"));
    }
}
