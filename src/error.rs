//! Error types for the portfolio flow pipeline
//!
//! One enum per component, built with thiserror so each failure carries a readable
//! message and its source chain. `ServiceError` aggregates the ones a visualization
//! operation can surface.

use thiserror::Error;

/// Failure reported by (or while talking to) the TargetProcess REST API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct UpstreamError {
    /// HTTP status of the failed response; `None` for transport failures
    pub status_code: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            message: message.into(),
        }
    }

    /// Connection, timeout or body decoding failure with no HTTP status attached
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: message.into(),
        }
    }

    /// 4xx responses are surfaced immediately and never retried
    pub fn is_client_error(&self) -> bool {
        matches!(self.status_code, Some(code) if (400..500).contains(&code))
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_client_error()
    }

    /// 401/403: the credentials were rejected, so every other request will be too
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status_code, Some(401 | 403))
    }
}

/// Malformed input handed to the graph transformer
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Failed to transform data to Sankey format: '{collection}' is not an array")]
    MalformedCollection { collection: String },

    #[error("Failed to transform data to Sankey format: input must be a JSON object")]
    NotAnObject,
}

/// Startup configuration problems; fatal to process start
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variables: {0}")]
    Missing(String),

    #[error("Either TP_API_TOKEN or both TP_USERNAME and TP_PASSWORD must be provided")]
    MissingCredentials,

    #[error("Invalid upstream base URL '{url}': {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Malformed or unsupported frame received from a viewer connection
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    InvalidFormat(#[source] serde_json::Error),

    #[error("Unknown message type")]
    UnknownType(String),

    #[error("Visualization ID is required")]
    MissingVisualizationId,

    #[error("Failed to encode outbound message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors surfaced by visualization create/read/refresh/delete
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Visualization '{0}' not found")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(UpstreamError::new(404, "missing").is_client_error());
        assert!(UpstreamError::new(400, "bad").is_client_error());
        assert!(UpstreamError::new(499, "odd").is_client_error());
        assert!(!UpstreamError::new(500, "boom").is_client_error());
        assert!(!UpstreamError::new(399, "redirect").is_client_error());
        assert!(UpstreamError::transport("refused").is_retryable());
    }

    #[test]
    fn test_auth_failures() {
        assert!(UpstreamError::new(401, "Unauthorized").is_auth_failure());
        assert!(UpstreamError::new(403, "Forbidden").is_auth_failure());
        assert!(!UpstreamError::new(404, "missing").is_auth_failure());
        assert!(!UpstreamError::transport("refused").is_auth_failure());
    }

    #[test]
    fn test_service_error_is_transparent_for_upstream() {
        let err: ServiceError = UpstreamError::new(502, "Search Epic entities failed").into();
        assert_eq!(err.to_string(), "Search Epic entities failed");
    }
}
