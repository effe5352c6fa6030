//! Error types for Vestibule
//!
//! Every failure a request can hit maps onto one variant here. The server
//! turns a variant into a status code with a short diagnostic body.

use hyper::StatusCode;

/// Main error type for Vestibule operations
#[derive(Debug, thiserror::Error)]
pub enum VestibuleError {
    /// Inbound host has no registered domain config
    #[error("No config for host: {0}")]
    ConfigNotFound(String),

    /// A rule pair that cannot produce a rewritten path
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Neither a matching rule nor a default rule applies
    #[error("No route matched: {0}")]
    NoRouteMatched(String),

    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// Config, tenant or cache store unavailable
    #[error("Storage error: {0}")]
    Storage(String),

    /// The upstream body could not be read
    #[error("Invalid response encoding: {0}")]
    InvalidResponseEncoding(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VestibuleError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigNotFound(_) => StatusCode::BAD_REQUEST,
            Self::NoRouteMatched(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRule(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidResponseEncoding(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Routing and request-shape errors caused by the caller
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Failures of the origin fetch that may be answered with a stale entry
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTransport(_) | Self::UpstreamTimeout(_) | Self::InvalidResponseEncoding(_)
        )
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for VestibuleError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for VestibuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for VestibuleError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for VestibuleError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<bson::ser::Error> for VestibuleError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Storage(format!("BSON encode failed: {}", err))
    }
}

impl From<bson::de::Error> for VestibuleError {
    fn from(err: bson::de::Error) -> Self {
        Self::Storage(format!("BSON decode failed: {}", err))
    }
}

/// Result type alias for Vestibule operations
pub type Result<T> = std::result::Result<T, VestibuleError>;
