use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Corral application
#[derive(Error, Debug)]
pub enum CorralError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Scheduling errors
    #[error("no proxy available")]
    NoProxyAvailable,

    #[error("no qualified proxy found")]
    NoQualifiedProxy,

    #[error("Proxy not found: {id}")]
    ProxyNotFound { id: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Upstream source errors
    #[error("Source error: {source_name}: {message}")]
    SourceError {
        source_name: String,
        message: String,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Corral operations
pub type Result<T> = std::result::Result<T, CorralError>;

impl CorralError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            CorralError::InvalidRequest(_)
            | CorralError::InvalidProxyAddress(_)
            | CorralError::UnsupportedProtocol(_)
            | CorralError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found: an exhausted pool looks the same as a missing
            // row to the dispense caller
            CorralError::NoProxyAvailable
            | CorralError::NoQualifiedProxy
            | CorralError::ProxyNotFound { .. }
            | CorralError::NotFound(_) => StatusCode::NOT_FOUND,

            // Timeout
            CorralError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 502 Bad Gateway
            CorralError::SourceError { .. } | CorralError::HttpClient(_) => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            CorralError::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            CorralError::Database(_)
            | CorralError::Io(_)
            | CorralError::MissingEnvVar(_)
            | CorralError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for CorralError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for CorralError {
    fn from(err: url::ParseError) -> Self {
        CorralError::InvalidProxyAddress(err.to_string())
    }
}
