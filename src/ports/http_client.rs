use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the backend does not answer in time
    #[error("Timeout error after {0} seconds")]
    Timeout(u64),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HttpClientError::ConnectionError(_) => "connect",
            HttpClientError::Timeout(_) => "timeout",
            HttpClientError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for forwarding requests to backends
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to a backend server
    ///
    /// # Arguments
    /// * `req` - The fully addressed request (absolute URI, rewritten headers)
    ///
    /// # Returns
    /// The backend's response with its body still streaming. For a
    /// `101 Switching Protocols` answer the response extensions carry the
    /// upgrade handle of the upstream connection.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
