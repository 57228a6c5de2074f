use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

use crate::core::rewrite::OutboundRequest;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to the destination fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when a single attempt exceeds the request timeout
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Destination kept answering with a retryable status
    #[error("Destination returned error status: {status}, url: {url}")]
    BackendError {
        /// The URL that was requested
        url: String,
        /// The status code returned by the destination
        status: StatusCode,
    },

    /// Every attempt allowed by the retry policy failed
    #[error("Giving up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<HttpClientError>,
    },
}

impl HttpClientError {
    /// Whether another attempt of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HttpClientError::ConnectionError(_)
                | HttpClientError::Timeout(_)
                | HttpClientError::BackendError { .. }
        )
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) the dispatch workers deliver through
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Deliver a request to its destination
    ///
    /// # Arguments
    /// * `req` - Fully buffered outbound request with an absolute URI
    ///
    /// # Returns
    /// The destination's response with its body already read (bounded by the
    /// request timeout), or an error once the implementation's own retry
    /// policy has given up
    async fn send_request(&self, req: OutboundRequest) -> HttpClientResult<Response<AxumBody>>;
}

/// Extract `scheme://authority` of a request for logging.
pub fn destination_of<B>(req: &Request<B>) -> String {
    format!(
        "{}://{}",
        req.uri().scheme_str().unwrap_or("https"),
        req.uri()
            .authority()
            .map_or_else(|| "unknown".to_string(), |a| a.to_string())
    )
}
