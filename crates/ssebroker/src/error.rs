//! Error types for the broker and its HTTP surface

use crate::body::{IntoResponse, Response, ResponseBody};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for HTTP-facing operations
pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Errors raised by the broker handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The coordinator loop has exited; no more operations are accepted.
    #[error("broker is shut down")]
    Closed,
}

/// Errors that end a single subscriber session.
///
/// None of these escape the session: they close one connection and nothing else.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The peer went away or the response body was dropped mid-write.
    #[error("failed to write to subscriber: {0}")]
    WriteFailed(String),

    /// The compressing transform failed.
    #[error("encoder error: {0}")]
    Encoder(#[from] std::io::Error),
}

impl SessionError {
    /// Create a write failed error
    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable deserialization failed.
    #[error("configuration error: {0}")]
    Env(#[from] envy::Error),

    /// A value was present but unusable.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Variable name without prefix
        key: &'static str,
        /// What was wrong with it
        reason: String,
    },
}

/// HTTP error returned before a stream is established.
///
/// Rendered as a JSON body: `{"error":{"type":"...","message":"..."}}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: StatusCode,
    /// Error type identifier
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Internal details, logged but never sent to the client
    pub(crate) internal: Option<String>,
    /// Extra response headers, such as `Allow` on a 405
    pub(crate) headers: HeaderMap,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: StatusCode, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type: error_type.into(),
            message: message.into(),
            internal: None,
            headers: HeaderMap::new(),
        }
    }

    /// Create a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// Create a 405 Method Not Allowed error
    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", message)
    }

    /// Create a 500 Internal Server Error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    /// Create a 503 Service Unavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", message)
    }

    /// The transport cannot flush partial output, so events cannot be streamed.
    pub fn streaming_unsupported() -> Self {
        Self::internal("Server-Sent Events not supported")
    }

    /// Add internal details (for logging, never part of the response)
    pub fn with_internal(mut self, details: impl Into<String>) -> Self {
        self.internal = Some(details.into());
        self
    }

    /// Add a header to the rendered response
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(mut self) -> Response {
        if let Some(ref internal) = self.internal {
            tracing::debug!(error_type = %self.error_type, internal = %internal, "request rejected");
        }

        let status = self.status;
        let headers = std::mem::take(&mut self.headers);
        let body = serde_json::to_vec(&ErrorResponse::from(self)).unwrap_or_else(|_| {
            br#"{"error":{"type":"internal_error","message":"Failed to serialize error"}}"#.to_vec()
        });

        let mut response = http::Response::new(ResponseBody::full(Bytes::from(body)));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response.headers_mut().extend(headers);
        response
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Closed => ApiError::service_unavailable("Event broker is shutting down")
                .with_internal(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl From<ApiError> for ErrorResponse {
    fn from(err: ApiError) -> Self {
        Self {
            error: ErrorBody {
                error_type: err.error_type,
                message: err.message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn api_error_renders_json_body() {
        let response = ApiError::streaming_unsupported().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "internal_error");
        assert_eq!(json["error"]["message"], "Server-Sent Events not supported");
    }

    #[test]
    fn extra_headers_are_rendered() {
        let response = ApiError::method_not_allowed("nope")
            .with_header(header::ALLOW, HeaderValue::from_static("GET"))
            .into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn closed_broker_maps_to_service_unavailable() {
        let err: ApiError = BrokerError::Closed.into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.internal.as_deref(), Some("broker is shut down"));
    }
}
