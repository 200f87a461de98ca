//! Error types shared by the HTTP and realtime transports.

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`TransportError`] failures.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures that can occur while talking to the remote learning service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build HTTP client")]
    ClientBuilder {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The configured endpoint could not be turned into a valid URL.
    #[error("invalid endpoint URL `{url}`")]
    InvalidUrl {
        /// Rejected URL.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// A request could not be sent (connection reset, DNS failure, timeout).
    #[error("failed to send request to `{path}`")]
    RequestSend {
        /// Request path.
        path: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with an unexpected HTTP status code.
    #[error("unexpected response status {status} for `{path}`")]
    RequestStatus {
        /// Request path.
        path: String,
        /// Status returned by the server.
        status: StatusCode,
    },
    /// The server answered with an application-level rejection inside the response envelope.
    #[error("request to `{path}` rejected with code {code}: {message}")]
    Rejected {
        /// Request path.
        path: String,
        /// Application code from the envelope.
        code: i64,
        /// Server message.
        message: String,
    },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode response for `{path}`")]
    DecodeResponse {
        /// Request path.
        path: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// Decoding a JSON value into the expected model failed.
    #[error("failed to deserialize value for `{path}`")]
    DeserializeValue {
        /// Request path.
        path: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The realtime channel handshake failed.
    #[error("realtime handshake with `{url}` failed: {message}")]
    Handshake {
        /// Endpoint with its query string removed.
        url: String,
        /// Handshake failure reported by the websocket client.
        message: String,
    },
    /// Network failure reported without an underlying client error.
    #[error("network failure: {0}")]
    Network(String),
}

impl TransportError {
    /// HTTP status reported by the server, when the failure carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::RequestStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure is the server reporting a duplicate quiz submission.
    pub fn is_duplicate_submission(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }
}
