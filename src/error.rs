//! Error types.
//!
//! There are two families and they never mix:
//!
//! - [`Error`] is an infrastructure failure: binding a port, registering a
//!   route, draining connections. These surface at startup or shutdown.
//! - [`HandlerError`] is what a handler returns when a single request fails.
//!   It never escapes the request; the middleware chain (or, as a last
//!   resort, the app envelope) turns it into a JSON error response.

use std::collections::BTreeMap;
use std::time::Duration;

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::response::Response;

/// The error type returned by the crate's fallible infrastructure operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Binding or accepting on a socket failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A route could not be registered: duplicate or conflicting pattern.
    #[error("route {method} {path}: {source}")]
    Route {
        method: Method,
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    /// In-flight connections were still open when the shutdown timeout hit.
    #[error("could not stop server gracefully: {remaining} connection(s) still open after {timeout:?}")]
    DrainTimeout { timeout: Duration, remaining: usize },
}

/// A typed request failure returned from a [`Handler`](crate::Handler).
///
/// | Variant | Status | `error` field in the body |
/// |---|---|---|
/// | `Request` | the given status | the given message |
/// | `Validation` | 400 | `data validation error` plus `fields` |
/// | `Timeout` | 503 | `request timed out` |
/// | everything else | 500 | `Internal Server Error` |
///
/// Only `Request` and `Validation` messages are shown to the caller; the rest
/// are logged and replaced with the generic 500 text.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A failure whose message is safe to return to the client.
    #[error("{message}")]
    Request { status: StatusCode, message: String },

    /// One or more request fields failed validation.
    #[error("data validation error")]
    Validation { fields: BTreeMap<String, String> },

    /// The handler did not produce a response within the write timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The handler found the process in a state it cannot serve from.
    /// The app envelope asks the process to shut down when it sees this.
    #[error("shutdown requested: {0}")]
    Shutdown(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panic(String),

    /// Serialising the response body failed.
    #[error("encoding response: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// A client-visible failure with the given status.
    pub fn request(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Request { status, message: message.into() }
    }

    /// A validation failure from `(field, message)` pairs.
    pub fn validation<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Validation {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// A failure that should stop the whole process.
    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown(message.into())
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }

    /// The HTTP status this failure maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Request { status, .. } => *status,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Shutdown(_) | Self::Panic(_) | Self::Encode(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Builds the JSON error envelope for this failure.
    pub fn to_response(&self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Request { message, .. } => ErrorResponse::new(message.clone()),
            Self::Validation { fields } => ErrorResponse {
                error: self.to_string(),
                fields: Some(fields.clone()),
            },
            Self::Timeout(_) => ErrorResponse::new("request timed out"),
            _ => ErrorResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR
                    .canonical_reason()
                    .unwrap_or("Internal Server Error"),
            ),
        };
        body.into_response_with(status)
    }
}

/// The stable shape of every error body the service sends.
///
/// ```json
/// {"error": "data validation error", "fields": {"name": "is required"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into(), fields: None }
    }

    pub(crate) fn into_response_with(self, status: StatusCode) -> Response {
        match serde_json::to_vec(&self) {
            Ok(bytes) => Response::builder().status(status).json(bytes),
            Err(_) => Response::status(status),
        }
    }
}
