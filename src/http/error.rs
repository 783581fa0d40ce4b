//! Relay errors and their client-facing rendering.
//!
//! Every error that happens before response headers are sent becomes a JSON
//! body of the form `{"error": ..., "message": ...}`.

use std::any::Any;

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error raised while relaying a single request.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Connecting to or talking with the upstream failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// The upstream kept redirecting.
    #[error("upstream redirected more than {0} times")]
    TooManyRedirects(usize),

    /// The inbound request cannot be mapped onto the upstream.
    #[error("{0}")]
    InvalidRequest(String),

    /// An `Upgrade` other than `websocket` was requested.
    #[error("unsupported upgrade protocol {0:?}")]
    UnsupportedUpgrade(String),

    #[error("{0}")]
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Upstream(_) | RelayError::TooManyRedirects(_) => StatusCode::BAD_GATEWAY,
            RelayError::InvalidRequest(_) | RelayError::UnsupportedUpgrade(_) => StatusCode::BAD_REQUEST,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RelayError::Upstream(_) | RelayError::TooManyRedirects(_) => "Proxy Error",
            RelayError::InvalidRequest(_) | RelayError::UnsupportedUpgrade(_) => "Bad Request",
            RelayError::Internal(_) => "Internal Error",
        }
    }

    /// Message shown to the client. Upstream errors include the source chain
    /// so "connection refused" or a DNS failure is visible.
    fn client_message(&self) -> String {
        match self {
            RelayError::Upstream(e) => {
                let mut message = e.to_string();
                let mut source = std::error::Error::source(e);
                while let Some(cause) = source {
                    message.push_str(": ");
                    message.push_str(&cause.to_string());
                    source = cause.source();
                }
                message
            }
            other => other.to_string(),
        }
    }
}

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.label().to_string(),
            message: self.client_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Turn a handler panic into a 500 JSON response.
///
/// Used with `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(panic = %detail, "Request handler panicked");

    let body = serde_json::json!({
        "error": "Internal Error",
        "message": detail,
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
