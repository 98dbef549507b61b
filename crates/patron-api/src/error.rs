//! Error translation for the API layer.
//!
//! [`ApiError`] covers the plain HTTP endpoints and converts into an Axum
//! response via its [`IntoResponse`](axum::response::IntoResponse)
//! implementation. [`graphql_error`] translates a [`ServiceError`] into the
//! GraphQL error a resolver returns, with `code` and `classification`
//! extensions.

use async_graphql::ErrorExtensions;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use patron_core::ServiceError;

/// Message shown to clients for failures whose details stay in the logs.
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// Errors that can occur in the HTTP endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Serialization(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("JSON error: {e}"))
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// GraphQL error classification for a service error.
pub const fn classification(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::NotFound(_) => "DataFetchingException",
        ServiceError::Validation(_) => "ValidationError",
        ServiceError::Storage(_) | ServiceError::Unknown(_) => "ExecutionAborted",
    }
}

/// Translate a service error into a resolver error.
///
/// Not-found and validation messages reach the client. Anything else is
/// logged here and replaced by [`INTERNAL_MESSAGE`].
pub fn graphql_error(err: &ServiceError) -> async_graphql::Error {
    let message = if err.is_client_facing() {
        err.to_string()
    } else {
        tracing::error!(code = err.code(), error = %err, "request failed");
        String::from(INTERNAL_MESSAGE)
    };
    let code = err.code();
    let class = classification(err);
    async_graphql::Error::new(message).extend_with(|_, ext| {
        ext.set("code", code);
        ext.set("classification", class);
    })
}
