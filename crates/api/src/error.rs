//! API error type.
//!
//! Every error carries the status it is rendered with. Errors coming back
//! from the authority keep their own status when they have one; anything
//! else is mapped to the fallback status chosen by the handler.

use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use privca_authority::AuthorityError;
use privca_provisioner::ProvisionerError;
use serde::Serialize;
use thiserror::Error;

/// Error type returned by collaborators of the HTTP layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Message rendered in place of internal error details.
pub const INTERNAL_SERVER_ERROR_MESSAGE: &str = "The certificate authority encountered an Internal Server Error. \
     Please see the certificate authority logs for more info.";

/// Errors rendered by the HTTP handlers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The request is malformed.
    #[error("{message}")]
    BadRequest {
        /// Description of the problem.
        message: String,
    },

    /// The requested behavior is not supported.
    #[error("{message}")]
    NotImplemented {
        /// Description of the missing capability.
        message: String,
    },

    /// An error raised by a collaborator, with the status it maps to.
    #[error("{source}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The collaborator's error.
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl ApiError {
    /// Creates an [`ApiError::BadRequest`] error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    /// Creates an [`ApiError::NotImplemented`] error.
    #[must_use]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented { message: message.into() }
    }

    /// Wraps a collaborator error, keeping its status if it has one and
    /// using `fallback` otherwise.
    #[must_use]
    pub fn from_collaborator(err: BoxError, fallback: StatusCode) -> Self {
        let status = status_of(err.as_ref()).unwrap_or(fallback.as_u16());
        Self::Status { status, source: Arc::from(err) }
    }

    /// HTTP status code of this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::Status { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            },
        }
    }
}

fn status_of(err: &(dyn std::error::Error + Send + Sync + 'static)) -> Option<u16> {
    if let Some(e) = err.downcast_ref::<AuthorityError>() {
        return Some(e.status_code());
    }
    err.downcast_ref::<ProvisionerError>().map(ProvisionerError::status_code)
}

impl From<AuthorityError> for ApiError {
    fn from(err: AuthorityError) -> Self {
        let status = err.status_code();
        Self::Status { status, source: Arc::new(err) }
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal server error");
            INTERNAL_SERVER_ERROR_MESSAGE.to_owned()
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request failed");
            self.to_string()
        };
        (status, Json(ErrorBody { status: status.as_u16(), message })).into_response()
    }
}
