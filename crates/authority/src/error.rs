//! Authority error types and result alias.
//!
//! Provisioner errors pass through unchanged so their status class and
//! message survive to the API layer. Errors raised by the authority itself
//! (lookup, one-time-token tracking, revocation bookkeeping) carry their own
//! status hint.

use std::sync::Arc;

use privca_provisioner::ProvisionerError;
use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for authority operations.
pub type Result<T> = std::result::Result<T, AuthorityError>;

/// Errors produced by the authority.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthorityError {
    /// Error raised by a provisioner or a sign-option pipeline.
    #[error(transparent)]
    Provisioner(#[from] ProvisionerError),

    /// Invalid authority configuration. Fatal at startup.
    #[error("{message}")]
    Config {
        /// Description of the configuration defect.
        message: String,
    },

    /// The request is malformed or conflicts with recorded state.
    #[error("{message}")]
    BadRequest {
        /// Description of the problem.
        message: String,
    },

    /// The credential was not accepted.
    #[error("{message}")]
    Unauthorized {
        /// Description of the failure.
        message: String,
    },

    /// The requested record does not exist.
    #[error("{message}")]
    NotFound {
        /// Description of what was looked up.
        message: String,
    },

    /// The operation is not supported.
    #[error("{message}")]
    NotImplemented {
        /// Description of the missing capability.
        message: String,
    },

    /// Unexpected failure in a collaborator (store, signer).
    #[error("{message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl AuthorityError {
    /// Creates a [`AuthorityError::Config`] error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Creates a [`AuthorityError::BadRequest`] error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    /// Creates a [`AuthorityError::Unauthorized`] error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    /// Creates a [`AuthorityError::NotFound`] error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Creates a [`AuthorityError::NotImplemented`] error.
    #[must_use]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented { message: message.into() }
    }

    /// Creates a [`AuthorityError::Internal`] error without a source.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a [`AuthorityError::Internal`] error wrapping `source`.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// HTTP status hint for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Provisioner(e) => e.status_code(),
            Self::BadRequest { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::NotFound { .. } => 404,
            Self::Config { .. } | Self::Internal { .. } => 500,
            Self::NotImplemented { .. } => 501,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_provisioner_errors_keep_status_and_message() {
        let err: AuthorityError = ProvisionerError::forbidden("renew is disabled for provisioner x").into();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.to_string(), "renew is disabled for provisioner x");

        let err: AuthorityError = ProvisionerError::not_implemented("nope").into();
        assert_eq!(err.status_code(), 501);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthorityError::bad_request("x").status_code(), 400);
        assert_eq!(AuthorityError::unauthorized("x").status_code(), 401);
        assert_eq!(AuthorityError::config("x").status_code(), 500);
        assert_eq!(AuthorityError::internal("x").status_code(), 500);
        assert_eq!(AuthorityError::not_implemented("x").status_code(), 501);
    }

    #[test]
    fn test_internal_preserves_source() {
        let io = std::io::Error::other("disk full");
        let err = AuthorityError::internal_with_source("error storing revocation", io);
        assert_eq!(err.to_string(), "error storing revocation");
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("disk full"));
    }
}
