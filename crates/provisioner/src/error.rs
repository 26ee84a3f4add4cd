//! Provisioner error types.
//!
//! Every error produced while loading provisioners, authenticating a
//! credential or running a sign-option pipeline maps to one of the
//! categories below. Each category carries an HTTP status hint through
//! [`ProvisionerError::status_code`] so the API layer can surface it
//! without re-classifying.
//!
//! Messages produced by the sign-option pipelines are part of the
//! operator-facing contract and are displayed verbatim.

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Provisioner and signing-policy errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisionerError {
    /// Invalid provisioner or claims configuration.
    ///
    /// Raised while loading configuration; must prevent the authority from
    /// starting.
    #[error("{message}")]
    Config {
        /// Description of the configuration defect.
        message: String,
    },

    /// The request itself is malformed.
    #[error("{message}")]
    BadRequest {
        /// Description of what is malformed.
        message: String,
    },

    /// The credential could not be authenticated.
    #[error("{message}")]
    Unauthorized {
        /// Description of the authentication failure.
        message: String,
        /// The underlying parse or verification error.
        #[source]
        source: Option<BoxError>,
    },

    /// The credential is valid but the request violates provisioner policy.
    #[error("{message}")]
    Forbidden {
        /// Description of the violated rule.
        message: String,
    },

    /// The requested capability exists in the protocol but is not supported.
    #[error("{message}")]
    NotImplemented {
        /// Description of the missing capability.
        message: String,
    },

    /// Unexpected internal failure.
    #[error("{message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl ProvisionerError {
    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Creates a new `BadRequest` error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into(), source: None }
    }

    /// Creates a new `Unauthorized` error with a message and source error.
    ///
    /// The source's message is appended to `message` so the cause is
    /// visible without walking the chain.
    #[must_use]
    pub fn unauthorized_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        let message = format!("{}: {}", message.into(), source);
        Self::Unauthorized { message, source: Some(Arc::new(source)) }
    }

    /// Creates a new `Forbidden` (policy violation) error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    /// Creates a new `NotImplemented` error.
    #[must_use]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented { message: message.into() }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// HTTP status class associated with this error.
    ///
    /// | Variant          | Status |
    /// |------------------|--------|
    /// | `BadRequest`     | 400    |
    /// | `Unauthorized`   | 401    |
    /// | `Forbidden`      | 403    |
    /// | `Config`         | 500    |
    /// | `Internal`       | 500    |
    /// | `NotImplemented` | 501    |
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::Config { .. } | Self::Internal { .. } => 500,
            Self::NotImplemented { .. } => 501,
        }
    }

    /// Returns `true` if this error reports an unsupported capability rather
    /// than a rejected credential or request.
    #[must_use]
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }
}

impl From<jsonwebtoken::errors::Error> for ProvisionerError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        let message = match err.kind() {
            ErrorKind::InvalidToken => "error parsing token",
            ErrorKind::InvalidSignature => "error validating token signature",
            ErrorKind::ExpiredSignature => "token is expired",
            ErrorKind::ImmatureSignature => "token is not yet valid",
            ErrorKind::InvalidAudience => "invalid token audience",
            ErrorKind::InvalidIssuer => "invalid token issuer",
            ErrorKind::InvalidAlgorithm => "token algorithm does not match key",
            _ => "error validating token",
        };
        Self::unauthorized_with_source(message, err)
    }
}

/// Result type alias for provisioner operations.
pub type Result<T> = std::result::Result<T, ProvisionerError>;
