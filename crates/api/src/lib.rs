//! # privca api
//!
//! HTTP surface of the certificate authority.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use privca_api::router;
//! use privca_authority::{Authority, AuthorityConfig};
//!
//! # async fn example(json: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let authority = Authority::new(AuthorityConfig::from_json(json)?)?;
//! let app = router(Arc::new(authority));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// API error type and its rendering.
pub mod error;
/// Routes and handlers.
pub mod handler;
/// Revoke request and response bodies.
pub mod revoke;

pub use error::{ApiError, BoxError, Result};
pub use handler::{CertificateAuthority, PeerCertificates, router};
pub use revoke::{RevokeRequest, RevokeResponse};
