//! # privca authority
//!
//! The certificate authority facade over [`privca_provisioner`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 HTTP handlers (privca-api)               │
//! ├──────────────────────────────────────────────────────────┤
//! │                        Authority                         │
//! │  ProvisionerCollection │ UsedTokenCache │ RevocationStore│
//! ├──────────────────────────────────────────────────────────┤
//! │            Provisioners and sign options                 │
//! ├──────────────────────────────────────────────────────────┤
//! │               X509Signer │ SshSigner                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use privca_authority::{Authority, AuthorityConfig};
//! use privca_provisioner::SignContext;
//!
//! # async fn example(json: &str, token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let authority = Authority::new(AuthorityConfig::from_json(json)?)?;
//! let options = authority.authorize_sign(token, SignContext::x509()).await?;
//! println!("{} sign options", options.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: fake signing oracles and configuration helpers.
//! - **`failpoints`**: enables fail-point injection for fault testing.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The authority facade.
pub mod authority;
/// Provisioner lookup.
pub mod collection;
/// Authority configuration.
pub mod config;
/// Authority error types.
pub mod error;
/// Revocation options and storage.
pub mod revocation;
/// Root certificates by fingerprint.
pub mod roots;
/// Signing oracle traits.
pub mod signer;
/// One-time token tracking.
pub mod token_cache;

/// Shared test utilities (feature-gated behind `testutil`).
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use authority::Authority;
pub use collection::ProvisionerCollection;
pub use config::{AuthorityConfig, TokenCacheConfig};
pub use error::{AuthorityError, Result};
pub use revocation::{MemoryRevocationStore, RevocationStore, RevokeOptions, RevokedCertificate};
pub use roots::RootStore;
pub use signer::{SshSigner, X509Signer};
pub use token_cache::UsedTokenCache;
