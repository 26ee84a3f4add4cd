//! # privca provisioner
//!
//! Credential issuers ("provisioners") for a private certificate authority.
//!
//! This crate provides:
//! - **Provisioners**: JWK, OIDC, X5C, ACME and Kubernetes service account
//!   credential checks, as a closed [`Provisioner`] enum
//! - **Claims**: per-provisioner policy merged over authority-wide defaults
//! - **Sign-option pipelines**: ordered modifiers and validators applied to
//!   X.509 templates and SSH certificates before signing
//!
//! ## Example
//!
//! ```no_run
//! use privca_provisioner::{Config, Provisioner, ProvisionerRegistry, SignContext};
//!
//! # fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let mut provisioner: Provisioner =
//!     serde_json::from_str(r#"{"type": "ACME", "name": "acme", "forceCN": true}"#)?;
//! provisioner.init(&Config::default(), &ProvisionerRegistry::new())?;
//!
//! let options = provisioner.authorize_sign(&SignContext::x509(), token)?;
//! println!("{} sign options", options.len());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// ACME provisioner.
pub mod acme;
/// Provisioner policy and its resolution.
pub mod claims;
/// Load-time configuration.
pub mod config;
/// Go-style duration formatting.
pub mod duration;
/// Provisioner error types.
pub mod error;
/// JWK provisioner.
pub mod jwk;
/// Kubernetes service account provisioner.
pub mod k8s_sa;
/// Token verification keys.
pub mod keys;
/// OpenID Connect provisioner.
pub mod oidc;
/// Modifier/validator pipelines.
pub mod pipeline;
/// The provisioner enum and its capabilities.
pub mod provisioner;
/// X.509 sign options.
pub mod sign_options;
/// SSH certificates and their sign options.
pub mod ssh;
/// Token decoding and verification.
pub mod token;
/// Algorithm validation.
pub mod validation;
/// X.509 templates, certificate metadata and the attribution extension.
pub mod x509;
/// X5C provisioner.
pub mod x5c;

/// Shared test utilities (feature-gated behind `testutil`).
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

// Re-export key types for convenience
pub use claims::{Claimer, Claims, GlobalClaims};
pub use config::{Audiences, Config, ProvisionerRegistry};
pub use error::{ProvisionerError, Result};
pub use pipeline::{Modifier, Pipeline, SignContext, SignMethod, SignOptions, Validator};
pub use provisioner::{Provisioner, ProvisionerType};
pub use ssh::{SshCertificate, SshCertificateDefaultValidator};
pub use x509::{CertificateInfo, CertificateTemplate, ProvisionerExtension};
