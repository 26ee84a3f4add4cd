//! Signing oracles.
//!
//! The authority never touches CA private keys. Once a template has passed
//! its sign options it is handed to one of these traits, which produce the
//! signed certificate.

use async_trait::async_trait;
use privca_provisioner::{CertificateTemplate, SshCertificate};

use crate::error::Result;

/// Signs X.509 leaf certificates.
#[async_trait]
pub trait X509Signer: Send + Sync {
    /// Signs `template` and returns the DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Internal`](crate::AuthorityError::Internal)
    /// if signing fails.
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>>;
}

/// Signs SSH certificates.
#[async_trait]
pub trait SshSigner: Send + Sync {
    /// Fills in nonce, serial, signature key and signature.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Internal`](crate::AuthorityError::Internal)
    /// if signing fails.
    async fn sign(&self, cert: SshCertificate) -> Result<SshCertificate>;
}
