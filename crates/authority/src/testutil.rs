//! Shared test utilities for authority testing.
//!
//! Fake signing oracles and configuration helpers. Feature-gated behind
//! `testutil`.
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use privca_authority::testutil::{FakeX509Signer, acme_config};
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use privca_provisioner::{
    CertificateTemplate, ProvisionerExtension, SshCertificate,
    ssh::{SshPublicKey, SshSignature},
    testutil::{TEST_CA_URL, create_certificate},
    x509::PROVISIONER_OID,
};
use serde_json::json;

use crate::{config::AuthorityConfig, error::Result, signer::{SshSigner, X509Signer}};

/// Issues self-signed certificates with sequential serials, carrying the
/// template's provisioner attribution.
#[derive(Debug)]
pub struct FakeX509Signer {
    next_serial: AtomicU64,
}

impl Default for FakeX509Signer {
    fn default() -> Self {
        Self { next_serial: AtomicU64::new(1000) }
    }
}

#[async_trait]
impl X509Signer for FakeX509Signer {
    async fn sign(&self, template: &CertificateTemplate) -> Result<Vec<u8>> {
        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        let extension = template
            .extension(PROVISIONER_OID)
            .map(|ext| ProvisionerExtension::from_der(&ext.value))
            .transpose()?;
        Ok(create_certificate(serial, extension.as_ref()))
    }
}

/// Fills in the fields an SSH CA would set when signing.
#[derive(Debug, Default)]
pub struct FakeSshSigner {
    /// Leave the signature unset, producing an incomplete certificate.
    pub omit_signature: bool,
}

#[async_trait]
impl SshSigner for FakeSshSigner {
    async fn sign(&self, mut cert: SshCertificate) -> Result<SshCertificate> {
        let ca_key = SshPublicKey { algorithm: "ssh-ed25519".into(), blob: vec![9; 32] };
        cert.nonce = vec![1; 16];
        cert.serial = 77;
        cert.signature_key = Some(ca_key);
        if !self.omit_signature {
            cert.signature = Some(SshSignature { format: "ssh-ed25519".into(), blob: vec![5; 64] });
        }
        Ok(cert)
    }
}

/// Configuration with the given provisioners and the test CA URL.
#[must_use]
pub fn authority_config(provisioners: serde_json::Value) -> AuthorityConfig {
    serde_json::from_value(json!({"baseUrl": TEST_CA_URL, "provisioners": provisioners}))
        .expect("valid authority configuration")
}

/// Configuration with a single ACME provisioner named `acme`.
#[must_use]
pub fn acme_config() -> AuthorityConfig {
    authority_config(json!([{"type": "ACME", "name": "acme"}]))
}
