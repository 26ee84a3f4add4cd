//! Revocation requests and their bookkeeping.
//!
//! Only passive revocation is supported: the serial is recorded as revoked
//! and nothing is pushed to relying parties. Records live in a
//! [`RevocationStore`]; [`MemoryRevocationStore`] keeps them in process.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use fail::fail_point;
use parking_lot::RwLock;

use crate::error::{AuthorityError, Result};

/// Parameters of an authorized revocation, as handed to the authority.
#[derive(Clone, Debug, Default, PartialEq, Eq, Builder)]
pub struct RevokeOptions {
    /// Serial number of the certificate, in decimal.
    #[builder(into)]
    pub serial: String,
    /// RFC 5280 reason code.
    #[builder(default)]
    pub reason_code: u8,
    /// Free-form reason.
    #[builder(into, default)]
    pub reason: String,
    /// Record only; never push the revocation anywhere.
    #[builder(default = true)]
    pub passive_only: bool,
    /// The request was authenticated with the client certificate.
    #[builder(default)]
    pub mtls: bool,
    /// One-time revocation token, when token-authenticated.
    #[builder(into)]
    pub ott: Option<String>,
    /// DER of the client certificate, when mTLS-authenticated.
    pub crt: Option<Vec<u8>>,
}

/// A recorded revocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevokedCertificate {
    /// Serial number, in decimal.
    pub serial: String,
    /// Id of the provisioner that authorized the revocation.
    pub provisioner_id: String,
    /// RFC 5280 reason code.
    pub reason_code: u8,
    /// Free-form reason.
    pub reason: String,
    /// Whether the request was mTLS-authenticated.
    pub mtls: bool,
    /// When the revocation was recorded.
    pub revoked_at: DateTime<Utc>,
}

/// Persistence for revoked serials.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Records a revocation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::BadRequest`] if the serial was already
    /// revoked, or [`AuthorityError::Internal`] on storage failure.
    async fn insert(&self, record: RevokedCertificate) -> Result<()>;

    /// Looks up the revocation of `serial`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Internal`] on storage failure.
    async fn get(&self, serial: &str) -> Result<Option<RevokedCertificate>>;

    /// Returns `true` if `serial` has been revoked.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Internal`] on storage failure.
    async fn is_revoked(&self, serial: &str) -> Result<bool> {
        Ok(self.get(serial).await?.is_some())
    }
}

/// Duplicate-revocation error for `serial`.
#[must_use]
pub fn already_revoked(serial: &str) -> AuthorityError {
    AuthorityError::bad_request(format!("certificate with serial number {serial} has already been revoked"))
}

/// In-process [`RevocationStore`].
///
/// Cheaply cloneable; clones share the same records.
#[derive(Clone, Debug, Default)]
pub struct MemoryRevocationStore {
    records: Arc<RwLock<HashMap<String, RevokedCertificate>>>,
}

impl MemoryRevocationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded revocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if nothing has been revoked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn insert(&self, record: RevokedCertificate) -> Result<()> {
        fail_point!("revocation-store-insert", |_| {
            Err(AuthorityError::internal("injected failure: revocation-store-insert"))
        });

        let mut records = self.records.write();
        if records.contains_key(&record.serial) {
            return Err(already_revoked(&record.serial));
        }
        records.insert(record.serial.clone(), record);
        Ok(())
    }

    async fn get(&self, serial: &str) -> Result<Option<RevokedCertificate>> {
        Ok(self.records.read().get(serial).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn record(serial: &str) -> RevokedCertificate {
        RevokedCertificate {
            serial: serial.to_owned(),
            provisioner_id: "acme/acme".to_owned(),
            reason_code: 1,
            reason: "key compromise".to_owned(),
            mtls: false,
            revoked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryRevocationStore::new();
        assert!(!store.is_revoked("42").await.unwrap());

        store.insert(record("42")).await.unwrap();
        assert!(store.is_revoked("42").await.unwrap());
        assert_eq!(store.get("42").await.unwrap().unwrap().reason, "key compromise");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let store = MemoryRevocationStore::new();
        store.insert(record("42")).await.unwrap();

        let err = store.insert(record("42")).await.unwrap_err();
        assert_eq!(err.to_string(), "certificate with serial number 42 has already been revoked");
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_clones_share_records() {
        let store = MemoryRevocationStore::new();
        let clone = store.clone();
        clone.insert(record("7")).await.unwrap();
        assert!(store.is_revoked("7").await.unwrap());
    }

    #[test]
    fn test_revoke_options_builder_defaults() {
        let opts = RevokeOptions::builder().serial("1").build();
        assert!(opts.passive_only);
        assert!(!opts.mtls);
        assert_eq!(opts.reason_code, 0);
        assert!(opts.ott.is_none());
    }
}
