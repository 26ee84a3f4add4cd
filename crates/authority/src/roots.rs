//! Root certificates, addressed by SHA-256 fingerprint.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;

use crate::error::{AuthorityError, Result};

/// Lowercase hex SHA-256 of a DER certificate.
#[must_use]
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// The configured roots, in configuration order.
#[derive(Clone, Debug, Default)]
pub struct RootStore {
    by_fingerprint: HashMap<String, usize>,
    ordered: Vec<Vec<u8>>,
}

impl RootStore {
    /// Parses PEM root certificates.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Config`] if an entry is not a PEM
    /// certificate.
    pub fn from_pem(roots: &[String]) -> Result<Self> {
        let mut store = Self::default();
        for (i, pem) in roots.iter().enumerate() {
            let (_, block) = parse_x509_pem(pem.as_bytes())
                .map_err(|e| AuthorityError::config(format!("error parsing root certificate {i}: {e}")))?;
            block
                .parse_x509()
                .map_err(|e| AuthorityError::config(format!("error parsing root certificate {i}: {e}")))?;
            store.by_fingerprint.entry(fingerprint(&block.contents)).or_insert(store.ordered.len());
            store.ordered.push(block.contents);
        }
        Ok(store)
    }

    /// Looks up a root by the hex SHA-256 of its DER encoding.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::NotFound`] if no root has that fingerprint.
    pub fn get(&self, sum: &str) -> Result<&[u8]> {
        self.by_fingerprint
            .get(&sum.to_ascii_lowercase())
            .and_then(|&i| self.ordered.get(i))
            .map(Vec::as_slice)
            .ok_or_else(|| AuthorityError::not_found(format!("certificate with fingerprint {sum} was not found")))
    }

    /// DER encodings of every root.
    #[must_use]
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.ordered
    }
}
