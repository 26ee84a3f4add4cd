//! Token algorithm validation.
//!
//! A token's `alg` header is attacker-controlled. Verification must only
//! proceed with an algorithm that belongs to the family of the key it is
//! checked against, otherwise a public key could be reused as an HMAC
//! secret (algorithm confusion).

use jsonwebtoken::Algorithm;

use crate::{
    error::{ProvisionerError, Result},
    keys::KeyFamily,
};

/// Algorithm names that are never accepted, whatever the key.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none"];

/// Validates a raw `alg` header value before the header is decoded.
///
/// # Errors
///
/// Returns [`ProvisionerError::Unauthorized`] for forbidden algorithms.
pub fn reject_forbidden_algorithm(alg: &str) -> Result<()> {
    if FORBIDDEN_ALGORITHMS.iter().any(|f| f.eq_ignore_ascii_case(alg)) {
        return Err(ProvisionerError::unauthorized(format!(
            "token algorithm '{alg}' is not allowed"
        )));
    }
    Ok(())
}

/// Validates that `alg` can be verified with a key of `family`.
///
/// # Errors
///
/// Returns [`ProvisionerError::Unauthorized`] if the algorithm does not
/// belong to the key family.
///
/// # Examples
///
/// ```
/// use jsonwebtoken::Algorithm;
/// use privca_provisioner::{keys::KeyFamily, validation::validate_algorithm};
///
/// assert!(validate_algorithm(Algorithm::EdDSA, KeyFamily::Ed25519).is_ok());
/// assert!(validate_algorithm(Algorithm::HS256, KeyFamily::Rsa).is_err());
/// ```
pub fn validate_algorithm(alg: Algorithm, family: KeyFamily) -> Result<()> {
    if family.algorithms().contains(&alg) {
        Ok(())
    } else {
        Err(ProvisionerError::unauthorized(format!(
            "token algorithm {alg:?} does not match key type {family:?}"
        )))
    }
}
