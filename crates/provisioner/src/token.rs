//! Bearer token decoding and verification.
//!
//! Provisioners receive one-time tokens as compact JWS strings. This module
//! decodes headers and payloads and verifies signatures against a
//! [`VerifyingKey`]. Audience and issuer checks are left to the calling
//! provisioner, which knows what it expects.
//!
//! # Example
//!
//! ```no_run
//! use privca_provisioner::token::{RegisteredClaims, decode_header, decode_unverified};
//!
//! # fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let header = decode_header(token)?;
//! let claims: RegisteredClaims = decode_unverified(token)?;
//! println!("{:?} issued by {}", header.alg, claims.iss);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Header, Validation, decode};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

use crate::{
    error::{ProvisionerError, Result},
    keys::VerifyingKey,
    validation::{reject_forbidden_algorithm, validate_algorithm},
};

/// Clock skew tolerated on `exp` and `nbf`, in seconds.
pub const DEFAULT_LEEWAY: u64 = 60;

/// Registered JWT claims shared by every provisioner token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClaims {
    /// Issuer.
    #[serde(default)]
    pub iss: String,
    /// Subject.
    #[serde(default)]
    pub sub: String,
    /// Audience; a single string is accepted as a one-element list.
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
    /// Expiration time (seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Not before (seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Issued at (seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Token identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl RegisteredClaims {
    /// Returns the `jti` claim, failing if it is absent or empty.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Unauthorized`] if the claim is missing.
    pub fn require_jti(&self) -> Result<&str> {
        self.jti
            .as_deref()
            .filter(|jti| !jti.is_empty())
            .ok_or_else(|| ProvisionerError::unauthorized("token is missing the jti claim"))
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Decodes the token header without verification.
///
/// # Errors
///
/// Returns [`ProvisionerError::Unauthorized`] if the header is malformed or
/// names a forbidden algorithm.
pub fn decode_header(token: &str) -> Result<Header> {
    if let Some(raw) = token.split('.').next()
        && let Ok(bytes) = URL_SAFE_NO_PAD.decode(raw)
        && let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes)
        && let Some(alg) = value.get("alg").and_then(|a| a.as_str())
    {
        reject_forbidden_algorithm(alg)?;
    }
    jsonwebtoken::decode_header(token)
        .map_err(|e| ProvisionerError::unauthorized_with_source("error parsing token", e))
}

/// Decodes the token payload without verification.
///
/// Used to route a token to its provisioner before the provisioner verifies
/// it. Never trust the result for authorization.
///
/// # Errors
///
/// Returns [`ProvisionerError::Unauthorized`] if the token does not have
/// three parts or the payload is not valid JSON for `T`.
pub fn decode_unverified<T: DeserializeOwned>(token: &str) -> Result<T> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(ProvisionerError::unauthorized(
            "error parsing token: token must have 3 parts separated by dots",
        ));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| ProvisionerError::unauthorized_with_source("error parsing token", e))?;
    serde_json::from_slice(&payload)
        .map_err(|e| ProvisionerError::unauthorized_with_source("error parsing token claims", e))
}

/// Verifies the token signature with `key` and returns its claims.
///
/// `exp` and `nbf` are enforced when present, with [`DEFAULT_LEEWAY`].
///
/// # Errors
///
/// Returns [`ProvisionerError::Unauthorized`] if the algorithm does not
/// match the key, the signature is invalid or the token is outside its
/// validity window.
pub fn verify<T: DeserializeOwned>(token: &str, key: &VerifyingKey) -> Result<T> {
    let header = decode_header(token)?;
    validate_algorithm(header.alg, key.family())?;

    let mut validation = Validation::new(header.alg);
    validation.leeway = DEFAULT_LEEWAY;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    Ok(decode::<T>(token, key.decoding_key(), &validation)?.claims)
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
