//! Authority configuration.
//!
//! Loaded from JSON at startup. Every provisioner listed here is
//! initialized by [`Authority::new`](crate::Authority::new); any error is
//! fatal.
//!
//! ```
//! use privca_authority::AuthorityConfig;
//!
//! let config = AuthorityConfig::from_json(r#"{
//!     "baseUrl": "https://ca.example.com",
//!     "claims": {"maxTLSCertDuration": "48h"},
//!     "provisioners": [{"type": "ACME", "name": "acme"}]
//! }"#)?;
//! assert_eq!(config.provisioners.len(), 1);
//! # Ok::<(), privca_authority::AuthorityError>(())
//! ```

use std::time::Duration;

use bon::Builder;
use privca_provisioner::{Audiences, Claimer, Claims, Config, GlobalClaims, Provisioner};
use serde::{Deserialize, Serialize};

use crate::error::{AuthorityError, Result};

/// Default number of one-time token ids remembered.
pub const DEFAULT_TOKEN_CACHE_CAPACITY: u64 = 100_000;

/// Default upper bound on how long a token id is remembered.
pub const DEFAULT_TOKEN_CACHE_MAX_TTL: Duration = Duration::from_secs(24 * 3600);

/// Settings of the used-token cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TokenCacheConfig {
    /// Maximum number of remembered token ids. New tokens are refused
    /// while the cache is full.
    #[serde(default = "default_capacity")]
    #[builder(default = DEFAULT_TOKEN_CACHE_CAPACITY)]
    pub max_capacity: u64,
    /// Longest time a token id is remembered, whatever its `exp`.
    #[serde(default = "default_max_ttl", with = "humantime_serde")]
    #[builder(default = DEFAULT_TOKEN_CACHE_MAX_TTL)]
    pub max_ttl: Duration,
}

fn default_capacity() -> u64 {
    DEFAULT_TOKEN_CACHE_CAPACITY
}

fn default_max_ttl() -> Duration {
    DEFAULT_TOKEN_CACHE_MAX_TTL
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self { max_capacity: DEFAULT_TOKEN_CACHE_CAPACITY, max_ttl: DEFAULT_TOKEN_CACHE_MAX_TTL }
    }
}

/// Top-level authority configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorityConfig {
    /// URL the CA is reachable at; token audiences derive from it.
    #[builder(into)]
    pub base_url: String,
    /// Overrides of the built-in global claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
    /// Configured provisioners, uninitialized.
    pub provisioners: Vec<Provisioner>,
    /// PEM-encoded root certificates served by fingerprint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub roots: Vec<String>,
    /// Used-token cache settings.
    #[serde(default)]
    #[builder(default)]
    pub token_cache: TokenCacheConfig,
}

impl AuthorityConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Config`] if the document is not valid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AuthorityError::config(format!("error parsing authority configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks structural requirements.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Config`] naming the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(AuthorityError::config("authority baseUrl cannot be empty"));
        }
        if self.provisioners.is_empty() {
            return Err(AuthorityError::config("authority must have at least one provisioner"));
        }
        if self.token_cache.max_capacity == 0 {
            return Err(AuthorityError::config("tokenCache maxCapacity must be greater than 0"));
        }
        Ok(())
    }

    /// Built-in defaults with the configured overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Provisioner`] wrapping the claims error if
    /// the resulting TLS bounds are inconsistent.
    pub fn global_claims(&self) -> Result<GlobalClaims> {
        let global = match &self.claims {
            Some(overrides) => GlobalClaims::default().with_overrides(overrides),
            None => GlobalClaims::default(),
        };
        Claimer::new(None, global.clone())?;
        Ok(global)
    }

    /// Configuration handed to every provisioner's `init`.
    ///
    /// # Errors
    ///
    /// See [`AuthorityConfig::global_claims`].
    pub fn provisioner_config(&self) -> Result<Config> {
        Ok(Config::builder()
            .claims(self.global_claims()?)
            .audiences(Audiences::for_base_url(&self.base_url))
            .build())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_defaults() {
        let config = AuthorityConfig::from_json(
            r#"{"baseUrl": "https://ca.example.com", "provisioners": [{"type": "ACME", "name": "acme"}]}"#,
        )
        .unwrap();
        assert_eq!(config.token_cache, TokenCacheConfig::default());
        assert_eq!(config.global_claims().unwrap(), GlobalClaims::default());

        let pc = config.provisioner_config().unwrap();
        assert_eq!(pc.audiences.revoke[0], "https://ca.example.com/revoke");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = AuthorityConfig::from_json(
            r#"{"baseUrl": "https://ca", "provisioners": [], "db": {}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("error parsing authority configuration"), "{err}");
    }

    #[test]
    fn test_empty_provisioners_rejected() {
        let err =
            AuthorityConfig::from_json(r#"{"baseUrl": "https://ca", "provisioners": []}"#).unwrap_err();
        assert_eq!(err.to_string(), "authority must have at least one provisioner");
    }

    #[test]
    fn test_token_cache_human_durations() {
        let config = AuthorityConfig::from_json(
            r#"{
                "baseUrl": "https://ca",
                "provisioners": [{"type": "ACME", "name": "acme"}],
                "tokenCache": {"maxCapacity": 10, "maxTtl": "2h"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.token_cache.max_ttl, Duration::from_secs(7200));
        assert_eq!(config.token_cache.max_capacity, 10);
    }

    #[test]
    fn test_inconsistent_global_claims() {
        let config = AuthorityConfig::builder()
            .base_url("https://ca")
            .claims(Claims { min_tls_dur: Some(Duration::from_secs(48 * 3600)), ..Claims::default() })
            .provisioners(Vec::new())
            .build();
        let err = config.global_claims().unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().starts_with("claims: MaxCertDuration cannot be less than MinCertDuration"));
    }
}
