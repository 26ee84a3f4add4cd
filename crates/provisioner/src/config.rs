//! Load-time configuration handed to every provisioner's `init`.
//!
//! [`Config`] carries the global claims and expected token audiences.
//! [`ProvisionerRegistry`] is owned by the configuration loader and tracks
//! cross-provisioner constraints while provisioners are initialized.

use bon::Builder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    claims::GlobalClaims,
    error::{ProvisionerError, Result},
    provisioner::ProvisionerType,
};

/// Expected token audiences, per operation.
///
/// A token authorizes an operation when any of its `aud` values matches any
/// of the configured values for that operation. A trailing `/` is ignored on
/// both sides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audiences {
    /// Audiences accepted for signing (X.509 and SSH).
    #[serde(default)]
    pub sign: Vec<String>,
    /// Audiences accepted for revocation.
    #[serde(default)]
    pub revoke: Vec<String>,
    /// Audiences accepted for renewal.
    #[serde(default)]
    pub renew: Vec<String>,
}

impl Audiences {
    /// Builds the conventional audience set for a CA reachable at `base_url`.
    ///
    /// ```
    /// use privca_provisioner::config::Audiences;
    ///
    /// let audiences = Audiences::for_base_url("https://ca.example.com");
    /// assert_eq!(audiences.sign, vec!["https://ca.example.com/sign", "https://ca.example.com/1.0/sign"]);
    /// ```
    #[must_use]
    pub fn for_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let endpoints = |path: &str| vec![format!("{base}/{path}"), format!("{base}/1.0/{path}")];
        Self { sign: endpoints("sign"), revoke: endpoints("revoke"), renew: endpoints("renew") }
    }
}

/// Returns `true` if any presented audience matches any expected audience.
#[must_use]
pub fn matches_audience(presented: &[String], expected: &[String]) -> bool {
    presented.iter().any(|p| {
        let p = p.trim_end_matches('/');
        expected.iter().any(|e| e.trim_end_matches('/') == p)
    })
}

/// Configuration passed to provisioner initialization.
#[derive(Clone, Debug, Default, Builder)]
pub struct Config {
    /// Authority-wide policy every provisioner falls back to.
    #[builder(default)]
    pub claims: GlobalClaims,
    /// Expected token audiences.
    #[builder(default)]
    pub audiences: Audiences,
}

/// Cross-provisioner bookkeeping during configuration loading.
///
/// Kubernetes service-account tokens carry no information that
/// distinguishes one configured issuer from another, so an authority may
/// initialize at most one such provisioner. The registry enforces this
/// without process-wide state: each loader owns its own registry.
#[derive(Debug, Default)]
pub struct ProvisionerRegistry {
    k8s_sa_count: Mutex<usize>,
}

impl ProvisionerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the singleton constraint for `kind` and records one more
    /// instance.
    ///
    /// The check and the increment happen under one lock, so concurrent
    /// loaders sharing a registry cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Config`] if a `K8sSA` provisioner was
    /// already registered.
    pub fn register(&self, kind: ProvisionerType, init: impl FnOnce() -> Result<()>) -> Result<()> {
        if kind != ProvisionerType::K8sSa {
            return init();
        }
        let mut count = self.k8s_sa_count.lock();
        if *count >= 1 {
            return Err(ProvisionerError::config(
                "cannot have more than one kubernetes service account provisioner",
            ));
        }
        init()?;
        *count += 1;
        Ok(())
    }

    /// Number of initialized `K8sSA` provisioners.
    #[must_use]
    pub fn k8s_sa_count(&self) -> usize {
        *self.k8s_sa_count.lock()
    }

    /// Forgets every registration.
    pub fn reset(&self) {
        *self.k8s_sa_count.lock() = 0;
    }
}
