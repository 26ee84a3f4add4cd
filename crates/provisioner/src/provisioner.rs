//! The closed set of provisioner variants.
//!
//! A [`Provisioner`] is deserialized from configuration, initialized once
//! with [`Provisioner::init`] and then shared read-only by every request.
//! All capabilities dispatch by `match` to the variant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    acme::Acme,
    claims::Claimer,
    config::{Config, ProvisionerRegistry},
    error::{ProvisionerError, Result},
    jwk::Jwk,
    k8s_sa::K8sSa,
    oidc::Oidc,
    pipeline::{SignContext, SignOptions},
    x5c::X5c,
    x509::CertificateInfo,
};

/// Provisioner type, with the numeric code recorded in the attribution
/// extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisionerType {
    /// JSON Web Key provisioner.
    #[serde(rename = "JWK")]
    Jwk,
    /// OpenID Connect provisioner.
    #[serde(rename = "OIDC")]
    Oidc,
    /// ACME provisioner.
    #[serde(rename = "ACME")]
    Acme,
    /// X.509 certificate chain provisioner.
    #[serde(rename = "X5C")]
    X5c,
    /// Kubernetes service account provisioner.
    #[serde(rename = "K8sSA")]
    K8sSa,
}

impl ProvisionerType {
    /// Numeric type code.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Jwk => 1,
            Self::Oidc => 2,
            Self::Acme => 6,
            Self::X5c => 7,
            Self::K8sSa => 8,
        }
    }

    /// Type for a numeric code.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Jwk),
            2 => Some(Self::Oidc),
            6 => Some(Self::Acme),
            7 => Some(Self::X5c),
            8 => Some(Self::K8sSa),
            _ => None,
        }
    }
}

impl fmt::Display for ProvisionerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jwk => "JWK",
            Self::Oidc => "OIDC",
            Self::Acme => "ACME",
            Self::X5c => "X5C",
            Self::K8sSa => "K8sSA",
        })
    }
}

/// A configured credential issuer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Provisioner {
    /// Bearer tokens signed with a configured JSON Web Key.
    #[serde(rename = "JWK")]
    Jwk(Jwk),
    /// OpenID Connect ID tokens.
    #[serde(rename = "OIDC")]
    Oidc(Oidc),
    /// Bearer tokens signed by the leaf of an `x5c` certificate chain.
    #[serde(rename = "X5C")]
    X5c(X5c),
    /// ACME orders; the order itself is validated elsewhere.
    #[serde(rename = "ACME")]
    Acme(Acme),
    /// Kubernetes service account tokens.
    #[serde(rename = "K8sSA")]
    K8sSa(K8sSa),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            Provisioner::Jwk($p) => $body,
            Provisioner::Oidc($p) => $body,
            Provisioner::X5c($p) => $body,
            Provisioner::Acme($p) => $body,
            Provisioner::K8sSa($p) => $body,
        }
    };
}

impl Provisioner {
    /// Stable unique identifier.
    #[must_use]
    pub fn id(&self) -> String {
        dispatch!(self, p => p.id())
    }

    /// Configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        dispatch!(self, p => p.name.as_str())
    }

    /// Variant type.
    #[must_use]
    pub fn provisioner_type(&self) -> ProvisionerType {
        match self {
            Self::Jwk(_) => ProvisionerType::Jwk,
            Self::Oidc(_) => ProvisionerType::Oidc,
            Self::X5c(_) => ProvisionerType::X5c,
            Self::Acme(_) => ProvisionerType::Acme,
            Self::K8sSa(_) => ProvisionerType::K8sSa,
        }
    }

    /// Key id and encrypted private key, for provisioners that distribute
    /// one to clients.
    #[must_use]
    pub fn encrypted_key(&self) -> Option<(String, &str)> {
        match self {
            Self::Jwk(p) => p.encrypted_key(),
            _ => None,
        }
    }

    /// Identifier used to track one-time use of `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::NotImplemented`] for provisioners whose
    /// tokens are not single use, or an authentication error if the token
    /// cannot be decoded.
    pub fn token_id(&self, token: &str) -> Result<String> {
        dispatch!(self, p => p.token_id(token))
    }

    /// Validates configuration and wires the claimer and audiences.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Config`] for invalid configuration.
    pub fn init(&mut self, config: &Config, registry: &ProvisionerRegistry) -> Result<()> {
        let kind = self.provisioner_type();
        registry.register(kind, || dispatch!(self, p => p.init(config)))
    }

    /// Authenticates `token` and returns the sign options for the request.
    ///
    /// # Errors
    ///
    /// Returns an authentication error for invalid credentials and a policy
    /// error when the requested method is unsupported.
    #[tracing::instrument(skip(self, token), fields(provisioner = %self.id()))]
    pub fn authorize_sign(&self, ctx: &SignContext, token: &str) -> Result<SignOptions> {
        let result = dispatch!(self, p => p.authorize_sign(ctx, token));
        if let Err(e) = &result {
            tracing::debug!(error = %e, method = %ctx.method, "sign authorization rejected");
        }
        result
    }

    /// Authenticates a revocation token.
    ///
    /// # Errors
    ///
    /// Returns an authentication error for invalid credentials, or
    /// [`ProvisionerError::NotImplemented`] for provisioners that cannot
    /// revoke with a token.
    #[tracing::instrument(skip(self, token), fields(provisioner = %self.id()))]
    pub fn authorize_revoke(&self, token: &str) -> Result<()> {
        dispatch!(self, p => p.authorize_revoke(token))
    }

    /// Checks whether certificates of this provisioner may be renewed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Forbidden`] when renewal is disabled.
    pub fn authorize_renewal(&self, _cert: &CertificateInfo) -> Result<()> {
        if self.claimer()?.is_disable_renewal() {
            return Err(ProvisionerError::forbidden(format!(
                "renew is disabled for provisioner {}",
                self.id()
            )));
        }
        Ok(())
    }

    /// Effective policy of an initialized provisioner.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Internal`] before `init`.
    pub fn claimer(&self) -> Result<&Claimer> {
        let claimer = dispatch!(self, p => p.claimer.as_ref());
        claimer.ok_or_else(|| {
            ProvisionerError::internal(format!("provisioner {} has not been initialized", self.id()))
        })
    }
}

pub(crate) fn require_claimer<'a>(claimer: &'a Option<Claimer>, id: &str) -> Result<&'a Claimer> {
    claimer
        .as_ref()
        .ok_or_else(|| ProvisionerError::internal(format!("provisioner {id} has not been initialized")))
}

pub(crate) fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProvisionerError::config("provisioner name cannot be empty"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_type_codes() {
        for kind in [
            ProvisionerType::Jwk,
            ProvisionerType::Oidc,
            ProvisionerType::Acme,
            ProvisionerType::X5c,
            ProvisionerType::K8sSa,
        ] {
            assert_eq!(ProvisionerType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ProvisionerType::K8sSa.code(), 8);
        assert_eq!(ProvisionerType::from_code(3), None);
        assert_eq!(ProvisionerType::K8sSa.to_string(), "K8sSA");
    }

    #[test]
    fn test_deserialize_tagged() {
        let p: Provisioner = serde_json::from_value(json!({"type": "ACME", "name": "acme"})).unwrap();
        assert_eq!(p.provisioner_type(), ProvisionerType::Acme);
        assert_eq!(p.id(), "acme/acme");

        let p: Provisioner = serde_json::from_value(json!({"type": "K8sSA", "publicKeys": ""})).unwrap();
        assert_eq!(p.id(), "k8ssa/k8sSA-default");

        assert!(serde_json::from_value::<Provisioner>(json!({"type": "SSHPOP", "name": "x"})).is_err());
    }

    #[test]
    fn test_uninitialized_claimer() {
        let p: Provisioner = serde_json::from_value(json!({"type": "ACME", "name": "acme"})).unwrap();
        let err = p.claimer().unwrap_err();
        assert_eq!(err.to_string(), "provisioner acme/acme has not been initialized");
    }

    #[test]
    fn test_init_empty_name() {
        let mut p: Provisioner = serde_json::from_value(json!({"type": "ACME", "name": ""})).unwrap();
        let err = p.init(&Config::default(), &ProvisionerRegistry::new()).unwrap_err();
        assert_eq!(err.to_string(), "provisioner name cannot be empty");
    }

    #[test]
    fn test_authorize_renewal() {
        let registry = ProvisionerRegistry::new();
        let mut enabled: Provisioner = serde_json::from_value(json!({"type": "ACME", "name": "a"})).unwrap();
        enabled.init(&Config::default(), &registry).unwrap();

        let mut disabled: Provisioner = serde_json::from_value(json!({
            "type": "ACME",
            "name": "b",
            "claims": {"disableRenewal": true},
        }))
        .unwrap();
        disabled.init(&Config::default(), &registry).unwrap();

        let cert = crate::testutil::certificate_info("1");
        assert!(enabled.authorize_renewal(&cert).is_ok());
        let err = disabled.authorize_renewal(&cert).unwrap_err();
        assert_eq!(err.to_string(), "renew is disabled for provisioner acme/b");
        assert_eq!(err.status_code(), 403);
    }
}
