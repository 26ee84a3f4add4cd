//! Kubernetes service account provisioner.
//!
//! Service account tokens carry nothing that tells one cluster's issuer
//! from another's, so an authority accepts at most one of these
//! provisioners (see [`ProvisionerRegistry`](crate::config::ProvisionerRegistry)).

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::{
    claims::{Claimer, Claims},
    config::Config,
    error::{ProvisionerError, Result},
    keys::VerifyingKey,
    pipeline::{SignContext, SignMethod, SignOptions},
    provisioner::{ProvisionerType, require_claimer, require_name},
    sign_options::x509_pipeline,
    token::{RegisteredClaims, verify},
};

/// Default provisioner name.
pub const K8S_SA_DEFAULT_NAME: &str = "k8sSA-default";

/// Issuer of Kubernetes service account tokens.
pub const K8S_SA_ISSUER: &str = "kubernetes/serviceaccount";

fn default_name() -> String {
    K8S_SA_DEFAULT_NAME.to_owned()
}

/// Payload of a service account token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountClaims {
    /// Registered claims.
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    /// Namespace of the service account.
    #[serde(
        default,
        rename = "kubernetes.io/serviceaccount/namespace",
        skip_serializing_if = "String::is_empty"
    )]
    pub namespace: String,
    /// Name of the secret holding the token.
    #[serde(
        default,
        rename = "kubernetes.io/serviceaccount/secret.name",
        skip_serializing_if = "String::is_empty"
    )]
    pub secret_name: String,
    /// Service account name.
    #[serde(
        default,
        rename = "kubernetes.io/serviceaccount/service-account.name",
        skip_serializing_if = "String::is_empty"
    )]
    pub service_account_name: String,
    /// Service account UID.
    #[serde(
        default,
        rename = "kubernetes.io/serviceaccount/service-account.uid",
        skip_serializing_if = "String::is_empty"
    )]
    pub service_account_uid: String,
}

/// Provisioner trusting Kubernetes service account tokens.
#[derive(Clone, Debug, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct K8sSa {
    /// Provisioner name.
    #[serde(default = "default_name")]
    #[builder(into, default = default_name())]
    pub name: String,
    /// PEM bundle of the keys the cluster signs tokens with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub public_keys: Option<String>,
    /// Per-provisioner policy overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
    #[serde(skip)]
    #[builder(skip)]
    pub(crate) claimer: Option<Claimer>,
    #[serde(skip)]
    #[builder(skip)]
    keys: Vec<VerifyingKey>,
}

impl K8sSa {
    pub(crate) fn id(&self) -> String {
        format!("k8ssa/{}", self.name)
    }

    pub(crate) fn token_id(&self, _token: &str) -> Result<String> {
        Err(ProvisionerError::not_implemented("service account tokens are not single use"))
    }

    pub(crate) fn init(&mut self, config: &Config) -> Result<()> {
        require_name(&self.name)?;
        let Some(pem) = &self.public_keys else {
            return Err(ProvisionerError::config(
                "K8s Service Account provisioner cannot be initialized without pub keys",
            ));
        };
        let keys = VerifyingKey::from_pem_bundle(pem.as_bytes()).map_err(|e| {
            ProvisionerError::config(format!("error parsing public key in provisioner {}: {e}", self.id()))
        })?;

        self.claimer = Some(Claimer::new(self.claims.clone(), config.claims.clone())?);
        self.keys = keys;
        Ok(())
    }

    /// Verifies `token` with the first configured key that accepts it.
    fn authorize_token(&self, token: &str) -> Result<ServiceAccountClaims> {
        if self.keys.is_empty() {
            return Err(ProvisionerError::not_implemented("TokenReview API integration not implemented"));
        }
        let claims = self
            .keys
            .iter()
            .find_map(|key| verify::<ServiceAccountClaims>(token, key).ok())
            .ok_or_else(|| ProvisionerError::unauthorized("error validating token and extracting claims"))?;

        if claims.registered.iss != K8S_SA_ISSUER {
            return Err(ProvisionerError::unauthorized(format!(
                "invalid token claims: issuer {} is not {K8S_SA_ISSUER}",
                claims.registered.iss
            )));
        }
        if claims.registered.sub.is_empty() {
            return Err(ProvisionerError::unauthorized("token subject cannot be empty"));
        }
        Ok(claims)
    }

    pub(crate) fn authorize_sign(&self, ctx: &SignContext, token: &str) -> Result<SignOptions> {
        let claimer = require_claimer(&self.claimer, &self.id())?;
        let claims = self.authorize_token(token)?;
        if ctx.method == SignMethod::Ssh {
            return Err(ProvisionerError::forbidden(
                "ssh certificates not enabled for k8s ServiceAccount provisioners",
            ));
        }
        tracing::debug!(
            namespace = %claims.namespace,
            service_account = %claims.service_account_name,
            "service account token accepted"
        );
        Ok(SignOptions::X509(x509_pipeline(ProvisionerType::K8sSa, &self.name, "", claimer)))
    }

    pub(crate) fn authorize_revoke(&self, token: &str) -> Result<()> {
        self.authorize_token(token).map(|_| ())
    }
}
