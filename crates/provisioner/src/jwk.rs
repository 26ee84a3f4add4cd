//! JWK provisioner: bearer tokens signed with a configured JSON Web Key.

use bon::Builder;
use jsonwebtoken::jwk::Jwk as JsonWebKey;
use serde::{Deserialize, Serialize};

use crate::{
    claims::{Claimer, Claims},
    config::{Audiences, Config, matches_audience},
    error::{ProvisionerError, Result},
    keys::VerifyingKey,
    pipeline::{SignContext, SignMethod, SignOptions},
    provisioner::{ProvisionerType, require_claimer, require_name},
    sign_options::{with_san_validators, x509_pipeline},
    ssh::{SshOptions, ssh_pipeline},
    token::{RegisteredClaims, decode_header, decode_unverified, verify},
};

/// `step` claim carried by provisioning tokens.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepClaims {
    /// SSH certificate options granted by the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshOptions>,
}

/// Payload of a provisioning token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningClaims {
    /// Registered claims.
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    /// Subject alternative names the token authorizes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sans: Vec<String>,
    /// Provisioning options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepClaims>,
}

impl ProvisioningClaims {
    /// The authorized SANs, defaulting to the subject.
    #[must_use]
    pub fn sans_or_subject(&self) -> Vec<String> {
        if self.sans.is_empty() { vec![self.registered.sub.clone()] } else { self.sans.clone() }
    }

    /// The SSH options, required for SSH signing.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Unauthorized`] if the token carries no
    /// SSH options.
    pub fn ssh_options(&self) -> Result<SshOptions> {
        self.step.as_ref().and_then(|s| s.ssh.clone()).ok_or_else(|| {
            ProvisionerError::unauthorized("authorization token must be an SSH provisioning token")
        })
    }
}

/// Provisioner trusting tokens signed with one JSON Web Key.
#[derive(Clone, Debug, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct Jwk {
    /// Provisioner name; tokens must use it as `iss`.
    #[builder(into)]
    pub name: String,
    /// Verification key. Its `kid` is part of the provisioner id.
    pub key: JsonWebKey,
    /// Encrypted private key handed to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub encrypted_key: Option<String>,
    /// Per-provisioner policy overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
    #[serde(skip)]
    #[builder(skip)]
    pub(crate) claimer: Option<Claimer>,
    #[serde(skip)]
    #[builder(skip)]
    audiences: Audiences,
    #[serde(skip)]
    #[builder(skip)]
    verifying_key: Option<VerifyingKey>,
}

impl Jwk {
    fn kid(&self) -> &str {
        self.key.common.key_id.as_deref().unwrap_or_default()
    }

    pub(crate) fn id(&self) -> String {
        format!("{}:{}", self.name, self.kid())
    }

    pub(crate) fn encrypted_key(&self) -> Option<(String, &str)> {
        self.encrypted_key.as_deref().map(|k| (self.kid().to_owned(), k))
    }

    pub(crate) fn token_id(&self, token: &str) -> Result<String> {
        let claims: RegisteredClaims = decode_unverified(token)?;
        claims.require_jti().map(str::to_owned)
    }

    pub(crate) fn init(&mut self, config: &Config) -> Result<()> {
        require_name(&self.name)?;
        self.verifying_key = Some(VerifyingKey::from_jwk(&self.key)?);
        self.claimer = Some(Claimer::new(self.claims.clone(), config.claims.clone())?);
        self.audiences = config.audiences.clone();
        Ok(())
    }

    fn authorize_token(&self, token: &str, audiences: &[String]) -> Result<ProvisioningClaims> {
        let key = self.verifying_key.as_ref().ok_or_else(|| {
            ProvisionerError::internal(format!("provisioner {} has not been initialized", self.id()))
        })?;

        let header = decode_header(token)?;
        if header.kid.as_deref() != Some(self.kid()) {
            return Err(ProvisionerError::unauthorized("invalid token: kid does not match provisioner key"));
        }

        let claims: ProvisioningClaims = verify(token, key)?;
        let registered = &claims.registered;
        if registered.iss != self.name {
            return Err(ProvisionerError::unauthorized(format!(
                "invalid token: issuer {} does not match provisioner {}",
                registered.iss, self.name
            )));
        }
        if !matches_audience(&registered.aud, audiences) {
            return Err(ProvisionerError::unauthorized("invalid token: invalid audience claim (aud)"));
        }
        if registered.sub.is_empty() {
            return Err(ProvisionerError::unauthorized("token subject cannot be empty"));
        }
        registered.require_jti()?;
        Ok(claims)
    }

    pub(crate) fn authorize_sign(&self, ctx: &SignContext, token: &str) -> Result<SignOptions> {
        let claimer = require_claimer(&self.claimer, &self.id())?;
        let claims = self.authorize_token(token, &self.audiences.sign)?;

        match ctx.method {
            SignMethod::Ssh => {
                if !claimer.is_ssh_ca_enabled() {
                    return Err(ProvisionerError::forbidden(format!(
                        "ssh ca is disabled for provisioner {}",
                        self.id()
                    )));
                }
                Ok(SignOptions::Ssh(ssh_pipeline(claimer, claims.ssh_options()?, None)))
            },
            SignMethod::X509 => {
                let pipeline = x509_pipeline(ProvisionerType::Jwk, &self.name, self.kid(), claimer);
                let sans = claims.sans_or_subject();
                Ok(SignOptions::X509(with_san_validators(pipeline, &claims.registered.sub, &sans)))
            },
        }
    }

    pub(crate) fn authorize_revoke(&self, token: &str) -> Result<()> {
        self.authorize_token(token, &self.audiences.revoke).map(|_| ())
    }
}
