//! OIDC provisioner: ID tokens from an OpenID Connect identity provider.
//!
//! Discovery happens outside this crate; the loader hands over the
//! provider's key set as `jwks`.

use bon::Builder;
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};

use crate::{
    claims::{Claimer, Claims},
    config::Config,
    error::{ProvisionerError, Result},
    keys::VerifyingKey,
    pipeline::{SignContext, SignMethod, SignOptions},
    provisioner::{ProvisionerType, require_claimer, require_name},
    sign_options::{with_san_validators, x509_pipeline},
    ssh::{SshOptions, ssh_pipeline},
    token::{RegisteredClaims, decode_header, decode_unverified, verify},
};

/// Payload of an OIDC ID token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Registered claims.
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    /// Authenticated email address.
    #[serde(default)]
    pub email: String,
    /// Whether the provider verified the email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

/// Provisioner trusting ID tokens from one OIDC client registration.
#[derive(Clone, Debug, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct Oidc {
    /// Provisioner name.
    #[builder(into)]
    pub name: String,
    /// OAuth client id; tokens must list it in `aud`.
    #[serde(rename = "clientID")]
    #[builder(into)]
    pub client_id: String,
    /// OAuth client secret, passed through to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub client_secret: Option<String>,
    /// Discovery document URL the key set was fetched from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub configuration_endpoint: Option<String>,
    /// Expected `iss` of ID tokens.
    #[builder(into)]
    pub issuer: String,
    /// The provider's signing keys.
    pub jwks: JwkSet,
    /// Emails allowed to request arbitrary SANs and to revoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub admins: Vec<String>,
    /// Email domains allowed to authenticate; empty allows any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub domains: Vec<String>,
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

impl Oidc {
    pub(crate) fn id(&self) -> String {
        self.client_id.clone()
    }

    pub(crate) fn token_id(&self, token: &str) -> Result<String> {
        let claims: RegisteredClaims = decode_unverified(token)?;
        Ok(claims.jti.filter(|jti| !jti.is_empty()).unwrap_or_else(|| token.to_owned()))
    }

    pub(crate) fn init(&mut self, config: &Config) -> Result<()> {
        require_name(&self.name)?;
        if self.client_id.is_empty() {
            return Err(ProvisionerError::config("provisioner clientID cannot be empty"));
        }
        if self.issuer.is_empty() {
            return Err(ProvisionerError::config("provisioner issuer cannot be empty"));
        }
        if self.jwks.keys.is_empty() {
            return Err(ProvisionerError::config("provisioner jwks cannot be empty"));
        }
        self.keys = self.jwks.keys.iter().map(VerifyingKey::from_jwk).collect::<Result<_>>()?;
        self.claimer = Some(Claimer::new(self.claims.clone(), config.claims.clone())?);
        Ok(())
    }

    fn is_admin(&self, email: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(email))
    }

    fn authorize_token(&self, token: &str) -> Result<IdTokenClaims> {
        let header = decode_header(token)?;
        let candidates: Vec<&VerifyingKey> = match header.kid.as_deref() {
            Some(kid) => self.keys.iter().filter(|k| k.kid() == Some(kid)).collect(),
            None => self.keys.iter().collect(),
        };
        if candidates.is_empty() {
            return Err(ProvisionerError::unauthorized("failed to validate token: no matching key"));
        }

        let mut last_err = None;
        let mut verified = None;
        for key in candidates {
            match verify::<IdTokenClaims>(token, key) {
                Ok(claims) => {
                    verified = Some(claims);
                    break;
                },
                Err(e) => last_err = Some(e),
            }
        }
        let claims = match (verified, last_err) {
            (Some(claims), _) => claims,
            (None, Some(e)) => return Err(e),
            (None, None) => return Err(ProvisionerError::unauthorized("failed to validate token")),
        };

        if claims.registered.iss != self.issuer {
            return Err(ProvisionerError::unauthorized(format!(
                "invalid token: issuer {} does not match provisioner issuer",
                claims.registered.iss
            )));
        }
        if !claims.registered.aud.iter().any(|a| *a == self.client_id) {
            return Err(ProvisionerError::unauthorized("invalid token: invalid audience claim (aud)"));
        }
        if claims.email.is_empty() {
            return Err(ProvisionerError::unauthorized("token email claim cannot be empty"));
        }
        if claims.email_verified == Some(false) {
            return Err(ProvisionerError::unauthorized("token email must be verified"));
        }
        if !self.is_admin(&claims.email) && !self.domains.is_empty() {
            let domain = claims.email.rsplit_once('@').map(|(_, d)| d).unwrap_or_default();
            if !self.domains.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
                return Err(ProvisionerError::forbidden("email is not allowed"));
            }
        }
        Ok(claims)
    }

    pub(crate) fn authorize_sign(&self, ctx: &SignContext, token: &str) -> Result<SignOptions> {
        let claimer = require_claimer(&self.claimer, &self.id())?;
        let claims = self.authorize_token(token)?;
        let admin = self.is_admin(&claims.email);

        match ctx.method {
            SignMethod::Ssh => {
                if !claimer.is_ssh_ca_enabled() {
                    return Err(ProvisionerError::forbidden(format!(
                        "ssh ca is disabled for provisioner {}",
                        self.id()
                    )));
                }
                let options = if admin {
                    SshOptions::default()
                } else {
                    let local = claims.email.split('@').next().unwrap_or_default().to_owned();
                    SshOptions {
                        cert_type: "user".into(),
                        key_id: claims.email.clone(),
                        principals: vec![local],
                        ..SshOptions::default()
                    }
                };
                Ok(SignOptions::Ssh(ssh_pipeline(claimer, options, None)))
            },
            SignMethod::X509 => {
                let pipeline = x509_pipeline(ProvisionerType::Oidc, &self.name, &self.client_id, claimer);
                if admin {
                    Ok(SignOptions::X509(pipeline))
                } else {
                    let email = claims.email.clone();
                    Ok(SignOptions::X509(with_san_validators(pipeline, &email, &[email.clone()])))
                }
            },
        }
    }

    pub(crate) fn authorize_revoke(&self, token: &str) -> Result<()> {
        let claims = self.authorize_token(token)?;
        if !self.is_admin(&claims.email) {
            return Err(ProvisionerError::forbidden("only admins can revoke certificates with OIDC tokens"));
        }
        Ok(())
    }
}
