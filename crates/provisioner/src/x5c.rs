//! X5C provisioner: bearer tokens signed by the leaf of an `x5c` chain.
//!
//! The chain in the token header must verify up to one of the configured
//! roots. The leaf's `notAfter` bounds the validity of anything issued with
//! the token.

use base64::{Engine, engine::general_purpose::STANDARD};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::{
    pem::Pem,
    prelude::{FromDer, X509Certificate},
};

use crate::{
    claims::{Claimer, Claims},
    config::{Audiences, Config, matches_audience},
    error::{ProvisionerError, Result},
    jwk::ProvisioningClaims,
    keys::VerifyingKey,
    pipeline::{SignContext, SignMethod, SignOptions},
    provisioner::{ProvisionerType, require_claimer, require_name},
    sign_options::{ProfileLimitDuration, with_san_validators, x509_pipeline},
    ssh::ssh_pipeline,
    token::{RegisteredClaims, decode_header, decode_unverified, verify},
    x509::timestamp,
};

/// Provisioner trusting tokens backed by a certificate chain.
#[derive(Clone, Debug, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct X5c {
    /// Provisioner name; tokens must use it as `iss`.
    #[builder(into)]
    pub name: String,
    /// PEM bundle of trusted root certificates.
    #[builder(into)]
    pub roots: String,
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
    root_ders: Vec<Vec<u8>>,
}

/// Verified token payload and the leaf's expiry.
struct Authorized {
    claims: ProvisioningClaims,
    leaf_not_after: DateTime<Utc>,
}

fn chain_error(reason: impl std::fmt::Display) -> ProvisionerError {
    ProvisionerError::unauthorized(format!("error verifying x5c certificate chain: {reason}"))
}

impl X5c {
    pub(crate) fn id(&self) -> String {
        format!("x5c/{}", self.name)
    }

    pub(crate) fn token_id(&self, token: &str) -> Result<String> {
        let claims: RegisteredClaims = decode_unverified(token)?;
        claims.require_jti().map(str::to_owned)
    }

    pub(crate) fn init(&mut self, config: &Config) -> Result<()> {
        require_name(&self.name)?;

        let mut roots = Vec::new();
        for block in Pem::iter_from_buffer(self.roots.as_bytes()) {
            let block = block.map_err(|e| ProvisionerError::config(format!("error parsing roots: {e}")))?;
            if block.label != "CERTIFICATE" {
                continue;
            }
            X509Certificate::from_der(&block.contents)
                .map_err(|e| ProvisionerError::config(format!("error parsing root certificate: {e}")))?;
            roots.push(block.contents);
        }
        if roots.is_empty() {
            return Err(ProvisionerError::config(format!(
                "no x509 certificates found in roots attribute for provisioner {}",
                self.name
            )));
        }

        self.root_ders = roots;
        self.claimer = Some(Claimer::new(self.claims.clone(), config.claims.clone())?);
        self.audiences = config.audiences.clone();
        Ok(())
    }

    /// Verifies the `x5c` chain up to a configured root and returns the
    /// leaf's verification key and expiry.
    fn verify_chain(&self, x5c: &[String]) -> Result<(VerifyingKey, DateTime<Utc>)> {
        if x5c.is_empty() {
            return Err(ProvisionerError::unauthorized("x5c header cannot be empty"));
        }
        let ders = x5c
            .iter()
            .map(|c| STANDARD.decode(c).map_err(chain_error))
            .collect::<Result<Vec<_>>>()?;
        let chain = ders
            .iter()
            .map(|der| X509Certificate::from_der(der).map(|(_, c)| c).map_err(chain_error))
            .collect::<Result<Vec<_>>>()?;
        let roots = self
            .root_ders
            .iter()
            .map(|der| X509Certificate::from_der(der).map(|(_, c)| c).map_err(chain_error))
            .collect::<Result<Vec<_>>>()?;

        for cert in &chain {
            if !cert.validity().is_valid() {
                return Err(chain_error("certificate has expired or is not yet valid"));
            }
        }
        for pair in chain.windows(2) {
            pair[0]
                .verify_signature(Some(pair[1].public_key()))
                .map_err(|e| chain_error(format!("invalid intermediate signature: {e}")))?;
        }

        let Some(last) = chain.last() else {
            return Err(chain_error("empty chain"));
        };
        let anchored = roots.iter().any(|root| {
            root.validity().is_valid()
                && last.issuer().as_raw() == root.subject().as_raw()
                && last.verify_signature(Some(root.public_key())).is_ok()
        });
        if !anchored {
            return Err(chain_error("certificate signed by unknown authority"));
        }

        let leaf = &chain[0];
        let key = VerifyingKey::from_spki(leaf.public_key()).map_err(chain_error)?;
        Ok((key, timestamp(leaf.validity().not_after.timestamp())?))
    }

    fn authorize_token(&self, token: &str, audiences: &[String]) -> Result<Authorized> {
        let header = decode_header(token)?;
        let x5c = header.x5c.ok_or_else(|| ProvisionerError::unauthorized("x5c header is missing"))?;
        let (key, leaf_not_after) = self.verify_chain(&x5c)?;

        let claims: ProvisioningClaims = verify(token, &key)?;
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
        Ok(Authorized { claims, leaf_not_after })
    }

    pub(crate) fn authorize_sign(&self, ctx: &SignContext, token: &str) -> Result<SignOptions> {
        let claimer = require_claimer(&self.claimer, &self.id())?;
        let Authorized { claims, leaf_not_after } = self.authorize_token(token, &self.audiences.sign)?;

        match ctx.method {
            SignMethod::Ssh => {
                if !claimer.is_ssh_ca_enabled() {
                    return Err(ProvisionerError::forbidden(format!(
                        "ssh ca is disabled for provisioner {}",
                        self.id()
                    )));
                }
                Ok(SignOptions::Ssh(ssh_pipeline(claimer, claims.ssh_options()?, Some(leaf_not_after))))
            },
            SignMethod::X509 => {
                let pipeline = x509_pipeline(ProvisionerType::X5c, &self.name, "", claimer)
                    .with_modifier(ProfileLimitDuration {
                        default: claimer.default_tls_cert_duration(),
                        limit: leaf_not_after,
                    });
                let sans = claims.sans_or_subject();
                Ok(SignOptions::X509(with_san_validators(pipeline, &claims.registered.sub, &sans)))
            },
        }
    }

    pub(crate) fn authorize_revoke(&self, token: &str) -> Result<()> {
        self.authorize_token(token, &self.audiences.revoke).map(|_| ())
    }
}
