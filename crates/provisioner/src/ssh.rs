//! SSH certificate templates and sign options.
//!
//! The SSH pipeline resolves the certificate's validity window against the
//! provisioner's user or host bounds. [`SshValidityModifier`] fills in and
//! clamps the window, [`SshCertificateValidityValidator`] checks the result,
//! and [`SshCertificateDefaultValidator`] checks the structural hygiene of a
//! fully signed certificate.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    claims::Claimer,
    duration::HumanDuration,
    error::{ProvisionerError, Result},
    pipeline::{Modifier, Pipeline, Validator},
    sign_options::rfc3339,
};

/// Certificate type of user certificates.
pub const USER_CERT: u32 = 1;
/// Certificate type of host certificates.
pub const HOST_CERT: u32 = 2;

/// Extensions granted to user certificates that request none.
pub const DEFAULT_USER_EXTENSIONS: &[&str] = &[
    "permit-X11-forwarding",
    "permit-agent-forwarding",
    "permit-port-forwarding",
    "permit-pty",
    "permit-user-rc",
];

/// An SSH public key in wire form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshPublicKey {
    /// Key algorithm name, e.g. `ssh-ed25519`.
    pub algorithm: String,
    /// Wire-format key blob.
    pub blob: Vec<u8>,
}

/// An SSH signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshSignature {
    /// Signature format, e.g. `ssh-ed25519`.
    pub format: String,
    /// Signature blob.
    pub blob: Vec<u8>,
}

/// An SSH certificate, signed or not.
///
/// Zero values mean "unset": `cert_type == 0`, `valid_after == 0` and
/// `valid_before == 0` are filled in by modifiers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SshCertificate {
    /// Random nonce.
    pub nonce: Vec<u8>,
    /// Certified public key.
    pub key: Option<SshPublicKey>,
    /// Serial number.
    pub serial: u64,
    /// [`USER_CERT`] or [`HOST_CERT`].
    pub cert_type: u32,
    /// Key identifier.
    pub key_id: String,
    /// Principals the certificate is valid for.
    pub valid_principals: Vec<String>,
    /// Start of validity, seconds since the Unix epoch.
    pub valid_after: u64,
    /// End of validity, seconds since the Unix epoch.
    pub valid_before: u64,
    /// Critical options.
    pub critical_options: BTreeMap<String, String>,
    /// Extensions.
    pub extensions: BTreeMap<String, String>,
    /// Key of the signing CA.
    pub signature_key: Option<SshPublicKey>,
    /// CA signature.
    pub signature: Option<SshSignature>,
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

fn unix_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map_or_else(|| secs.to_string(), rfc3339)
}

fn check_cert_type(cert_type: u32) -> Result<()> {
    match cert_type {
        0 => Err(ProvisionerError::forbidden("ssh certificate type has not been set")),
        USER_CERT | HOST_CERT => Ok(()),
        other => Err(ProvisionerError::forbidden(format!("unknown ssh certificate type {other}"))),
    }
}

/// Resolves the validity window of an SSH certificate.
///
/// `limit` is the expiry of the credential that authorized the request;
/// when absent, the limit is now plus the maximum duration for the
/// certificate type.
#[derive(Clone, Debug)]
pub struct SshValidityModifier {
    claimer: Claimer,
    limit: Option<DateTime<Utc>>,
}

impl SshValidityModifier {
    /// Creates a modifier bounded by the claimer's maximum durations.
    #[must_use]
    pub fn new(claimer: Claimer) -> Self {
        Self { claimer, limit: None }
    }

    /// Creates a modifier bounded by a credential expiry.
    #[must_use]
    pub fn with_limit(claimer: Claimer, limit: DateTime<Utc>) -> Self {
        Self { claimer, limit: Some(limit) }
    }
}

impl Modifier<SshCertificate> for SshValidityModifier {
    fn modify(&self, cert: &mut SshCertificate) -> Result<()> {
        check_cert_type(cert.cert_type)?;
        let (default, max) = if cert.cert_type == USER_CERT {
            (self.claimer.default_user_ssh_cert_duration(), self.claimer.max_user_ssh_cert_duration())
        } else {
            (self.claimer.default_host_ssh_cert_duration(), self.claimer.max_host_ssh_cert_duration())
        };

        let now = unix_now();
        let limit = match self.limit {
            Some(limit) => u64::try_from(limit.timestamp()).unwrap_or(0),
            None => now.saturating_add(max.as_secs()),
        };

        if cert.valid_after == 0 {
            cert.valid_after = now;
        }
        if cert.valid_after > limit {
            return Err(ProvisionerError::forbidden(format!(
                "provisioning credential expiration ({}) is before requested certificate validAfter ({})",
                unix_time(limit),
                unix_time(cert.valid_after)
            )));
        }
        if cert.valid_before == 0 {
            cert.valid_before = cert.valid_after.saturating_add(default.as_secs()).min(limit);
        } else if cert.valid_before > limit {
            return Err(ProvisionerError::forbidden(format!(
                "provisioning credential expiration ({}) is before requested certificate validBefore ({})",
                unix_time(limit),
                unix_time(cert.valid_before)
            )));
        }
        Ok(())
    }
}

/// Checks the validity window against the claimer's bounds for the
/// certificate type. Both bounds are inclusive.
#[derive(Clone, Debug)]
pub struct SshCertificateValidityValidator(pub Claimer);

impl Validator<SshCertificate> for SshCertificateValidityValidator {
    fn valid(&self, cert: &SshCertificate) -> Result<()> {
        if cert.valid_after == 0 {
            return Err(ProvisionerError::forbidden("ssh certificate validAfter cannot be 0"));
        }
        if cert.valid_before < unix_now() {
            return Err(ProvisionerError::forbidden("ssh certificate validBefore cannot be in the past"));
        }
        if cert.valid_before <= cert.valid_after {
            return Err(ProvisionerError::forbidden("ssh certificate validBefore cannot be before validAfter"));
        }
        check_cert_type(cert.cert_type)?;

        let (min, max) = if cert.cert_type == USER_CERT {
            (self.0.min_user_ssh_cert_duration(), self.0.max_user_ssh_cert_duration())
        } else {
            (self.0.min_host_ssh_cert_duration(), self.0.max_host_ssh_cert_duration())
        };

        let d = Duration::from_secs(cert.valid_before - cert.valid_after);
        if d < min {
            return Err(ProvisionerError::forbidden(format!(
                "requested duration of {} is less than minimum accepted duration for selected provisioner of {}",
                HumanDuration(d),
                HumanDuration(min)
            )));
        }
        if d > max {
            return Err(ProvisionerError::forbidden(format!(
                "requested duration of {} is greater than maximum accepted duration for selected provisioner of {}",
                HumanDuration(d),
                HumanDuration(max)
            )));
        }
        Ok(())
    }
}

/// Structural checks on a signed SSH certificate, first violation wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct SshCertificateDefaultValidator;

impl Validator<SshCertificate> for SshCertificateDefaultValidator {
    fn valid(&self, cert: &SshCertificate) -> Result<()> {
        let now = unix_now();
        let message = if cert.nonce.is_empty() {
            "ssh certificate nonce cannot be empty".to_owned()
        } else if cert.key.is_none() {
            "ssh certificate key cannot be nil".to_owned()
        } else if cert.serial == 0 {
            "ssh certificate serial cannot be 0".to_owned()
        } else if cert.cert_type != USER_CERT && cert.cert_type != HOST_CERT {
            format!("ssh certificate has an unknown type: {}", cert.cert_type)
        } else if cert.key_id.is_empty() {
            "ssh certificate key id cannot be empty".to_owned()
        } else if cert.valid_principals.is_empty() {
            "ssh certificate valid principals cannot be empty".to_owned()
        } else if cert.valid_after == 0 {
            "ssh certificate validAfter cannot be 0".to_owned()
        } else if cert.valid_before < now {
            "ssh certificate validBefore cannot be in the past".to_owned()
        } else if cert.valid_before <= cert.valid_after {
            "ssh certificate validBefore cannot be before validAfter".to_owned()
        } else if cert.cert_type == USER_CERT && cert.extensions.is_empty() {
            "ssh certificate extensions cannot be empty".to_owned()
        } else if cert.signature_key.is_none() {
            "ssh certificate signature key cannot be nil".to_owned()
        } else if cert.signature.is_none() {
            "ssh certificate signature cannot be nil".to_owned()
        } else {
            return Ok(());
        };
        Err(ProvisionerError::forbidden(message))
    }
}

/// SSH options granted by a token (`step.ssh` claim).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshOptions {
    /// `user` or `host`; empty leaves the request's type.
    #[serde(default)]
    pub cert_type: String,
    /// Granted key id; empty leaves the request's key id.
    #[serde(default, rename = "keyID")]
    pub key_id: String,
    /// Granted principals; empty leaves the request's principals.
    #[serde(default)]
    pub principals: Vec<String>,
    /// Requested start of validity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_after: Option<DateTime<Utc>>,
    /// Requested end of validity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_before: Option<DateTime<Utc>>,
}

impl SshOptions {
    /// Numeric certificate type, `0` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::BadRequest`] for unknown type names.
    pub fn cert_type_code(&self) -> Result<u32> {
        match self.cert_type.as_str() {
            "" => Ok(0),
            "user" => Ok(USER_CERT),
            "host" => Ok(HOST_CERT),
            other => Err(ProvisionerError::bad_request(format!("unknown ssh certificate type {other}"))),
        }
    }
}

fn to_unix(t: DateTime<Utc>) -> u64 {
    u64::try_from(t.timestamp()).unwrap_or(0)
}

/// Applies the options granted by a token to the certificate.
#[derive(Clone, Debug)]
pub struct SshCertificateOptionsModifier(pub SshOptions);

impl Modifier<SshCertificate> for SshCertificateOptionsModifier {
    fn modify(&self, cert: &mut SshCertificate) -> Result<()> {
        let cert_type = self.0.cert_type_code()?;
        if cert_type != 0 {
            cert.cert_type = cert_type;
        }
        if !self.0.key_id.is_empty() {
            cert.key_id.clone_from(&self.0.key_id);
        }
        if !self.0.principals.is_empty() {
            cert.valid_principals.clone_from(&self.0.principals);
        }
        if let Some(va) = self.0.valid_after {
            cert.valid_after = to_unix(va);
        }
        if let Some(vb) = self.0.valid_before {
            cert.valid_before = to_unix(vb);
        }
        Ok(())
    }
}

/// Grants the standard user extensions when a user certificate requests
/// none.
#[derive(Clone, Copy, Debug, Default)]
pub struct SshDefaultExtensionModifier;

impl Modifier<SshCertificate> for SshDefaultExtensionModifier {
    fn modify(&self, cert: &mut SshCertificate) -> Result<()> {
        check_cert_type(cert.cert_type)?;
        if cert.cert_type == USER_CERT && cert.extensions.is_empty() {
            cert.extensions =
                DEFAULT_USER_EXTENSIONS.iter().map(|e| ((*e).to_owned(), String::new())).collect();
        }
        Ok(())
    }
}

/// Rejects certificates whose type, key id or principals differ from what
/// the token granted.
#[derive(Clone, Debug)]
pub struct SshCertificateOptionsValidator(pub SshOptions);

impl Validator<SshCertificate> for SshCertificateOptionsValidator {
    fn valid(&self, cert: &SshCertificate) -> Result<()> {
        let want_type = self.0.cert_type_code()?;
        if want_type != 0 && cert.cert_type != want_type {
            return Err(ProvisionerError::forbidden(format!(
                "ssh certificate type does not match - got {}, want {}",
                cert.cert_type, want_type
            )));
        }
        if !self.0.key_id.is_empty() && cert.key_id != self.0.key_id {
            return Err(ProvisionerError::forbidden(format!(
                "ssh certificate key id does not match - got {}, want {}",
                cert.key_id, self.0.key_id
            )));
        }
        if !self.0.principals.is_empty()
            && !cert.valid_principals.iter().all(|p| self.0.principals.contains(p))
        {
            return Err(ProvisionerError::forbidden(format!(
                "ssh certificate principals does not match - got {:?}, want {:?}",
                cert.valid_principals, self.0.principals
            )));
        }
        Ok(())
    }
}

/// Builds the SSH pipeline for token-based provisioners.
#[must_use]
pub fn ssh_pipeline(
    claimer: &Claimer,
    options: SshOptions,
    limit: Option<DateTime<Utc>>,
) -> Pipeline<SshCertificate> {
    let validity = match limit {
        Some(limit) => SshValidityModifier::with_limit(claimer.clone(), limit),
        None => SshValidityModifier::new(claimer.clone()),
    };
    Pipeline::new()
        .with_modifier(SshCertificateOptionsModifier(options.clone()))
        .with_modifier(validity)
        .with_modifier(SshDefaultExtensionModifier)
        .with_validator(SshCertificateOptionsValidator(options))
        .with_validator(SshCertificateValidityValidator(claimer.clone()))
}
