//! X.509 sign options.
//!
//! Every provisioner's X.509 pipeline starts from [`x509_pipeline`]:
//! attribution extension and default validity, then public-key and
//! validity-bounds checks. Token-based provisioners extend it with subject
//! and SAN validators.

use std::{net::IpAddr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{
    claims::Claimer,
    duration::HumanDuration,
    error::{ProvisionerError, Result},
    pipeline::{Modifier, Pipeline, Validator},
    provisioner::ProvisionerType,
    x509::{CertificateTemplate, Curve, MIN_RSA_KEY_BITS, ProvisionerExtension, PublicKeyInfo},
};

/// Builds the pipeline shared by every provisioner type.
#[must_use]
pub fn x509_pipeline(
    provisioner_type: ProvisionerType,
    name: &str,
    credential_id: &str,
    claimer: &Claimer,
) -> Pipeline<CertificateTemplate> {
    Pipeline::new()
        .with_modifier(ProvisionerExtensionOption::new(provisioner_type, name, credential_id))
        .with_modifier(ProfileDefaultDuration(claimer.default_tls_cert_duration()))
        .with_validator(DefaultPublicKeyValidator)
        .with_validator(ValidityValidator::new(
            claimer.min_tls_cert_duration(),
            claimer.max_tls_cert_duration(),
        ))
}

pub(crate) fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `start + d`, or `None` when the result is not a representable instant.
fn checked_end(start: DateTime<Utc>, d: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(d).ok().and_then(|d| start.checked_add_signed(d))
}

/// Adds the provisioner-attribution extension, replacing any existing one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionerExtensionOption(ProvisionerExtension);

impl ProvisionerExtensionOption {
    /// Creates the option for the given provisioner.
    #[must_use]
    pub fn new(provisioner_type: ProvisionerType, name: &str, credential_id: &str) -> Self {
        Self(ProvisionerExtension::new(provisioner_type, name, credential_id))
    }
}

impl Modifier<CertificateTemplate> for ProvisionerExtensionOption {
    fn modify(&self, template: &mut CertificateTemplate) -> Result<()> {
        template.set_extension(self.0.to_extension());
        Ok(())
    }
}

/// Fills in an unset validity window: `not_before = now`,
/// `not_after = not_before + d`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProfileDefaultDuration(pub Duration);

impl Modifier<CertificateTemplate> for ProfileDefaultDuration {
    fn modify(&self, template: &mut CertificateTemplate) -> Result<()> {
        let not_before = *template.not_before.get_or_insert_with(Utc::now);
        if template.not_after.is_none() {
            let not_after = checked_end(not_before, self.0).ok_or_else(|| {
                ProvisionerError::bad_request(format!(
                    "certificate notBefore ({}) plus duration {} is out of range",
                    rfc3339(not_before),
                    HumanDuration(self.0)
                ))
            })?;
            template.not_after = Some(not_after);
        }
        Ok(())
    }
}

/// Caps the validity window at the expiry of the credential that authorized
/// the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProfileLimitDuration {
    /// Duration used when the template has no `not_after`.
    pub default: Duration,
    /// Hard upper bound for `not_after`.
    pub limit: DateTime<Utc>,
}

impl Modifier<CertificateTemplate> for ProfileLimitDuration {
    fn modify(&self, template: &mut CertificateTemplate) -> Result<()> {
        let not_before = *template.not_before.get_or_insert_with(Utc::now);
        if not_before > self.limit {
            return Err(ProvisionerError::forbidden(format!(
                "provisioning credential expiration ({}) is before requested certificate notBefore ({})",
                rfc3339(self.limit),
                rfc3339(not_before)
            )));
        }
        // An end past the representable range is still past the limit.
        let not_after = template.not_after.or_else(|| checked_end(not_before, self.default));
        template.not_after = Some(not_after.map_or(self.limit, |t| t.min(self.limit)));
        Ok(())
    }
}

/// Uses the first DNS name as common name when none was requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForceCommonNameModifier;

impl Modifier<CertificateTemplate> for ForceCommonNameModifier {
    fn modify(&self, template: &mut CertificateTemplate) -> Result<()> {
        if template.common_name.is_empty() {
            let Some(first) = template.dns_names.first() else {
                return Err(ProvisionerError::bad_request(
                    "cannot force common name, DNS names is empty",
                ));
            };
            template.common_name = first.clone();
        }
        Ok(())
    }
}

/// Requires a public key of an accepted type and strength.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultPublicKeyValidator;

impl Validator<CertificateTemplate> for DefaultPublicKeyValidator {
    fn valid(&self, template: &CertificateTemplate) -> Result<()> {
        match &template.public_key {
            None => Err(ProvisionerError::forbidden("certificate request is missing a public key")),
            Some(PublicKeyInfo::Rsa { bits }) if *bits < MIN_RSA_KEY_BITS => {
                Err(ProvisionerError::forbidden(format!(
                    "rsa key in CSR must be at least {MIN_RSA_KEY_BITS} bits ({} bytes)",
                    MIN_RSA_KEY_BITS / 8
                )))
            },
            Some(
                PublicKeyInfo::Rsa { .. }
                | PublicKeyInfo::Ecdsa { curve: Curve::P256 | Curve::P384 | Curve::P521 }
                | PublicKeyInfo::Ed25519,
            ) => Ok(()),
            Some(PublicKeyInfo::Unsupported { algorithm }) => Err(ProvisionerError::forbidden(
                format!("unrecognized public key of type '{algorithm}' in CSR"),
            )),
        }
    }
}

/// Checks the final validity window against duration bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidityValidator {
    min: Duration,
    max: Duration,
}

impl ValidityValidator {
    /// Creates a validator accepting durations in `[min, max]`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }
}

impl Validator<CertificateTemplate> for ValidityValidator {
    fn valid(&self, template: &CertificateTemplate) -> Result<()> {
        let (Some(nb), Some(na)) = (template.not_before, template.not_after) else {
            return Err(ProvisionerError::forbidden("certificate validity period has not been set"));
        };
        let now = Utc::now();
        if na < now {
            return Err(ProvisionerError::forbidden(format!(
                "notAfter cannot be in the past; na={}",
                rfc3339(na)
            )));
        }
        if na < nb {
            return Err(ProvisionerError::forbidden(format!(
                "notAfter cannot be before notBefore; na={}, nb={}",
                rfc3339(na),
                rfc3339(nb)
            )));
        }

        let d = (na - nb).to_std().unwrap_or_default();
        if d < self.min {
            return Err(ProvisionerError::forbidden(format!(
                "requested duration of {} is less than the authorized minimum certificate duration of {}",
                HumanDuration(d),
                HumanDuration(self.min)
            )));
        }
        if d > self.max {
            return Err(ProvisionerError::forbidden(format!(
                "requested duration of {} is more than the authorized maximum certificate duration of {}",
                HumanDuration(d),
                HumanDuration(self.max)
            )));
        }
        Ok(())
    }
}

/// Requires the subject common name to equal the authorized value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommonNameValidator(pub String);

impl Validator<CertificateTemplate> for CommonNameValidator {
    fn valid(&self, template: &CertificateTemplate) -> Result<()> {
        if template.common_name.is_empty() {
            return Err(ProvisionerError::forbidden("certificate request cannot contain an empty common name"));
        }
        if template.common_name != self.0 {
            return Err(ProvisionerError::forbidden(format!(
                "certificate request does not contain the valid common name; requested common name = {}, token subject = {}",
                template.common_name, self.0
            )));
        }
        Ok(())
    }
}

/// Compares requested SANs with the authorized set, ignoring order.
fn same_set<T: Ord + Clone>(requested: &[T], authorized: &[T]) -> bool {
    let mut a = requested.to_vec();
    let mut b = authorized.to_vec();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}

/// Requires the DNS SANs to equal the authorized set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsNamesValidator(pub Vec<String>);

impl Validator<CertificateTemplate> for DnsNamesValidator {
    fn valid(&self, template: &CertificateTemplate) -> Result<()> {
        let requested: Vec<String> = template.dns_names.iter().map(|n| n.to_ascii_lowercase()).collect();
        let authorized: Vec<String> = self.0.iter().map(|n| n.to_ascii_lowercase()).collect();
        if same_set(&requested, &authorized) {
            return Ok(());
        }
        Err(ProvisionerError::forbidden(format!(
            "certificate request does not contain the valid DNS names - got {:?}, want {:?}",
            template.dns_names, self.0
        )))
    }
}

/// Requires the IP SANs to equal the authorized set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpAddressesValidator(pub Vec<IpAddr>);

impl Validator<CertificateTemplate> for IpAddressesValidator {
    fn valid(&self, template: &CertificateTemplate) -> Result<()> {
        if same_set(&template.ip_addresses, &self.0) {
            return Ok(());
        }
        Err(ProvisionerError::forbidden(format!(
            "IP Addresses claim failed - got {:?}, want {:?}",
            template.ip_addresses, self.0
        )))
    }
}

/// Requires the email SANs to equal the authorized set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailAddressesValidator(pub Vec<String>);

impl Validator<CertificateTemplate> for EmailAddressesValidator {
    fn valid(&self, template: &CertificateTemplate) -> Result<()> {
        if same_set(&template.email_addresses, &self.0) {
            return Ok(());
        }
        Err(ProvisionerError::forbidden(format!(
            "certificate request does not contain the valid Email addresses - got {:?}, want {:?}",
            template.email_addresses, self.0
        )))
    }
}

/// Splits token SANs into DNS names, IP addresses and email addresses.
#[must_use]
pub fn split_sans(sans: &[String]) -> (Vec<String>, Vec<IpAddr>, Vec<String>) {
    let mut dns = Vec::new();
    let mut ips = Vec::new();
    let mut emails = Vec::new();
    for san in sans {
        if let Ok(ip) = san.parse::<IpAddr>() {
            ips.push(ip);
        } else if san.contains('@') {
            emails.push(san.clone());
        } else {
            dns.push(san.clone());
        }
    }
    (dns, ips, emails)
}

/// Appends the common-name and SAN validators for a token's subject and SANs.
#[must_use]
pub fn with_san_validators(
    pipeline: Pipeline<CertificateTemplate>,
    subject: &str,
    sans: &[String],
) -> Pipeline<CertificateTemplate> {
    let (dns, ips, emails) = split_sans(sans);
    pipeline
        .with_validator(CommonNameValidator(subject.to_owned()))
        .with_validator(DnsNamesValidator(dns))
        .with_validator(IpAddressesValidator(ips))
        .with_validator(EmailAddressesValidator(emails))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{
        claims::GlobalClaims,
        x509::{PROVISIONER_OID, ProvisionerExtension},
    };

    fn template() -> CertificateTemplate {
        CertificateTemplate {
            common_name: "svc.example.com".into(),
            dns_names: vec!["svc.example.com".into()],
            public_key: Some(PublicKeyInfo::Ecdsa { curve: Curve::P256 }),
            ..CertificateTemplate::default()
        }
    }

    fn claimer() -> Claimer {
        Claimer::new(None, GlobalClaims::default()).unwrap()
    }

    #[test]
    fn test_default_pipeline_applies() {
        let pipeline = x509_pipeline(ProvisionerType::Jwk, "ops", "kid", &claimer());
        assert_eq!(pipeline.modifiers().len(), 2);
        assert_eq!(pipeline.validators().len(), 2);

        let mut t = template();
        pipeline.apply(&mut t).unwrap();

        let (nb, na) = (t.not_before.unwrap(), t.not_after.unwrap());
        assert_eq!(na - nb, chrono::Duration::hours(24));
        let ext = ProvisionerExtension::from_der(&t.extension(PROVISIONER_OID).unwrap().value).unwrap();
        assert_eq!(ext.name, "ops");
        assert_eq!(ext.credential_id, "kid");
    }

    #[test]
    fn test_default_pipeline_idempotent() {
        let pipeline = x509_pipeline(ProvisionerType::Acme, "acme", "", &claimer());
        let mut once = template();
        pipeline.apply(&mut once).unwrap();
        let mut twice = once.clone();
        pipeline.apply(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_default_duration_keeps_requested_window() {
        let nb = Utc::now();
        let mut t = CertificateTemplate {
            not_before: Some(nb),
            not_after: Some(nb + chrono::Duration::hours(1)),
            ..template()
        };
        ProfileDefaultDuration(Duration::from_secs(86_400)).modify(&mut t).unwrap();
        assert_eq!(t.not_after, Some(nb + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_limit_duration_caps_not_after() {
        let limit = Utc::now() + chrono::Duration::hours(2);
        let mut t = template();
        ProfileLimitDuration { default: Duration::from_secs(86_400), limit }.modify(&mut t).unwrap();
        assert_eq!(t.not_after, Some(limit));
    }

    #[test]
    fn test_limit_duration_rejects_late_not_before() {
        let limit = Utc::now() + chrono::Duration::hours(1);
        let mut t = CertificateTemplate { not_before: Some(limit + chrono::Duration::hours(1)), ..template() };
        let err = ProfileLimitDuration { default: Duration::from_secs(60), limit }.modify(&mut t).unwrap_err();
        assert!(err.to_string().starts_with("provisioning credential expiration ("), "{err}");
    }

    #[test]
    fn test_default_duration_out_of_range_is_an_error() {
        let nb = DateTime::<Utc>::MAX_UTC - chrono::Duration::hours(1);
        let mut t = CertificateTemplate { not_before: Some(nb), ..template() };
        let err = ProfileDefaultDuration(Duration::from_secs(86_400)).modify(&mut t).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("out of range"), "{err}");
        assert_eq!(t.not_after, None);

        let mut t = template();
        assert!(ProfileDefaultDuration(Duration::MAX).modify(&mut t).is_err());
    }

    #[test]
    fn test_limit_duration_out_of_range_default_capped() {
        let limit = Utc::now() + chrono::Duration::hours(2);
        let mut t = template();
        ProfileLimitDuration { default: Duration::MAX, limit }.modify(&mut t).unwrap();
        assert_eq!(t.not_after, Some(limit));
    }

    #[test]
    fn test_force_common_name() {
        let mut t = CertificateTemplate { common_name: String::new(), ..template() };
        ForceCommonNameModifier.modify(&mut t).unwrap();
        assert_eq!(t.common_name, "svc.example.com");

        let mut empty = CertificateTemplate::default();
        assert!(ForceCommonNameModifier.modify(&mut empty).is_err());
    }

    #[test]
    fn test_public_key_validator() {
        let check = |key| DefaultPublicKeyValidator.valid(&CertificateTemplate { public_key: key, ..template() });

        assert!(check(Some(PublicKeyInfo::Ed25519)).is_ok());
        assert!(check(Some(PublicKeyInfo::Rsa { bits: 2048 })).is_ok());
        assert!(check(Some(PublicKeyInfo::Ecdsa { curve: Curve::P521 })).is_ok());
        assert_eq!(
            check(Some(PublicKeyInfo::Rsa { bits: 1024 })).unwrap_err().to_string(),
            "rsa key in CSR must be at least 2048 bits (256 bytes)"
        );
        assert_eq!(
            check(None).unwrap_err().to_string(),
            "certificate request is missing a public key"
        );
        assert!(check(Some(PublicKeyInfo::Unsupported { algorithm: "1.2.3".into() })).is_err());
    }

    #[test]
    fn test_validity_validator_bounds() {
        let v = ValidityValidator::new(Duration::from_secs(300), Duration::from_secs(86_400));
        let nb = Utc::now();
        let window = |secs| CertificateTemplate {
            not_before: Some(nb),
            not_after: Some(nb + chrono::Duration::seconds(secs)),
            ..template()
        };

        assert!(v.valid(&window(300)).is_ok());
        assert!(v.valid(&window(86_400)).is_ok());
        assert_eq!(
            v.valid(&window(240)).unwrap_err().to_string(),
            "requested duration of 4m0s is less than the authorized minimum certificate duration of 5m0s"
        );
        assert_eq!(
            v.valid(&window(2 * 86_400)).unwrap_err().to_string(),
            "requested duration of 48h0m0s is more than the authorized maximum certificate duration of 24h0m0s"
        );
        assert!(v.valid(&template()).is_err());
    }

    #[test]
    fn test_san_validators() {
        let sans = vec!["svc.example.com".to_owned(), "10.0.0.1".to_owned(), "ops@example.com".to_owned()];
        let pipeline = with_san_validators(Pipeline::new(), "svc.example.com", &sans);

        let mut ok = CertificateTemplate {
            ip_addresses: vec!["10.0.0.1".parse().unwrap()],
            email_addresses: vec!["ops@example.com".into()],
            ..template()
        };
        assert!(pipeline.apply(&mut ok).is_ok());

        let mut extra_dns = ok.clone();
        extra_dns.dns_names.push("evil.example.com".into());
        let err = pipeline.apply(&mut extra_dns).unwrap_err();
        assert!(err.to_string().starts_with("certificate request does not contain the valid DNS names"));

        let mut wrong_cn = CertificateTemplate { common_name: "other".into(), ..ok };
        assert!(pipeline.apply(&mut wrong_cn).is_err());
    }
}
