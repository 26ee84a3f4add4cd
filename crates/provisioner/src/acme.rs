//! ACME provisioner.
//!
//! Orders are authenticated by the ACME protocol layer, so signing takes no
//! token. The provisioner only contributes policy.

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::{
    claims::{Claimer, Claims},
    config::Config,
    error::{ProvisionerError, Result},
    pipeline::{SignContext, SignMethod, SignOptions},
    provisioner::{ProvisionerType, require_claimer, require_name},
    sign_options::{ForceCommonNameModifier, x509_pipeline},
};

/// Provisioner for certificates ordered over ACME.
#[derive(Clone, Debug, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct Acme {
    /// Provisioner name.
    #[builder(into)]
    pub name: String,
    /// Use the first DNS name as common name when the order has none.
    #[serde(default, rename = "forceCN")]
    #[builder(default)]
    pub force_cn: bool,
    /// Per-provisioner policy overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
    #[serde(skip)]
    #[builder(skip)]
    pub(crate) claimer: Option<Claimer>,
}

impl Acme {
    pub(crate) fn id(&self) -> String {
        format!("acme/{}", self.name)
    }

    pub(crate) fn token_id(&self, _token: &str) -> Result<String> {
        Err(ProvisionerError::not_implemented("ACME provisioners do not use one-time tokens"))
    }

    pub(crate) fn init(&mut self, config: &Config) -> Result<()> {
        require_name(&self.name)?;
        self.claimer = Some(Claimer::new(self.claims.clone(), config.claims.clone())?);
        Ok(())
    }

    pub(crate) fn authorize_sign(&self, ctx: &SignContext, _token: &str) -> Result<SignOptions> {
        let claimer = require_claimer(&self.claimer, &self.id())?;
        if ctx.method == SignMethod::Ssh {
            return Err(ProvisionerError::forbidden("ssh certificates not enabled for ACME provisioners"));
        }

        let mut pipeline = x509_pipeline(ProvisionerType::Acme, &self.name, "", claimer);
        if self.force_cn {
            pipeline = pipeline.with_modifier(ForceCommonNameModifier);
        }
        Ok(SignOptions::X509(pipeline))
    }

    pub(crate) fn authorize_revoke(&self, _token: &str) -> Result<()> {
        Err(ProvisionerError::not_implemented("revoke is not supported for ACME provisioners"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{
        config::ProvisionerRegistry,
        provisioner::Provisioner,
        x509::{CertificateTemplate, Curve, PROVISIONER_OID, ProvisionerExtension, PublicKeyInfo},
    };

    fn provisioner(force_cn: bool) -> Provisioner {
        let mut p = Provisioner::Acme(Acme::builder().name("acme").force_cn(force_cn).build());
        p.init(&Config::default(), &ProvisionerRegistry::new()).unwrap();
        p
    }

    #[test]
    fn test_sign_without_token() {
        let p = provisioner(true);
        let pipeline = p.authorize_sign(&SignContext::x509(), "").unwrap().into_x509().unwrap();

        let mut template = CertificateTemplate {
            dns_names: vec!["www.example.com".into()],
            public_key: Some(PublicKeyInfo::Ecdsa { curve: Curve::P256 }),
            ..CertificateTemplate::default()
        };
        pipeline.apply(&mut template).unwrap();

        assert_eq!(template.common_name, "www.example.com");
        let ext = template.extension(PROVISIONER_OID).unwrap();
        let decoded = ProvisionerExtension::from_der(&ext.value).unwrap();
        assert_eq!(decoded.provisioner_type(), Some(ProvisionerType::Acme));
        assert_eq!(decoded.name, "acme");
    }

    #[test]
    fn test_ssh_not_enabled() {
        let err = provisioner(false).authorize_sign(&SignContext::ssh(), "").unwrap_err();
        assert_eq!(err.to_string(), "ssh certificates not enabled for ACME provisioners");
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_revoke_not_implemented() {
        let p = provisioner(false);
        let err = p.authorize_revoke("token").unwrap_err();
        assert!(err.is_not_implemented());
        assert_eq!(err.status_code(), 501);
        assert!(p.token_id("token").unwrap_err().is_not_implemented());
    }
}
