//! Lookup of initialized provisioners.
//!
//! A request carries either a one-time token or a client certificate. The
//! collection maps each to the provisioner responsible for it without
//! verifying anything; verification is the provisioner's job.

use std::{collections::HashMap, sync::Arc};

use privca_provisioner::{
    CertificateInfo, Provisioner, ProvisionerType,
    k8s_sa::K8S_SA_ISSUER,
    token::{RegisteredClaims, decode_header, decode_unverified},
};

use crate::error::{AuthorityError, Result};

/// Initialized provisioners indexed by id.
#[derive(Debug, Default)]
pub struct ProvisionerCollection {
    by_id: HashMap<String, Arc<Provisioner>>,
    ordered: Vec<Arc<Provisioner>>,
    k8s_sa_id: Option<String>,
}

impl ProvisionerCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an initialized provisioner.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Config`] if a provisioner with the same id
    /// is already present.
    pub fn store(&mut self, provisioner: Provisioner) -> Result<()> {
        let id = provisioner.id();
        if self.by_id.contains_key(&id) {
            return Err(AuthorityError::config(format!("cannot add multiple provisioners with the same id: {id}")));
        }
        if provisioner.provisioner_type() == ProvisionerType::K8sSa {
            self.k8s_sa_id = Some(id.clone());
        }
        let provisioner = Arc::new(provisioner);
        self.ordered.push(Arc::clone(&provisioner));
        self.by_id.insert(id, provisioner);
        Ok(())
    }

    /// Number of provisioners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Returns `true` if the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Provisioners in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Provisioner>> {
        self.ordered.iter()
    }

    /// Looks up a provisioner by id.
    #[must_use]
    pub fn load_by_id(&self, id: &str) -> Option<Arc<Provisioner>> {
        self.by_id.get(id).cloned()
    }

    /// Finds the provisioner that should verify `token`.
    ///
    /// Resolution order: `x5c` header (by issuer name), Kubernetes
    /// service-account issuer, `kid` header (JWK `{iss}:{kid}`), then any
    /// audience equal to an OIDC client id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Unauthorized`] if the token cannot be
    /// decoded or no provisioner matches.
    pub fn load_by_token(&self, token: &str) -> Result<Arc<Provisioner>> {
        let header = decode_header(token)?;
        let claims: RegisteredClaims = decode_unverified(token)?;

        if header.x5c.is_some() {
            return self.load_by_id(&format!("x5c/{}", claims.iss)).ok_or_else(not_found);
        }

        if claims.iss == K8S_SA_ISSUER {
            return self
                .k8s_sa_id
                .as_deref()
                .and_then(|id| self.load_by_id(id))
                .ok_or_else(not_found);
        }

        if let Some(kid) = header.kid.as_deref().filter(|kid| !kid.is_empty())
            && let Some(p) = self.load_by_id(&format!("{}:{kid}", claims.iss))
        {
            return Ok(p);
        }

        claims
            .aud
            .iter()
            .find_map(|aud| {
                self.by_id.get(aud).filter(|p| p.provisioner_type() == ProvisionerType::Oidc).cloned()
            })
            .ok_or_else(not_found)
    }

    /// Finds the provisioner that issued a certificate, from its attribution
    /// extension.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Provisioner`] if the certificate cannot be
    /// parsed, or [`AuthorityError::Unauthorized`] if it carries no
    /// attribution or the attributed provisioner is unknown.
    pub fn load_by_certificate(&self, der: &[u8]) -> Result<Arc<Provisioner>> {
        let info = CertificateInfo::from_der(der)?;
        let extension = info
            .provisioner
            .ok_or_else(|| AuthorityError::unauthorized("certificate does not contain a provisioner extension"))?;
        extension
            .provisioner_id()
            .and_then(|id| self.load_by_id(&id))
            .ok_or_else(|| AuthorityError::unauthorized(format!("provisioner {} not found", extension.name)))
    }
}

fn not_found() -> AuthorityError {
    AuthorityError::unauthorized("provisioner not found or invalid audience")
}
