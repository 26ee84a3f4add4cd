//! The authority facade.
//!
//! [`Authority`] owns the initialized provisioners and the request-path
//! state (used tokens, revocations) and wires them to the signing oracles.
//! Provisioners are immutable after [`Authority::new`].

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use fail::fail_point;
use privca_provisioner::{
    CertificateInfo, CertificateTemplate, Pipeline, Provisioner, ProvisionerRegistry, SignContext,
    SignOptions, SshCertificate, SshCertificateDefaultValidator, Validator,
    token::{DEFAULT_LEEWAY, RegisteredClaims, decode_unverified, unix_now},
};

use crate::{
    collection::ProvisionerCollection,
    config::AuthorityConfig,
    error::{AuthorityError, Result},
    revocation::{MemoryRevocationStore, RevocationStore, RevokeOptions, RevokedCertificate},
    roots::RootStore,
    signer::{SshSigner, X509Signer},
    token_cache::UsedTokenCache,
};

/// A certificate authority front end.
pub struct Authority {
    provisioners: ProvisionerCollection,
    roots: RootStore,
    used_tokens: UsedTokenCache,
    revocations: Arc<dyn RevocationStore>,
    x509_signer: Option<Arc<dyn X509Signer>>,
    ssh_signer: Option<Arc<dyn SshSigner>>,
}

impl std::fmt::Debug for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority")
            .field("provisioners", &self.provisioners.len())
            .field("roots", &self.roots.certificates().len())
            .field("used_tokens", &self.used_tokens)
            .field("x509_signer", &self.x509_signer.is_some())
            .field("ssh_signer", &self.ssh_signer.is_some())
            .finish_non_exhaustive()
    }
}

impl Authority {
    /// Initializes every configured provisioner.
    ///
    /// Revocations are kept in a [`MemoryRevocationStore`] until another
    /// store is installed; no signer is configured.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error: invalid global claims, a
    /// provisioner failing `init`, or duplicate provisioner ids.
    #[tracing::instrument(skip(config), fields(provisioners = config.provisioners.len()))]
    pub fn new(config: AuthorityConfig) -> Result<Self> {
        config.validate()?;
        let provisioner_config = config.provisioner_config()?;
        let roots = RootStore::from_pem(&config.roots)?;
        let registry = ProvisionerRegistry::new();

        let mut provisioners = ProvisionerCollection::new();
        for mut provisioner in config.provisioners {
            provisioner.init(&provisioner_config, &registry).map_err(|e| {
                tracing::warn!(provisioner = %provisioner.id(), error = %e, "provisioner failed to initialize");
                e
            })?;
            tracing::debug!(provisioner = %provisioner.id(), kind = %provisioner.provisioner_type(), "provisioner loaded");
            provisioners.store(provisioner)?;
        }

        Ok(Self {
            provisioners,
            roots,
            used_tokens: UsedTokenCache::new(&config.token_cache),
            revocations: Arc::new(MemoryRevocationStore::new()),
            x509_signer: None,
            ssh_signer: None,
        })
    }

    /// Replaces the revocation store.
    #[must_use]
    pub fn with_revocation_store(mut self, store: Arc<dyn RevocationStore>) -> Self {
        self.revocations = store;
        self
    }

    /// Installs the X.509 signing oracle.
    #[must_use]
    pub fn with_x509_signer(mut self, signer: Arc<dyn X509Signer>) -> Self {
        self.x509_signer = Some(signer);
        self
    }

    /// Installs the SSH signing oracle.
    #[must_use]
    pub fn with_ssh_signer(mut self, signer: Arc<dyn SshSigner>) -> Self {
        self.ssh_signer = Some(signer);
        self
    }

    /// The initialized provisioners.
    #[must_use]
    pub fn provisioners(&self) -> &ProvisionerCollection {
        &self.provisioners
    }

    /// See [`ProvisionerCollection::load_by_token`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Unauthorized`] if no provisioner matches.
    pub fn load_provisioner_by_token(&self, token: &str) -> Result<Arc<Provisioner>> {
        self.provisioners.load_by_token(token)
    }

    /// See [`ProvisionerCollection::load_by_certificate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate is malformed or unattributed.
    pub fn load_provisioner_by_certificate(&self, der: &[u8]) -> Result<Arc<Provisioner>> {
        self.provisioners.load_by_certificate(der)
    }

    /// Looks up a provisioner by id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Unauthorized`] for an unknown id.
    pub fn load_provisioner_by_id(&self, id: &str) -> Result<Arc<Provisioner>> {
        self.provisioners
            .load_by_id(id)
            .ok_or_else(|| AuthorityError::unauthorized(format!("provisioner {id} not found")))
    }

    /// Returns the root certificate (DER) with the given SHA-256
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::NotFound`] if no configured root matches.
    pub fn root(&self, sum: &str) -> Result<Vec<u8>> {
        self.roots.get(sum).map(<[u8]>::to_vec)
    }

    /// DER encodings of the configured roots.
    #[must_use]
    pub fn root_certificates(&self) -> &[Vec<u8>] {
        self.roots.certificates()
    }

    /// Records the token as used, for provisioners with one-time tokens.
    async fn use_token(&self, provisioner: &Provisioner, token: &str) -> Result<()> {
        let token_id = match provisioner.token_id(token) {
            Ok(id) => id,
            Err(e) if e.is_not_implemented() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let expires_in = decode_unverified::<RegisteredClaims>(token)
            .ok()
            .and_then(|claims| claims.exp)
            .map(|exp| Duration::from_secs(u64::try_from(exp - unix_now()).unwrap_or(0) + DEFAULT_LEEWAY));
        self.used_tokens.check_and_mark(&token_id, expires_in).await
    }

    /// Authenticates a signing token and returns its sign options.
    ///
    /// The token is marked as used only after the provisioner accepted it.
    ///
    /// # Errors
    ///
    /// Returns the provisioner's error, or [`AuthorityError::Unauthorized`]
    /// if the token is unknown or was already used.
    #[tracing::instrument(skip(self, token), fields(method = %ctx.method))]
    pub async fn authorize_sign(&self, token: &str, ctx: SignContext) -> Result<SignOptions> {
        let provisioner = self.load_provisioner_by_token(token)?;
        let options = provisioner.authorize_sign(&ctx, token)?;
        self.use_token(&provisioner, token).await?;
        tracing::debug!(provisioner = %provisioner.id(), options = options.len(), "sign authorized");
        Ok(options)
    }

    /// Authenticates a revocation request and returns the responsible
    /// provisioner.
    ///
    /// Token-authenticated requests must name the revoked serial as the
    /// token subject. mTLS-authenticated requests are attributed to the
    /// provisioner that issued the client certificate.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::BadRequest`] if neither credential is
    /// present or the token subject does not match the serial, otherwise the
    /// lookup or provisioner error.
    #[tracing::instrument(skip(self, opts), fields(serial = %opts.serial, mtls = opts.mtls))]
    pub async fn authorize_revoke(&self, opts: &RevokeOptions) -> Result<Arc<Provisioner>> {
        if opts.mtls {
            let crt = opts
                .crt
                .as_deref()
                .ok_or_else(|| AuthorityError::bad_request("missing client certificate for mTLS revocation"))?;
            return self.load_provisioner_by_certificate(crt);
        }

        let token = opts
            .ott
            .as_deref()
            .filter(|ott| !ott.is_empty())
            .ok_or_else(|| AuthorityError::bad_request("missing ott or peer certificate"))?;
        let provisioner = self.load_provisioner_by_token(token)?;
        provisioner.authorize_revoke(token)?;

        let claims: RegisteredClaims = decode_unverified(token)?;
        if claims.sub != opts.serial {
            return Err(AuthorityError::bad_request(format!(
                "token subject ({}) and serial number ({}) do not match",
                claims.sub, opts.serial
            )));
        }
        self.use_token(&provisioner, token).await?;
        Ok(provisioner)
    }

    /// Checks whether a certificate may be renewed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Unauthorized`] if the certificate expired
    /// or was revoked, or the provisioner's policy error.
    #[tracing::instrument(skip(self, cert_der))]
    pub async fn authorize_renewal(&self, cert_der: &[u8]) -> Result<Arc<Provisioner>> {
        let info = CertificateInfo::from_der(cert_der)?;
        if info.not_after < Utc::now() {
            return Err(AuthorityError::unauthorized(format!(
                "certificate expired on {}",
                info.not_after.to_rfc3339()
            )));
        }
        if self.revocations.is_revoked(&info.serial).await? {
            return Err(AuthorityError::unauthorized(format!(
                "certificate with serial number {} has been revoked",
                info.serial
            )));
        }
        let provisioner = self.load_provisioner_by_certificate(cert_der)?;
        provisioner.authorize_renewal(&info)?;
        Ok(provisioner)
    }

    /// Authorizes and records a passive revocation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::NotImplemented`] for active revocation,
    /// the authorization error, or the store error (a duplicate serial is a
    /// [`AuthorityError::BadRequest`]).
    #[tracing::instrument(skip(self, opts), fields(serial = %opts.serial))]
    pub async fn revoke(&self, opts: &RevokeOptions) -> Result<()> {
        if !opts.passive_only {
            return Err(AuthorityError::not_implemented("non-passive revocation not implemented"));
        }
        let provisioner = self.authorize_revoke(opts).await?;

        let record = RevokedCertificate {
            serial: opts.serial.clone(),
            provisioner_id: provisioner.id(),
            reason_code: opts.reason_code,
            reason: opts.reason.clone(),
            mtls: opts.mtls,
            revoked_at: Utc::now(),
        };
        self.revocations.insert(record).await?;
        tracing::info!(provisioner = %provisioner.id(), reason_code = opts.reason_code, "certificate revoked");
        Ok(())
    }

    /// Returns `true` if `serial` has been revoked.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn is_revoked(&self, serial: &str) -> Result<bool> {
        self.revocations.is_revoked(serial).await
    }

    /// Applies `options` to `template` and signs the result.
    ///
    /// # Errors
    ///
    /// Returns the first sign-option error, or
    /// [`AuthorityError::NotImplemented`] if no X.509 signer is installed.
    #[tracing::instrument(skip_all, fields(cn = %template.common_name))]
    pub async fn sign(
        &self,
        mut template: CertificateTemplate,
        options: &Pipeline<CertificateTemplate>,
    ) -> Result<Vec<u8>> {
        let signer = self
            .x509_signer
            .as_ref()
            .ok_or_else(|| AuthorityError::not_implemented("x509 signing is not configured"))?;
        options.apply(&mut template)?;

        fail_point!("authority-x509-sign", |_| Err(AuthorityError::internal(
            "injected failure: authority-x509-sign"
        )));
        signer.sign(&template).await
    }

    /// Applies `options` to `cert`, signs it and checks the signed
    /// certificate is complete.
    ///
    /// # Errors
    ///
    /// Returns the first sign-option error, the signer error, or
    /// [`AuthorityError::NotImplemented`] if no SSH signer is installed.
    #[tracing::instrument(skip_all, fields(key_id = %cert.key_id))]
    pub async fn sign_ssh(
        &self,
        mut cert: SshCertificate,
        options: &Pipeline<SshCertificate>,
    ) -> Result<SshCertificate> {
        let signer = self
            .ssh_signer
            .as_ref()
            .ok_or_else(|| AuthorityError::not_implemented("ssh signing is not configured"))?;
        options.apply(&mut cert)?;

        let signed = signer.sign(cert).await?;
        SshCertificateDefaultValidator.valid(&signed)?;
        Ok(signed)
    }
}
