//! End-to-end authority flows: sign, one-time tokens, revocation and
//! renewal.
#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::sync::Arc;

use privca_authority::{
    Authority, AuthorityConfig, MemoryRevocationStore, RevokeOptions,
    testutil::{FakeSshSigner, FakeX509Signer, acme_config, authority_config},
};
use privca_provisioner::{
    CertificateInfo, CertificateTemplate, ProvisionerExtension, ProvisionerType, SignContext,
    SshCertificate,
    ssh::{SshPublicKey, USER_CERT},
    testutil::{TestKeypair, create_certificate, create_signed_jwt, generate_test_keypair},
    token::unix_now,
    x509::{Curve, PublicKeyInfo},
};
use serde_json::{Value, json};

const KID: &str = "ops-key";
const SIGN_AUD: &str = "https://ca.example.com/1.0/sign";
const REVOKE_AUD: &str = "https://ca.example.com/revoke";

fn jwk_authority(keypair: &TestKeypair, claims: Value) -> Authority {
    let config = authority_config(json!([
        {"type": "ACME", "name": "acme"},
        {"type": "JWK", "name": "ops@example.com", "key": keypair.jwk(KID), "claims": claims},
    ]));
    Authority::new(config)
        .unwrap()
        .with_x509_signer(Arc::new(FakeX509Signer::default()))
        .with_ssh_signer(Arc::new(FakeSshSigner::default()))
}

fn token(keypair: &TestKeypair, aud: &str, sub: &str, jti: &str) -> String {
    create_signed_jwt(
        keypair,
        KID,
        &json!({
            "iss": "ops@example.com",
            "sub": sub,
            "aud": aud,
            "exp": unix_now() + 300,
            "jti": jti,
        }),
    )
}

fn template(cn: &str) -> CertificateTemplate {
    CertificateTemplate {
        common_name: cn.to_owned(),
        dns_names: vec![cn.to_owned()],
        public_key: Some(PublicKeyInfo::Ecdsa { curve: Curve::P256 }),
        ..CertificateTemplate::default()
    }
}

// ===========================================================================
// Construction
// ===========================================================================

#[test]
fn test_new_rejects_duplicate_provisioners() {
    let config = authority_config(json!([
        {"type": "ACME", "name": "acme"},
        {"type": "ACME", "name": "acme"},
    ]));
    let err = Authority::new(config).unwrap_err();
    assert_eq!(err.to_string(), "cannot add multiple provisioners with the same id: acme/acme");
}

#[test]
fn test_new_rejects_second_k8s_sa() {
    let keypair = generate_test_keypair();
    let pem = keypair.public_key_pem();
    let config = authority_config(json!([
        {"type": "K8sSA", "name": "a", "publicKeys": pem},
        {"type": "K8sSA", "name": "b", "publicKeys": pem},
    ]));
    let err = Authority::new(config).unwrap_err();
    assert_eq!(err.to_string(), "cannot have more than one kubernetes service account provisioner");
}

#[test]
fn test_new_rejects_invalid_provisioner_claims() {
    let config = authority_config(json!([
        {"type": "ACME", "name": "acme", "claims": {"minTLSCertDuration": "48h"}},
    ]));
    let err = Authority::new(config).unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert!(err.to_string().starts_with("claims: MaxCertDuration cannot be less than MinCertDuration"));
}

#[test]
fn test_load_provisioner_by_id() {
    let authority = Authority::new(acme_config()).unwrap();
    assert_eq!(authority.load_provisioner_by_id("acme/acme").unwrap().name(), "acme");
    assert_eq!(authority.load_provisioner_by_id("acme/x").unwrap_err().to_string(), "provisioner acme/x not found");
}

// ===========================================================================
// Signing and one-time tokens
// ===========================================================================

#[tokio::test]
async fn test_sign_x509_end_to_end() {
    let keypair = generate_test_keypair();
    let authority = jwk_authority(&keypair, json!({}));

    let ott = token(&keypair, SIGN_AUD, "svc.example.com", "jti-sign");
    let options = authority.authorize_sign(&ott, SignContext::x509()).await.unwrap();
    let pipeline = options.into_x509().unwrap();

    let der = authority.sign(template("svc.example.com"), &pipeline).await.unwrap();
    let info = CertificateInfo::from_der(&der).unwrap();
    let ext = info.provisioner.unwrap();
    assert_eq!(ext.provisioner_type(), Some(ProvisionerType::Jwk));
    assert_eq!(ext.provisioner_id().as_deref(), Some("ops@example.com:ops-key"));
}

#[tokio::test]
async fn test_token_reuse_rejected() {
    let keypair = generate_test_keypair();
    let authority = jwk_authority(&keypair, json!({}));

    let ott = token(&keypair, SIGN_AUD, "svc.example.com", "jti-once");
    authority.authorize_sign(&ott, SignContext::x509()).await.unwrap();

    let err = authority.authorize_sign(&ott, SignContext::x509()).await.unwrap_err();
    assert_eq!(err.to_string(), "token already used");
    assert_eq!(err.status_code(), 401);
}

#[tokio::test]
async fn test_rejected_token_not_consumed() {
    let keypair = generate_test_keypair();
    let authority = jwk_authority(&keypair, json!({}));

    // Valid token presented for the wrong operation first.
    let ott = token(&keypair, SIGN_AUD, "svc.example.com", "jti-ssh-first");
    let err = authority.authorize_sign(&ott, SignContext::ssh()).await.unwrap_err();
    assert_eq!(err.status_code(), 403);

    assert!(authority.authorize_sign(&ott, SignContext::x509()).await.is_ok());
}

#[tokio::test]
async fn test_sign_rejects_unauthorized_san() {
    let keypair = generate_test_keypair();
    let authority = jwk_authority(&keypair, json!({}));

    let ott = token(&keypair, SIGN_AUD, "svc.example.com", "jti-san");
    let pipeline = authority.authorize_sign(&ott, SignContext::x509()).await.unwrap().into_x509().unwrap();

    let mut requested = template("svc.example.com");
    requested.dns_names.push("evil.example.com".into());
    let err = authority.sign(requested, &pipeline).await.unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_sign_without_signer() {
    let authority = Authority::new(acme_config()).unwrap();
    let err = authority.sign(template("a"), &privca_provisioner::Pipeline::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "x509 signing is not configured");
    assert_eq!(err.status_code(), 501);
}

#[tokio::test]
async fn test_sign_ssh_end_to_end() {
    let keypair = generate_test_keypair();
    let authority = jwk_authority(&keypair, json!({"enableSSHCA": true}));

    let ott = create_signed_jwt(
        &keypair,
        KID,
        &json!({
            "iss": "ops@example.com",
            "sub": "alice",
            "aud": SIGN_AUD,
            "exp": unix_now() + 300,
            "jti": "jti-ssh",
            "step": {"ssh": {"certType": "user", "keyID": "alice", "principals": ["alice"]}},
        }),
    );
    let pipeline = authority.authorize_sign(&ott, SignContext::ssh()).await.unwrap().into_ssh().unwrap();

    let request = SshCertificate {
        key: Some(SshPublicKey { algorithm: "ssh-ed25519".into(), blob: vec![3; 32] }),
        ..SshCertificate::default()
    };
    let signed = authority.sign_ssh(request, &pipeline).await.unwrap();
    assert_eq!(signed.cert_type, USER_CERT);
    assert_eq!(signed.valid_principals, vec!["alice"]);
    assert!(signed.extensions.contains_key("permit-pty"));
}

#[tokio::test]
async fn test_sign_ssh_incomplete_signature_rejected() {
    let keypair = generate_test_keypair();
    let authority = jwk_authority(&keypair, json!({"enableSSHCA": true}))
        .with_ssh_signer(Arc::new(FakeSshSigner { omit_signature: true }));

    let ott = create_signed_jwt(
        &keypair,
        KID,
        &json!({
            "iss": "ops@example.com",
            "sub": "host",
            "aud": SIGN_AUD,
            "exp": unix_now() + 300,
            "jti": "jti-ssh-host",
            "step": {"ssh": {"certType": "host", "keyID": "host", "principals": ["host.example.com"]}},
        }),
    );
    let pipeline = authority.authorize_sign(&ott, SignContext::ssh()).await.unwrap().into_ssh().unwrap();
    let request = SshCertificate {
        key: Some(SshPublicKey { algorithm: "ssh-ed25519".into(), blob: vec![3; 32] }),
        ..SshCertificate::default()
    };
    let err = authority.sign_ssh(request, &pipeline).await.unwrap_err();
    assert_eq!(err.to_string(), "ssh certificate signature cannot be nil");
}

// ===========================================================================
// Revocation
// ===========================================================================

#[tokio::test]
async fn test_revoke_with_token() {
    let keypair = generate_test_keypair();
    let authority = jwk_authority(&keypair, json!({}));

    let ott = token(&keypair, REVOKE_AUD, "1234", "jti-revoke");
    let opts = RevokeOptions::builder().serial("1234").reason_code(1).ott(ott).build();
    authority.revoke(&opts).await.unwrap();
    assert!(authority.is_revoked("1234").await.unwrap());
}

#[tokio::test]
async fn test_revoke_subject_mismatch() {
    let keypair = generate_test_keypair();
    let authority = jwk_authority(&keypair, json!({}));

    let ott = token(&keypair, REVOKE_AUD, "1234", "jti-mismatch");
    let opts = RevokeOptions::builder().serial("9999").ott(ott).build();
    let err = authority.revoke(&opts).await.unwrap_err();
    assert_eq!(err.to_string(), "token subject (1234) and serial number (9999) do not match");
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_revoke_with_sign_token_rejected() {
    let keypair = generate_test_keypair();
    let authority = jwk_authority(&keypair, json!({}));

    let ott = token(&keypair, SIGN_AUD, "1234", "jti-wrong-aud");
    let opts = RevokeOptions::builder().serial("1234").ott(ott).build();
    assert_eq!(authority.revoke(&opts).await.unwrap_err().status_code(), 401);
}

#[tokio::test]
async fn test_revoke_twice() {
    let authority = Authority::new(acme_config()).unwrap();
    let ext = ProvisionerExtension::new(ProvisionerType::Acme, "acme", "");
    let crt = create_certificate(55, Some(&ext));

    let opts = RevokeOptions::builder().serial("55").mtls(true).crt(crt).build();
    authority.revoke(&opts).await.unwrap();

    let err = authority.revoke(&opts).await.unwrap_err();
    assert_eq!(err.to_string(), "certificate with serial number 55 has already been revoked");
}

#[tokio::test]
async fn test_revoke_active_not_implemented() {
    let authority = Authority::new(acme_config()).unwrap();
    let opts = RevokeOptions::builder().serial("1").passive_only(false).ott("x").build();
    let err = authority.revoke(&opts).await.unwrap_err();
    assert_eq!(err.to_string(), "non-passive revocation not implemented");
    assert_eq!(err.status_code(), 501);
}

#[tokio::test]
async fn test_revoke_without_credentials() {
    let authority = Authority::new(acme_config()).unwrap();
    let err = authority.revoke(&RevokeOptions::builder().serial("1").build()).await.unwrap_err();
    assert_eq!(err.to_string(), "missing ott or peer certificate");
}

#[tokio::test]
async fn test_revoke_with_unverifiable_k8s_token() {
    let authority = Authority::new(authority_config(json!([
        {"type": "K8sSA", "publicKeys": generate_test_keypair().public_key_pem()},
    ])))
    .unwrap();
    let keypair = generate_test_keypair();
    let ott = create_signed_jwt(&keypair, "", &json!({"iss": "kubernetes/serviceaccount", "sub": "1"}));
    let opts = RevokeOptions::builder().serial("1").ott(ott).build();
    assert_eq!(authority.revoke(&opts).await.unwrap_err().status_code(), 401);
}

#[tokio::test]
async fn test_shared_revocation_store() {
    let store = Arc::new(MemoryRevocationStore::new());
    let authority = Authority::new(acme_config()).unwrap().with_revocation_store(store.clone());
    let ext = ProvisionerExtension::new(ProvisionerType::Acme, "acme", "");

    let opts = RevokeOptions::builder().serial("8").mtls(true).crt(create_certificate(8, Some(&ext))).build();
    authority.revoke(&opts).await.unwrap();
    assert_eq!(store.len(), 1);
}

// ===========================================================================
// Renewal
// ===========================================================================

#[tokio::test]
async fn test_renewal_allowed_and_disabled() {
    let config = authority_config(json!([
        {"type": "ACME", "name": "renewable"},
        {"type": "ACME", "name": "frozen", "claims": {"disableRenewal": true}},
    ]));
    let authority = Authority::new(config).unwrap();

    let ok = create_certificate(1, Some(&ProvisionerExtension::new(ProvisionerType::Acme, "renewable", "")));
    assert_eq!(authority.authorize_renewal(&ok).await.unwrap().id(), "acme/renewable");

    let frozen = create_certificate(2, Some(&ProvisionerExtension::new(ProvisionerType::Acme, "frozen", "")));
    let err = authority.authorize_renewal(&frozen).await.unwrap_err();
    assert_eq!(err.to_string(), "renew is disabled for provisioner acme/frozen");
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_renewal_disabled_globally() {
    let config: AuthorityConfig = serde_json::from_value(json!({
        "baseUrl": "https://ca.example.com",
        "claims": {"disableRenewal": true},
        "provisioners": [{"type": "ACME", "name": "acme"}],
    }))
    .unwrap();
    let authority = Authority::new(config).unwrap();

    let crt = create_certificate(3, Some(&ProvisionerExtension::new(ProvisionerType::Acme, "acme", "")));
    assert_eq!(authority.authorize_renewal(&crt).await.unwrap_err().status_code(), 403);
}

#[tokio::test]
async fn test_renewal_of_revoked_certificate() {
    let authority = Authority::new(acme_config()).unwrap();
    let ext = ProvisionerExtension::new(ProvisionerType::Acme, "acme", "");
    let crt = create_certificate(4, Some(&ext));

    authority.revoke(&RevokeOptions::builder().serial("4").mtls(true).crt(crt.clone()).build()).await.unwrap();

    let err = authority.authorize_renewal(&crt).await.unwrap_err();
    assert_eq!(err.to_string(), "certificate with serial number 4 has been revoked");
    assert_eq!(err.status_code(), 401);
}

// ===========================================================================
// Roots
// ===========================================================================

#[test]
fn test_root_by_fingerprint() {
    let chain = privca_provisioner::testutil::create_x5c_chain(std::time::Duration::from_secs(3600));
    let mut config = acme_config();
    config.roots = vec![chain.root_pem];
    let authority = Authority::new(config).unwrap();

    let der = authority.root_certificates()[0].clone();
    let sum = privca_authority::roots::fingerprint(&der);
    assert_eq!(authority.root(&sum).unwrap(), der);

    let err = authority.root("foo").unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.to_string(), "certificate with fingerprint foo was not found");
}

#[test]
fn test_invalid_root_rejected_at_construction() {
    let mut config = acme_config();
    config.roots = vec!["-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n".to_owned()];
    let err = Authority::new(config).unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert!(err.to_string().starts_with("error parsing root certificate 0"), "{err}");
}
