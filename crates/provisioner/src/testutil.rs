//! Shared test utilities for provisioner testing.
//!
//! Helpers for generating Ed25519 key pairs, signing provisioning tokens,
//! crafting raw JWT strings (for attack testing) and building certificate
//! chains for the X5C provisioner. Feature-gated behind `testutil` so it
//! never leaks into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! privca-provisioner = { path = "../provisioner", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use privca_provisioner::testutil::{generate_test_keypair, create_signed_jwt};
//! ```

use std::time::{Duration, SystemTime};

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header, jwk::Jwk as JsonWebKey};
use rand_core::OsRng;
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DnType, IsCa, Issuer, KeyPair,
    SerialNumber,
};
use zeroize::Zeroizing;

use crate::{
    claims::Claims,
    config::{Audiences, Config, ProvisionerRegistry},
    jwk::Jwk,
    keys::VerifyingKey,
    provisioner::Provisioner,
    x509::{CertificateInfo, Curve, ProvisionerExtension, PublicKeyInfo},
};

/// Base URL the test audiences are derived from.
pub const TEST_CA_URL: &str = "https://ca.example.com";

/// OID arcs of the provisioner attribution extension.
const PROVISIONER_OID_ARCS: &[u64] = &[1, 3, 6, 1, 4, 1, 37476, 9000, 64, 1];

/// A fixed P-521 public key. rcgen cannot generate P-521 keys with the ring
/// backend.
pub const P521_PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIGbMBAGByqGSM49AgEGBSuBBAAjA4GGAAQAWj8vyfmDGVfRmux1vCSWgn0nnz7m
bIYZ7THt5WgFqolIQ7PAccTt8aKFczgpp/tsmSD9TzYYwtcxJola2OJyh90A01zx
xYee+yxNyhSAdhxPoJrnvF/q1bhEz2b85tQ2zejBKAsa9oHcVIp05M8LVfGS5MUq
ltulrAGO66n8yhzx02k=
-----END PUBLIC KEY-----
";

/// An Ed25519 key pair for signing test tokens.
///
/// The private key is held in PKCS#8 DER form, wrapped in [`Zeroizing`] so
/// it is scrubbed from memory on drop, even in test code.
pub struct TestKeypair {
    /// Private key in PKCS#8 DER (suitable for [`EncodingKey::from_ed_der`]).
    pub pkcs8_der: Zeroizing<Vec<u8>>,
    /// Raw 32-byte public key.
    pub public_key: [u8; 32],
}

impl TestKeypair {
    /// Public key encoded as base64url without padding.
    #[must_use]
    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public_key)
    }

    /// Public key as an OKP JSON Web Key with the given key id.
    ///
    /// # Panics
    ///
    /// Panics if the JWK JSON cannot be deserialized.
    #[must_use]
    pub fn jwk(&self, kid: &str) -> JsonWebKey {
        serde_json::from_value(serde_json::json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": self.public_key_b64(),
            "kid": kid,
        }))
        .expect("valid OKP jwk")
    }

    /// Public key as a `PUBLIC KEY` PEM block.
    #[must_use]
    pub fn public_key_pem(&self) -> String {
        let mut spki = vec![
            0x30, 0x2a, // SEQUENCE, 42 bytes
            0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
            0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
            0x03, 0x21, 0x00, // BIT STRING, 33 bytes, no unused bits
        ];
        spki.extend_from_slice(&self.public_key);
        format!("-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n", STANDARD.encode(spki))
    }

    /// Verification key for the public half.
    ///
    /// # Panics
    ///
    /// Panics if the key cannot be converted.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from_jwk(&self.jwk("test")).expect("valid verifying key")
    }
}

/// Generates a fresh random Ed25519 key pair.
#[must_use]
pub fn generate_test_keypair() -> TestKeypair {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key = signing_key.verifying_key().to_bytes();

    // Wrap intermediate private bytes in Zeroizing to scrub from memory on drop.
    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    TestKeypair { pkcs8_der, public_key }
}

/// Signs `claims` with `keypair` using EdDSA.
///
/// The `kid` header is set unless `kid` is empty.
///
/// # Panics
///
/// Panics if JWT encoding fails (should not happen with valid inputs).
#[must_use]
pub fn create_signed_jwt(keypair: &TestKeypair, kid: &str, claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::EdDSA);
    if !kid.is_empty() {
        header.kid = Some(kid.to_owned());
    }
    let encoding_key = EncodingKey::from_ed_der(&keypair.pkcs8_der);
    jsonwebtoken::encode(&header, claims, &encoding_key).expect("Failed to encode test JWT")
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[must_use]
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Provisioner configuration with audiences for [`TEST_CA_URL`] and the
/// default global claims.
#[must_use]
pub fn test_config() -> Config {
    Config::builder().audiences(Audiences::for_base_url(TEST_CA_URL)).build()
}

/// An initialized JWK provisioner named `ops@example.com` trusting
/// `keypair` under `kid`.
///
/// # Panics
///
/// Panics if initialization fails.
#[must_use]
pub fn jwk_provisioner(keypair: &TestKeypair, kid: &str, claims: Option<Claims>) -> Provisioner {
    let jwk = Jwk::builder().name("ops@example.com").key(keypair.jwk(kid)).maybe_claims(claims).build();
    let mut p = Provisioner::Jwk(jwk);
    p.init(&test_config(), &ProvisionerRegistry::new()).expect("jwk provisioner init");
    p
}

/// A root CA and a leaf issued by it, for X5C tokens.
pub struct X5cChain {
    /// Root certificate PEM.
    pub root_pem: String,
    /// Leaf certificate DER.
    pub leaf_der: Vec<u8>,
    /// Leaf P-256 key.
    pub leaf_key: KeyPair,
}

/// Creates a chain whose leaf is valid for `lifetime` from now.
///
/// # Panics
///
/// Panics if certificate generation fails.
#[must_use]
pub fn create_x5c_chain(lifetime: Duration) -> X5cChain {
    let now = SystemTime::now();
    let an_hour = Duration::from_secs(3600);

    let root_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).expect("root key");
    let mut root_params = CertificateParams::new(Vec::<String>::new()).expect("root params");
    root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    root_params.distinguished_name.push(DnType::CommonName, "Test Root CA");
    root_params.not_before = (now - an_hour).into();
    root_params.not_after = (now + 24 * an_hour).into();
    let root = root_params.self_signed(&root_key).expect("root certificate");
    let issuer = Issuer::new(root_params, root_key);

    let leaf_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).expect("leaf key");
    let mut leaf_params =
        CertificateParams::new(vec!["x5c-leaf.example.com".to_owned()]).expect("leaf params");
    leaf_params.distinguished_name.push(DnType::CommonName, "x5c-leaf");
    leaf_params.not_before = (now - Duration::from_secs(60)).into();
    leaf_params.not_after = (now + lifetime).into();
    let leaf = leaf_params.signed_by(&leaf_key, &issuer).expect("leaf certificate");

    X5cChain { root_pem: root.pem(), leaf_der: leaf.der().to_vec(), leaf_key }
}

/// Signs `claims` with the chain's leaf key (ES256), carrying the leaf in
/// the `x5c` header.
///
/// # Panics
///
/// Panics if JWT encoding fails.
#[must_use]
pub fn create_x5c_token(chain: &X5cChain, claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.x5c = Some(vec![STANDARD.encode(&chain.leaf_der)]);
    let key_der = Zeroizing::new(chain.leaf_key.serialize_der());
    let encoding_key = EncodingKey::from_ec_der(&key_der);
    jsonwebtoken::encode(&header, claims, &encoding_key).expect("Failed to encode x5c JWT")
}

/// A self-signed certificate with the given serial, optionally attributed
/// to a provisioner. Returns the DER.
///
/// # Panics
///
/// Panics if certificate generation fails.
#[must_use]
pub fn create_certificate(serial: u64, provisioner: Option<&ProvisionerExtension>) -> Vec<u8> {
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).expect("key");
    let mut params = CertificateParams::new(vec!["leaf.example.com".to_owned()]).expect("params");
    params.distinguished_name.push(DnType::CommonName, "leaf.example.com");
    params.serial_number = Some(SerialNumber::from(serial));
    if let Some(ext) = provisioner {
        params.custom_extensions =
            vec![CustomExtension::from_oid_content(PROVISIONER_OID_ARCS, ext.to_der())];
    }
    params.self_signed(&key).expect("certificate").der().to_vec()
}

/// Certificate metadata valid for the surrounding hour.
#[must_use]
pub fn certificate_info(serial: &str) -> CertificateInfo {
    let now = Utc::now();
    CertificateInfo {
        serial: serial.to_owned(),
        common_name: Some("leaf.example.com".to_owned()),
        not_before: now - chrono::Duration::hours(1),
        not_after: now + chrono::Duration::hours(1),
        public_key: PublicKeyInfo::Ecdsa { curve: Curve::P256 },
        provisioner: None,
    }
}

/// Asserts that a [`Result<T, ProvisionerError>`] is an `Err` matching the
/// given [`ProvisionerError`](crate::error::ProvisionerError) variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use privca_provisioner::assert_provisioner_error;
/// use privca_provisioner::error::ProvisionerError;
///
/// let result: Result<(), ProvisionerError> = Err(ProvisionerError::forbidden("no"));
/// assert_provisioner_error!(result, Forbidden);
/// ```
#[macro_export]
macro_rules! assert_provisioner_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::ProvisionerError::$variant { .. })),
            "expected ProvisionerError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::ProvisionerError::$variant { .. })),
            "{}: expected ProvisionerError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
