//! Token verification keys.
//!
//! Provisioners hold verification keys in three shapes: JSON Web Keys,
//! PEM-encoded public keys and the public key of an X.509 leaf
//! certificate. Each is converted into a [`VerifyingKey`], which pairs the
//! `jsonwebtoken` decoding key with the set of signature algorithms the key
//! may legitimately verify.

use std::fmt;

use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, EllipticCurve, Jwk},
};
use x509_parser::{pem::Pem, prelude::FromDer, x509::SubjectPublicKeyInfo};

use crate::{
    error::{ProvisionerError, Result},
    x509::{Curve, PublicKeyInfo},
};

const RSA_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];
const HMAC_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Family of a verification key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFamily {
    /// RSA public key.
    Rsa,
    /// ECDSA public key on the given curve.
    Ec(Curve),
    /// Ed25519 public key.
    Ed25519,
    /// Shared HMAC secret.
    Hmac,
}

impl KeyFamily {
    /// Signature algorithms a key of this family can verify.
    #[must_use]
    pub fn algorithms(self) -> &'static [Algorithm] {
        match self {
            Self::Rsa => RSA_ALGORITHMS,
            Self::Ec(Curve::P256) => &[Algorithm::ES256],
            Self::Ec(Curve::P384) => &[Algorithm::ES384],
            Self::Ec(Curve::P521) => &[],
            Self::Ed25519 => &[Algorithm::EdDSA],
            Self::Hmac => HMAC_ALGORITHMS,
        }
    }
}

/// A key able to verify token signatures.
#[derive(Clone)]
pub struct VerifyingKey {
    decoding: DecodingKey,
    family: KeyFamily,
    kid: Option<String>,
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyingKey")
            .field("family", &self.family)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl VerifyingKey {
    /// Builds a key from a parsed `SubjectPublicKeyInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Config`] for key types that cannot verify
    /// tokens.
    pub fn from_spki(spki: &SubjectPublicKeyInfo<'_>) -> Result<Self> {
        let raw = &spki.subject_public_key.data;
        let (decoding, family) = match PublicKeyInfo::from_spki(spki) {
            PublicKeyInfo::Rsa { .. } => (DecodingKey::from_rsa_der(raw), KeyFamily::Rsa),
            PublicKeyInfo::Ecdsa { curve: curve @ (Curve::P256 | Curve::P384) } => {
                (DecodingKey::from_ec_der(raw), KeyFamily::Ec(curve))
            },
            PublicKeyInfo::Ed25519 => (DecodingKey::from_ed_der(raw), KeyFamily::Ed25519),
            other => {
                return Err(ProvisionerError::config(format!("unexpected public key type {other:?}")));
            },
        };
        Ok(Self { decoding, family, kid: None })
    }

    /// Builds a key from a DER-encoded `SubjectPublicKeyInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Config`] if the structure cannot be parsed
    /// or holds an unsupported key type.
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let (_, spki) = SubjectPublicKeyInfo::from_der(der)
            .map_err(|e| ProvisionerError::config(format!("error parsing public key: {e}")))?;
        Self::from_spki(&spki)
    }

    /// Parses every key in a PEM bundle.
    ///
    /// Accepts `PUBLIC KEY` blocks and `CERTIFICATE` blocks (the certificate's
    /// subject key is used). Any other block, or an unsupported key type,
    /// fails the whole bundle.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Config`] describing the offending block.
    pub fn from_pem_bundle(pem: &[u8]) -> Result<Vec<Self>> {
        let mut keys = Vec::new();
        for block in Pem::iter_from_buffer(pem) {
            let block =
                block.map_err(|e| ProvisionerError::config(format!("error parsing pem: {e}")))?;
            let key = match block.label.as_str() {
                "PUBLIC KEY" => Self::from_spki_der(&block.contents)?,
                "CERTIFICATE" => {
                    let cert = block.parse_x509().map_err(|e| {
                        ProvisionerError::config(format!("error parsing certificate: {e}"))
                    })?;
                    Self::from_spki(cert.public_key())?
                },
                label => {
                    return Err(ProvisionerError::config(format!("unexpected pem block {label}")));
                },
            };
            keys.push(key);
        }
        Ok(keys)
    }

    /// Builds a key from a JSON Web Key.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Config`] if the key material is invalid
    /// or its curve is unsupported.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        let family = match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => KeyFamily::Rsa,
            AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
                EllipticCurve::P256 => KeyFamily::Ec(Curve::P256),
                EllipticCurve::P384 => KeyFamily::Ec(Curve::P384),
                ref curve => {
                    return Err(ProvisionerError::config(format!("unsupported curve {curve:?}")));
                },
            },
            AlgorithmParameters::OctetKeyPair(okp) => match okp.curve {
                EllipticCurve::Ed25519 => KeyFamily::Ed25519,
                ref curve => {
                    return Err(ProvisionerError::config(format!("unsupported curve {curve:?}")));
                },
            },
            AlgorithmParameters::OctetKey(_) => KeyFamily::Hmac,
        };
        let decoding = DecodingKey::from_jwk(jwk)
            .map_err(|e| ProvisionerError::config(format!("invalid jwk: {e}")))?;
        Ok(Self { decoding, family, kid: jwk.common.key_id.clone() })
    }

    /// The `jsonwebtoken` decoding key.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// The key family.
    #[must_use]
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// The key id, for keys loaded from a JWK.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pem_bundle_mixed_keys() {
        let ec = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let ed = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        let bundle = format!("{}{}", ec.public_key_pem(), ed.public_key_pem());

        let keys = VerifyingKey::from_pem_bundle(bundle.as_bytes()).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].family(), KeyFamily::Ec(Curve::P256));
        assert_eq!(keys[1].family(), KeyFamily::Ed25519);
    }

    #[test]
    fn test_from_pem_bundle_rejects_p521() {
        let err = VerifyingKey::from_pem_bundle(crate::testutil::P521_PUBLIC_KEY_PEM.as_bytes()).unwrap_err();
        assert!(err.to_string().starts_with("unexpected public key type"), "{err}");
    }

    #[test]
    fn test_from_pem_bundle_rejects_private_key() {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let err = VerifyingKey::from_pem_bundle(key.serialize_pem().as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "unexpected pem block PRIVATE KEY");
    }

    #[test]
    fn test_key_family_algorithms() {
        assert_eq!(KeyFamily::Ed25519.algorithms(), &[Algorithm::EdDSA]);
        assert_eq!(KeyFamily::Ec(Curve::P384).algorithms(), &[Algorithm::ES384]);
        assert!(KeyFamily::Rsa.algorithms().contains(&Algorithm::PS256));
        assert!(!KeyFamily::Rsa.algorithms().contains(&Algorithm::HS256));
    }

    #[test]
    fn test_from_jwk_oct() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "oct",
            "kid": "shared",
            "k": "c2VjcmV0LXNlY3JldC1zZWNyZXQtc2VjcmV0",
        }))
        .unwrap();
        let key = VerifyingKey::from_jwk(&jwk).unwrap();
        assert_eq!(key.family(), KeyFamily::Hmac);
        assert_eq!(key.kid(), Some("shared"));
    }
}
