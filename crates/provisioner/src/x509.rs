//! X.509 certificate templates and certificate inspection.
//!
//! A [`CertificateTemplate`] is the unsigned description of a leaf
//! certificate that flows through the X.509 sign-option pipeline before it
//! reaches the signing oracle. [`CertificateInfo`] is the read-only view of
//! an already issued certificate (mTLS peer, renewal input) that the
//! authority needs to make decisions.
//!
//! The provisioner-attribution extension records which provisioner
//! authorized a certificate:
//!
//! ```text
//! ProvisionerExtension ::= SEQUENCE {
//!     type          INTEGER,
//!     name          OCTET STRING,
//!     credentialID  OCTET STRING }
//! ```

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::{
    error::{ProvisionerError, Result},
    provisioner::ProvisionerType,
};

/// OID of the provisioner-attribution extension.
pub const PROVISIONER_OID: &str = "1.3.6.1.4.1.37476.9000.64.1";

/// Minimum accepted RSA modulus size in bits.
pub const MIN_RSA_KEY_BITS: usize = 2048;

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_ED25519: &str = "1.3.101.112";
const OID_CURVE_P256: &str = "1.2.840.10045.3.1.7";
const OID_CURVE_P384: &str = "1.3.132.0.34";
const OID_CURVE_P521: &str = "1.3.132.0.35";

/// Named elliptic curves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Curve {
    /// NIST P-256.
    P256,
    /// NIST P-384.
    P384,
    /// NIST P-521.
    P521,
}

/// Description of a subject public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PublicKeyInfo {
    /// RSA key with the given modulus size.
    Rsa {
        /// Modulus size in bits.
        bits: usize,
    },
    /// ECDSA key on a named curve.
    Ecdsa {
        /// The key's curve.
        curve: Curve,
    },
    /// Ed25519 key.
    Ed25519,
    /// Any other algorithm, identified by OID or curve OID.
    Unsupported {
        /// Algorithm identifier in dotted form.
        algorithm: String,
    },
}

impl PublicKeyInfo {
    /// Describes a DER-encoded `SubjectPublicKeyInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::BadRequest`] if the structure cannot be
    /// parsed.
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let (_, spki) = x509_parser::x509::SubjectPublicKeyInfo::from_der(der).map_err(|e| {
            ProvisionerError::bad_request(format!("error parsing public key: {e}"))
        })?;
        Ok(Self::from_spki(&spki))
    }

    pub(crate) fn from_spki(spki: &x509_parser::x509::SubjectPublicKeyInfo<'_>) -> Self {
        let algorithm = spki.algorithm.algorithm.to_id_string();
        match algorithm.as_str() {
            OID_RSA_ENCRYPTION => match spki.parsed() {
                Ok(x509_parser::public_key::PublicKey::RSA(rsa)) => Self::Rsa { bits: rsa.key_size() },
                _ => Self::Unsupported { algorithm },
            },
            OID_EC_PUBLIC_KEY => {
                let curve = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|p| p.as_oid().ok())
                    .map(|oid| oid.to_id_string())
                    .unwrap_or_default();
                match curve.as_str() {
                    OID_CURVE_P256 => Self::Ecdsa { curve: Curve::P256 },
                    OID_CURVE_P384 => Self::Ecdsa { curve: Curve::P384 },
                    OID_CURVE_P521 => Self::Ecdsa { curve: Curve::P521 },
                    _ => Self::Unsupported { algorithm: curve },
                }
            },
            OID_ED25519 => Self::Ed25519,
            _ => Self::Unsupported { algorithm },
        }
    }
}

/// A certificate extension in raw form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    /// Extension OID in dotted form.
    pub oid: String,
    /// Whether the extension is critical.
    pub critical: bool,
    /// DER-encoded extension value.
    pub value: Vec<u8>,
}

/// Unsigned leaf certificate description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateTemplate {
    /// Subject common name.
    pub common_name: String,
    /// DNS subject alternative names.
    pub dns_names: Vec<String>,
    /// Email subject alternative names.
    pub email_addresses: Vec<String>,
    /// IP subject alternative names.
    pub ip_addresses: Vec<IpAddr>,
    /// URI subject alternative names.
    pub uris: Vec<String>,
    /// Subject public key, as requested in the CSR.
    pub public_key: Option<PublicKeyInfo>,
    /// Start of validity; `None` until a modifier fills it in.
    pub not_before: Option<DateTime<Utc>>,
    /// End of validity; `None` until a modifier fills it in.
    pub not_after: Option<DateTime<Utc>>,
    /// Extensions to include.
    pub extensions: Vec<Extension>,
}

impl CertificateTemplate {
    /// Returns the extension with the given OID, if present.
    #[must_use]
    pub fn extension(&self, oid: &str) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.oid == oid)
    }

    /// Adds `extension`, replacing any existing extension with the same OID.
    pub fn set_extension(&mut self, extension: Extension) {
        self.extensions.retain(|e| e.oid != extension.oid);
        self.extensions.push(extension);
    }
}

/// Decoded provisioner-attribution extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionerExtension {
    /// Numeric provisioner type code.
    pub type_code: i64,
    /// Provisioner name.
    pub name: String,
    /// Credential identifier (JWK key id, empty for other types).
    pub credential_id: String,
}

impl ProvisionerExtension {
    /// Creates the extension for a provisioner.
    #[must_use]
    pub fn new(
        provisioner_type: ProvisionerType,
        name: impl Into<String>,
        credential_id: impl Into<String>,
    ) -> Self {
        Self {
            type_code: provisioner_type.code(),
            name: name.into(),
            credential_id: credential_id.into(),
        }
    }

    /// The provisioner type, if the code is known.
    #[must_use]
    pub fn provisioner_type(&self) -> Option<ProvisionerType> {
        ProvisionerType::from_code(self.type_code)
    }

    /// Id of the attributed provisioner, if the type code is known.
    #[must_use]
    pub fn provisioner_id(&self) -> Option<String> {
        Some(match self.provisioner_type()? {
            ProvisionerType::Jwk => format!("{}:{}", self.name, self.credential_id),
            ProvisionerType::Oidc => self.credential_id.clone(),
            ProvisionerType::X5c => format!("x5c/{}", self.name),
            ProvisionerType::Acme => format!("acme/{}", self.name),
            ProvisionerType::K8sSa => format!("k8ssa/{}", self.name),
        })
    }

    /// DER encoding of the extension value.
    #[must_use]
    pub fn to_der(&self) -> Vec<u8> {
        let mut body = der::integer(self.type_code);
        body.extend(der::octet_string(self.name.as_bytes()));
        body.extend(der::octet_string(self.credential_id.as_bytes()));
        der::tlv(der::TAG_SEQUENCE, &body)
    }

    /// Wraps the encoded value as a non-critical [`Extension`].
    #[must_use]
    pub fn to_extension(&self) -> Extension {
        Extension { oid: PROVISIONER_OID.to_owned(), critical: false, value: self.to_der() }
    }

    /// Decodes an extension value.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::BadRequest`] if `value` is not a valid
    /// encoding.
    pub fn from_der(value: &[u8]) -> Result<Self> {
        let malformed = || ProvisionerError::bad_request("malformed provisioner extension");

        let (seq, rest) = der::read(value, der::TAG_SEQUENCE).ok_or_else(malformed)?;
        if !rest.is_empty() {
            return Err(malformed());
        }
        let (type_bytes, seq) = der::read(seq, der::TAG_INTEGER).ok_or_else(malformed)?;
        let (name, seq) = der::read(seq, der::TAG_OCTET_STRING).ok_or_else(malformed)?;
        let (credential_id, seq) = der::read(seq, der::TAG_OCTET_STRING).ok_or_else(malformed)?;
        if !seq.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            type_code: der::parse_integer(type_bytes).ok_or_else(malformed)?,
            name: String::from_utf8(name.to_vec()).map_err(|_| malformed())?,
            credential_id: String::from_utf8(credential_id.to_vec()).map_err(|_| malformed())?,
        })
    }
}

/// Read-only view of an issued certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Serial number in decimal.
    pub serial: String,
    /// Subject common name, if any.
    pub common_name: Option<String>,
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
    /// Subject public key.
    pub public_key: PublicKeyInfo,
    /// Provisioner attribution, if the certificate carries it.
    pub provisioner: Option<ProvisionerExtension>,
}

impl CertificateInfo {
    /// Parses a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::BadRequest`] if the certificate or its
    /// attribution extension cannot be parsed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
            ProvisionerError::bad_request(format!("error parsing certificate: {e}"))
        })?;
        Self::from_parsed(&cert)
    }

    pub(crate) fn from_parsed(cert: &X509Certificate<'_>) -> Result<Self> {
        let provisioner = cert
            .extensions()
            .iter()
            .find(|ext| ext.oid.to_id_string() == PROVISIONER_OID)
            .map(|ext| ProvisionerExtension::from_der(ext.value))
            .transpose()?;

        Ok(Self {
            serial: cert.tbs_certificate.serial.to_string(),
            common_name: cert
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(str::to_owned),
            not_before: timestamp(cert.validity().not_before.timestamp())?,
            not_after: timestamp(cert.validity().not_after.timestamp())?,
            public_key: PublicKeyInfo::from_spki(cert.public_key()),
            provisioner,
        })
    }
}

pub(crate) fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ProvisionerError::bad_request(format!("timestamp {secs} out of range")))
}

/// Minimal DER encoding for the attribution extension.
mod der {
    pub(super) const TAG_INTEGER: u8 = 0x02;
    pub(super) const TAG_OCTET_STRING: u8 = 0x04;
    pub(super) const TAG_SEQUENCE: u8 = 0x30;

    pub(super) fn tlv(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        let len = body.len();
        if len < 0x80 {
            out.push(len as u8);
        } else {
            let bytes = len.to_be_bytes();
            let skip = bytes.iter().take_while(|b| **b == 0).count();
            out.push(0x80 | (bytes.len() - skip) as u8);
            out.extend_from_slice(&bytes[skip..]);
        }
        out.extend_from_slice(body);
        out
    }

    pub(super) fn integer(value: i64) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        // Minimal two's complement: drop redundant leading 0x00 / 0xff bytes.
        let mut start = 0;
        while start < bytes.len() - 1 {
            let (b, next) = (bytes[start], bytes[start + 1]);
            if (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0) {
                start += 1;
            } else {
                break;
            }
        }
        tlv(TAG_INTEGER, &bytes[start..])
    }

    pub(super) fn octet_string(value: &[u8]) -> Vec<u8> {
        tlv(TAG_OCTET_STRING, value)
    }

    /// Reads one element with the expected tag; returns `(body, rest)`.
    pub(super) fn read(input: &[u8], tag: u8) -> Option<(&[u8], &[u8])> {
        let (&actual, input) = input.split_first()?;
        if actual != tag {
            return None;
        }
        let (&first, mut input) = input.split_first()?;
        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let count = usize::from(first & 0x7f);
            if count == 0 || count > std::mem::size_of::<usize>() || input.len() < count {
                return None;
            }
            let (len_bytes, rest) = input.split_at(count);
            input = rest;
            len_bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
        };
        if input.len() < len {
            return None;
        }
        Some(input.split_at(len))
    }

    pub(super) fn parse_integer(bytes: &[u8]) -> Option<i64> {
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        let fill = if bytes[0] & 0x80 != 0 { 0xff } else { 0x00 };
        let mut buf = [fill; 8];
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        Some(i64::from_be_bytes(buf))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioner_extension_encoding() {
        let ext = ProvisionerExtension::new(ProvisionerType::Jwk, "ops@example.com", "kid-1");
        let der = ext.to_der();

        // SEQUENCE { INTEGER 1, OCTET STRING "ops@example.com", OCTET STRING "kid-1" }
        assert_eq!(&der[..5], &[0x30, 27, 0x02, 0x01, 0x01]);
        assert_eq!(ProvisionerExtension::from_der(&der).unwrap(), ext);
        assert_eq!(ext.provisioner_type(), Some(ProvisionerType::Jwk));
    }

    #[test]
    fn test_provisioner_extension_long_form_length() {
        let name = "n".repeat(300);
        let ext = ProvisionerExtension::new(ProvisionerType::X5c, name.clone(), "");
        let decoded = ProvisionerExtension::from_der(&ext.to_der()).unwrap();
        assert_eq!(decoded.name, name);
        assert_eq!(decoded.provisioner_type(), Some(ProvisionerType::X5c));
    }

    #[test]
    fn test_provisioner_extension_rejects_garbage() {
        assert!(ProvisionerExtension::from_der(&[]).is_err());
        assert!(ProvisionerExtension::from_der(&[0x30, 0x05, 0x02]).is_err());
        assert!(ProvisionerExtension::from_der(&[0x04, 0x00]).is_err());

        let mut trailing = ProvisionerExtension::new(ProvisionerType::Acme, "a", "").to_der();
        trailing.push(0);
        assert!(ProvisionerExtension::from_der(&trailing).is_err());
    }

    #[test]
    fn test_set_extension_replaces_same_oid() {
        let mut template = CertificateTemplate::default();
        template.set_extension(ProvisionerExtension::new(ProvisionerType::Jwk, "a", "1").to_extension());
        template.set_extension(ProvisionerExtension::new(ProvisionerType::Jwk, "b", "2").to_extension());

        assert_eq!(template.extensions.len(), 1);
        let value = &template.extension(PROVISIONER_OID).unwrap().value;
        assert_eq!(ProvisionerExtension::from_der(value).unwrap().name, "b");
    }

    #[test]
    fn test_provisioner_id() {
        let ext = ProvisionerExtension::new(ProvisionerType::Jwk, "ops", "kid-1");
        assert_eq!(ext.provisioner_id().as_deref(), Some("ops:kid-1"));
        let ext = ProvisionerExtension::new(ProvisionerType::Oidc, "Google", "client.apps");
        assert_eq!(ext.provisioner_id().as_deref(), Some("client.apps"));
        let ext = ProvisionerExtension::new(ProvisionerType::K8sSa, "k8sSA-default", "");
        assert_eq!(ext.provisioner_id().as_deref(), Some("k8ssa/k8sSA-default"));
        let unknown = ProvisionerExtension { type_code: 3, ..ext };
        assert_eq!(unknown.provisioner_id(), None);
    }

    #[test]
    fn test_der_integer_minimal() {
        assert_eq!(der::integer(0), vec![0x02, 0x01, 0x00]);
        assert_eq!(der::integer(128), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(der::integer(-1), vec![0x02, 0x01, 0xff]);
        assert_eq!(der::parse_integer(&[0x00, 0x80]), Some(128));
        assert_eq!(der::parse_integer(&[0xff]), Some(-1));
    }

    #[test]
    fn test_certificate_info_from_rcgen_certificate() {
        use rcgen::{CertificateParams, CustomExtension, KeyPair};

        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::new(vec!["leaf.example.com".to_owned()]).unwrap();
        params.serial_number = Some(rcgen::SerialNumber::from(1_404_354_960_355_712_309u64));
        let ext = ProvisionerExtension::new(ProvisionerType::Jwk, "ops", "kid-1");
        params.custom_extensions = vec![CustomExtension::from_oid_content(
            &[1, 3, 6, 1, 4, 1, 37476, 9000, 64, 1],
            ext.to_der(),
        )];
        let cert = params.self_signed(&key).unwrap();

        let info = CertificateInfo::from_der(cert.der()).unwrap();
        assert_eq!(info.serial, "1404354960355712309");
        assert_eq!(info.public_key, PublicKeyInfo::Ecdsa { curve: Curve::P256 });
        assert_eq!(info.provisioner, Some(ext));
        assert!(info.not_before < info.not_after);
    }

    #[test]
    fn test_public_key_info_from_spki() {
        use rcgen::{KeyPair, PublicKeyData};

        let key = KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        assert_eq!(
            PublicKeyInfo::from_spki_der(&key.subject_public_key_info()).unwrap(),
            PublicKeyInfo::Ed25519
        );

        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).unwrap();
        assert_eq!(
            PublicKeyInfo::from_spki_der(&key.subject_public_key_info()).unwrap(),
            PublicKeyInfo::Ecdsa { curve: Curve::P384 }
        );

        let (_, pem) = x509_parser::pem::parse_x509_pem(crate::testutil::P521_PUBLIC_KEY_PEM.as_bytes()).unwrap();
        assert_eq!(
            PublicKeyInfo::from_spki_der(&pem.contents).unwrap(),
            PublicKeyInfo::Ecdsa { curve: Curve::P521 }
        );
    }
}
