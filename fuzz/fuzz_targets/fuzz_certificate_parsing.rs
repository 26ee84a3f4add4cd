//! Fuzz target for certificate metadata and attribution-extension decoding.
//!
//! Both decoders read attacker-supplied DER (renewal requests carry a
//! client certificate). Neither may panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use privca_provisioner::{CertificateInfo, ProvisionerExtension, x509::PublicKeyInfo};

fuzz_target!(|data: &[u8]| {
    if let Ok(ext) = ProvisionerExtension::from_der(data) {
        // Anything that decodes must re-encode to something that decodes
        // to the same value.
        let again = ProvisionerExtension::from_der(&ext.to_der());
        assert_eq!(again.ok(), Some(ext));
    }

    let _ = PublicKeyInfo::from_spki_der(data);

    if let Ok(info) = CertificateInfo::from_der(data) {
        let _ = info.provisioner.as_ref().map(ProvisionerExtension::provisioner_type);
    }
});
