//! Fuzz target for provisioning token parsing and routing.
//!
//! Feeds arbitrary strings as tokens to the unverified decoders and to an
//! ACME and a K8sSA provisioner. Every result must be either `Ok(...)` or
//! `Err(ProvisionerError)`.

#![no_main]

use libfuzzer_sys::fuzz_target;
use privca_provisioner::{
    Config, Provisioner, ProvisionerRegistry, SignContext,
    jwk::ProvisioningClaims,
    token::{RegisteredClaims, decode_header, decode_unverified},
};

fuzz_target!(|data: &[u8]| {
    // Only process valid UTF-8; tokens are always UTF-8 strings
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    let _ = decode_header(token);
    if let Ok(claims) = decode_unverified::<RegisteredClaims>(token) {
        let _ = claims.require_jti();
    }
    if let Ok(claims) = decode_unverified::<ProvisioningClaims>(token) {
        let _ = claims.sans_or_subject();
        let _ = claims.ssh_options().map(|o| o.cert_type_code());
    }

    let registry = ProvisionerRegistry::new();
    let provisioners = [
        serde_json::json!({"type": "ACME", "name": "acme"}),
        serde_json::json!({"type": "K8sSA", "publicKeys": ""}),
    ];
    for config in provisioners {
        let Ok(mut p) = serde_json::from_value::<Provisioner>(config) else {
            continue;
        };
        if p.init(&Config::default(), &registry).is_err() {
            continue;
        }
        let _ = p.token_id(token);
        let _ = p.authorize_sign(&SignContext::x509(), token);
        let _ = p.authorize_revoke(token);
    }
});
