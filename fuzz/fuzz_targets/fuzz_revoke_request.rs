//! Fuzz target for revoke request decoding.
//!
//! Arbitrary bytes are decoded as a revoke request body and validated.
//! Accepted requests must satisfy the invariants the handler relies on.

#![no_main]

use libfuzzer_sys::fuzz_target;
use privca_api::RevokeRequest;

fuzz_target!(|data: &[u8]| {
    let Ok(request) = serde_json::from_slice::<RevokeRequest>(data) else {
        return;
    };

    if request.validate().is_ok() {
        assert!(!request.serial.is_empty());
        assert!(request.passive);
        assert!(u8::try_from(request.reason_code).is_ok_and(|code| code <= 10 && code != 7));
    }
    let _ = request.ott();
});
