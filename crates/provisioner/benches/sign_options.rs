//! Performance benchmarks for provisioner authorization and sign options.
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all provisioner benchmarks
//! cargo bench -p privca-provisioner
//!
//! # Run specific benchmark group
//! cargo bench -p privca-provisioner -- authorize_sign
//! ```
//!
//! # Benchmark Groups
//!
//! - `authorize_sign`: JWK token verification producing X.509 sign options
//! - `pipeline_apply`: applying an X.509 pipeline to a certificate template
//! - `claims`: claimer construction and validation
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use privca_provisioner::{
    Claimer, CertificateTemplate, GlobalClaims, ProvisionerType, SignContext,
    sign_options::{with_san_validators, x509_pipeline},
    testutil::{create_signed_jwt, generate_test_keypair, jwk_provisioner},
    token::unix_now,
    x509::{Curve, PublicKeyInfo},
};
use serde_json::json;

fn template() -> CertificateTemplate {
    CertificateTemplate {
        common_name: "svc.example.com".into(),
        dns_names: vec!["svc.example.com".into()],
        public_key: Some(PublicKeyInfo::Ecdsa { curve: Curve::P256 }),
        ..CertificateTemplate::default()
    }
}

// =============================================================================
// Authorization Benchmarks
// =============================================================================

fn bench_authorize_sign(c: &mut Criterion) {
    let mut group = c.benchmark_group("authorize_sign");

    let keypair = generate_test_keypair();
    let provisioner = jwk_provisioner(&keypair, "bench", None);
    let token = create_signed_jwt(
        &keypair,
        "bench",
        &json!({
            "iss": "ops@example.com",
            "sub": "svc.example.com",
            "aud": "https://ca.example.com/sign",
            "exp": unix_now() + 3600,
            "jti": "bench-jti",
        }),
    );

    group.bench_function("jwk_x509", |b| {
        b.iter(|| black_box(provisioner.authorize_sign(&SignContext::x509(), black_box(&token)).unwrap()))
    });

    group.finish();
}

// =============================================================================
// Pipeline Benchmarks
// =============================================================================

fn bench_pipeline_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_apply");
    let claimer = Claimer::new(None, GlobalClaims::default()).unwrap();

    let base = x509_pipeline(ProvisionerType::Jwk, "ops@example.com", "bench", &claimer);
    group.bench_function("base", |b| {
        b.iter(|| {
            let mut t = template();
            base.apply(&mut t).unwrap();
            black_box(t)
        })
    });

    let with_sans = with_san_validators(
        x509_pipeline(ProvisionerType::Jwk, "ops@example.com", "bench", &claimer),
        "svc.example.com",
        &["svc.example.com".to_owned()],
    );
    group.bench_function("with_san_validators", |b| {
        b.iter(|| {
            let mut t = template();
            with_sans.apply(&mut t).unwrap();
            black_box(t)
        })
    });

    group.finish();
}

fn bench_claims(c: &mut Criterion) {
    let mut group = c.benchmark_group("claims");
    group.bench_function("claimer_new", |b| {
        b.iter(|| black_box(Claimer::new(None, GlobalClaims::default()).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_authorize_sign, bench_pipeline_apply, bench_claims);
criterion_main!(benches);
