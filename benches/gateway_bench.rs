//! Performance benchmarks for the request gateway.
//!
//! Run with: cargo bench

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use nav_gateway::auth::{
    compute_effective_roles, extract_credential, EffectiveRoles, ManualClock, RateLimitConfig,
    RateLimitPolicy, RateLimitRequest, RateLimiter, RequestSource, DEFAULT_CLIENT_SECRET_HEADER,
};

fn limiter() -> RateLimiter {
    let mut config = RateLimitConfig::default();
    config.defaults.anonymous.limit = u64::MAX;
    let policy = RateLimitPolicy::compile(&config).unwrap();
    RateLimiter::with_clock(policy, Arc::new(ManualClock::new(1_700_000_000_000)))
}

/// Benchmark the limiter on one hot key and across many keys
fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");
    let roles = EffectiveRoles::empty();

    group.throughput(Throughput::Elements(1));
    group.bench_function("hot_key", |b| {
        let limiter = limiter();
        b.iter(|| {
            black_box(limiter.check(&RateLimitRequest {
                method: "GET",
                path: "/api/navs",
                ip: "192.0.2.1",
                identity: None,
                roles: &roles,
            }))
        });
    });

    for keys in [100usize, 10_000].iter() {
        let ips: Vec<String> = (0..*keys)
            .map(|i| format!("10.{}.{}.{}", i >> 16 & 0xff, i >> 8 & 0xff, i & 0xff))
            .collect();
        group.bench_with_input(BenchmarkId::new("spread_keys", keys), keys, |b, _| {
            let limiter = limiter();
            let mut next = 0usize;
            b.iter(|| {
                let ip = &ips[next % ips.len()];
                next += 1;
                black_box(limiter.check(&RateLimitRequest {
                    method: "GET",
                    path: "/api/navs?page=2",
                    ip,
                    identity: None,
                    roles: &roles,
                }))
            });
        });
    }

    group.finish();
}

/// Benchmark role normalization
fn bench_role_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("role_normalization");
    let raw: Vec<String> = ["editor", "reviewer", "viewer", "admin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    for source in [RequestSource::Main, RequestSource::Admin] {
        group.bench_function(source.as_str(), |b| {
            b.iter(|| black_box(compute_effective_roles(black_box(&raw), source)));
        });
    }

    group.finish();
}

/// Benchmark credential extraction from a cookie-heavy request
fn bench_credential_extraction(c: &mut Criterion) {
    let mut headers = HeaderMap::new();
    headers.insert(
        "cookie",
        HeaderValue::from_static(
            "theme=dark; lang=en; _ga=GA1.2.3; access_token_main=eyJhbGciOiJIUzI1NiJ9.e30.sig",
        ),
    );
    let secret_header = HeaderName::from_static(DEFAULT_CLIENT_SECRET_HEADER);

    c.bench_function("extract_credential_cookie", |b| {
        b.iter(|| black_box(extract_credential(&headers, &secret_header, RequestSource::Main)));
    });
}

criterion_group!(
    benches,
    bench_rate_limiter,
    bench_role_normalization,
    bench_credential_extraction
);
criterion_main!(benches);
