//! Matcher Operations Benchmarks
//!
//! Benchmarks for deep equality, subset matching and URL pattern checks.
//!
//! Run with: `cargo bench --bench matcher_ops`

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ensayo::matcher::{equal, matches_object, strict_equal};
use ensayo::mock::UrlPattern;
use ensayo::prelude::*;
use serde_json::json;

fn nested(depth: usize) -> Value {
    let mut value = json!({"leaf": [1, 2, 3], "name": "node"});
    for level in 0..depth {
        value = json!({"level": level, "child": value, "tags": ["a", "b"]});
    }
    Value::from(value)
}

fn bench_deep_equality(c: &mut Criterion) {
    let mut group = c.benchmark_group("deep_equality");

    for depth in [1, 4, 16] {
        let a = nested(depth);
        let b = nested(depth);
        group.bench_with_input(BenchmarkId::new("equal", depth), &depth, |bench, _| {
            bench.iter(|| black_box(equal(black_box(&a), black_box(&b))));
        });
        group.bench_with_input(BenchmarkId::new("strict_equal", depth), &depth, |bench, _| {
            bench.iter(|| black_box(strict_equal(black_box(&a), black_box(&b))));
        });
    }

    group.finish();
}

fn bench_match_object(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_object");

    let actual = Value::from(json!({
        "id": 42,
        "user": {"name": "ana", "roles": ["admin", "dev"], "active": true},
        "meta": {"created": "2024-01-01", "tags": ["x", "y", "z"]}
    }));
    let subsets = vec![
        ("flat", json!({"id": 42})),
        ("nested", json!({"user": {"name": "ana"}})),
        ("array", json!({"meta": {"tags": ["x", "y", "z"]}})),
    ];

    for (name, subset) in subsets {
        let subset = Value::from(subset);
        group.bench_with_input(BenchmarkId::from_parameter(name), &subset, |bench, subset| {
            bench.iter(|| black_box(matches_object(black_box(&actual), black_box(subset))));
        });
    }

    group.finish();
}

fn bench_expect(c: &mut Criterion) {
    c.bench_function("expect_to_equal", |bench| {
        bench.iter(|| {
            expect(black_box(vec![1, 2, 3]))
                .to_equal(black_box(vec![1, 2, 3]))
                .unwrap();
        });
    });
}

fn bench_url_patterns(c: &mut Criterion) {
    let mut group = c.benchmark_group("url_pattern");

    let url = "https://api.example.com/v1/users/42/orders";
    let patterns = vec![
        ("exact", UrlPattern::from(url)),
        ("glob", UrlPattern::from("https://api.example.com/*/users/*/orders")),
        ("prefix", UrlPattern::Prefix("https://api.example.com/".to_string())),
        ("regex", UrlPattern::Regex(r"/users/\d+/orders$".to_string())),
    ];

    for (name, pattern) in patterns {
        group.bench_with_input(BenchmarkId::from_parameter(name), &pattern, |bench, pattern| {
            bench.iter(|| black_box(pattern.matches(black_box(url))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_deep_equality,
    bench_match_object,
    bench_expect,
    bench_url_patterns
);
criterion_main!(benches);
