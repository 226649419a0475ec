//! Matchers, mocks, snapshots and benchmarks used from inside suites.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use ensayo::matcher::{equal, same_value, strict_equal};
use ensayo::prelude::*;
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn serial() -> Ensayo {
    Ensayo::from_config(EnsayoConfig::new())
}

// ============================================================================
// expect() inside suites
// ============================================================================

#[tokio::test]
async fn test_matchers_decide_test_outcome() {
    let suite = serial();
    suite
        .describe("expect", |s| {
            s.it("deep equality", |_| async {
                expect(json!({"user": {"id": 7, "tags": ["a", "b"]}}))
                    .to_equal(json!({"user": {"tags": ["a", "b"], "id": 7}}))?;
                expect(vec![1, 2, 3]).to_contain(2)?;
                expect("hello world").to_match("^hello")?;
                expect(0.1 + 0.2).to_be_close_to(0.3, 5)?;
                expect(json!({"a": {"b": 1}})).to_have_property_value("a.b", 1)
            })?;
            s.it("negation", |_| async {
                expect(1).not().to_be(2)?;
                expect(Value::Undefined).not().to_be_defined()?;
                expect(f64::NAN).to_be_nan()
            })?;
            s.it("mismatch fails", |_| async {
                expect(json!({"status": "open"})).to_match_object(json!({"status": "closed"}))
            })?;
            s.it("thrown errors", |_| async {
                expect_fn(|| Err::<(), _>(EnsayoError::config("bad input")))
                    .to_throw_message("bad input")?;
                expect_fn(|| ()).not().to_throw()
            })
        })
        .unwrap();

    let report = suite.run().await;
    assert_eq!(report.passed_count(), 3, "{:?}", report.failures());
    let mismatch = report.get("expect > mismatch fails").unwrap();
    assert!(mismatch
        .error
        .as_deref()
        .unwrap()
        .starts_with("Assertion failed"));
}

#[tokio::test]
async fn test_snapshots_through_registry_config() {
    let dir = TempDir::new().unwrap();
    let config = EnsayoConfig::new().with_snapshot_dir(dir.path());
    let suite = Ensayo::from_config(config.clone());
    let store = suite.snapshots();

    let value = json!({"items": [1, 2], "total": 3});
    let first = expect(value.clone()).to_match_snapshot(&store, "cart total").unwrap();
    let second = expect(value).to_match_snapshot(&store, "cart total").unwrap();
    assert_ne!(first, second);

    let err = expect(json!({"items": [], "total": 0}))
        .to_match_snapshot(&store, "cart total")
        .unwrap_err();
    assert!(matches!(err, EnsayoError::SnapshotMismatch { .. }));

    let updating = SnapshotStore::from_config(&config.with_update_snapshots(true));
    expect(json!({"items": [], "total": 0}))
        .to_match_snapshot(&updating, "cart total")
        .unwrap();
    expect(json!({"items": [], "total": 0}))
        .to_match_snapshot(&store, "cart total")
        .unwrap();
}

// ============================================================================
// Function mocks and cookies
// ============================================================================

#[tokio::test]
async fn test_function_mocks_across_hooks() {
    let suite = serial();
    let notify = fn_mock::<String, bool>();
    notify.mock_return_value(true);
    let hook_mock = notify.clone();
    let body_mock = notify.clone();
    suite
        .describe("notifications", move |s| {
            s.before_each(move |_| {
                hook_mock.reset();
                async { Ok(()) }
            });
            s.it("sends once", move |_| {
                let notify = body_mock.clone();
                async move {
                    expect(notify.call("welcome".to_string())).to_be(true)?;
                    let check = expect_mock(&notify);
                    check.to_have_been_called_times(1)?;
                    check.to_have_been_called_with("welcome")?;
                    check.to_have_returned_with(true)
                }
            })
        })
        .unwrap();

    let report = suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
    assert_eq!(notify.call_count(), 1);
}

#[test]
fn test_spy_records_and_delegates() {
    let double = spy(|n: i32| n * 2);
    assert_eq!(double.call(4), 8);
    assert_eq!(double.call(5), 10);
    let check = expect_mock(&double);
    check.to_have_been_nth_called_with(2, 5).unwrap();
    check.to_have_last_returned_with(10).unwrap();
    check.not().to_have_been_called_with(6).unwrap();
}

#[test]
fn test_cookie_document_accumulates() {
    let document = create_cookie_document();
    document.set_cookie("session=abc; Path=/; HttpOnly");
    document.set_cookie("theme=dark");
    document.set_cookie("session=def");
    assert_eq!(document.cookie(), "session=def; theme=dark");

    document.set_cookie("theme=; Max-Age=0");
    assert_eq!(document.cookie(), "session=def");
    assert!(document.get("theme").is_none());
}

// ============================================================================
// Benchmarks
// ============================================================================

#[tokio::test]
async fn test_bench_inside_a_test() {
    let suite = serial();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    suite
        .it("measures", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                let report = bench("sum", BenchOptions::new(10).with_warmup(2), || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })?;
                expect(report.iterations).to_be(10)?;
                expect(report.stats.count).to_be(10)
            }
        })
        .unwrap();

    let report = suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
    assert_eq!(calls.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn test_bench_async_rejects_zero_iterations() {
    let err = bench_async("noop", BenchOptions::new(0), || async {})
        .await
        .unwrap_err();
    assert!(matches!(err, EnsayoError::Config { .. }));
}

// ============================================================================
// Equality properties
// ============================================================================

fn json_leaf() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::Bool),
        (-1_000_i64..1_000).prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(serde_json::Value::String),
    ]
}

fn json_tree() -> impl Strategy<Value = serde_json::Value> {
    json_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    /// Every value equals itself under each equality flavor.
    #[test]
    fn prop_equality_is_reflexive(raw in json_tree()) {
        let value = Value::from(raw);
        prop_assert!(equal(&value, &value));
        prop_assert!(strict_equal(&value, &value));
        prop_assert!(same_value(&value, &value));
    }

    /// Deep equality does not depend on argument order.
    #[test]
    fn prop_equality_is_symmetric(a in json_tree(), b in json_tree()) {
        let (a, b) = (Value::from(a), Value::from(b));
        prop_assert_eq!(equal(&a, &b), equal(&b, &a));
    }

    /// `not()` inverts every outcome.
    #[test]
    fn prop_negation_inverts(a in json_tree(), b in json_tree()) {
        let direct = expect(a.clone()).to_equal(b.clone()).is_ok();
        let negated = expect(a).not().to_equal(b).is_ok();
        prop_assert_ne!(direct, negated);
    }
}
