//! Browser-enabled suites driven through the mock launcher and bundler.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use ensayo::browser::{
    BrowserSessionManager, Bundler, MockBrowserLog, MockBundler, MockLauncher, MockPageBehavior,
};
use ensayo::prelude::*;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    suite: Ensayo,
    log: Arc<MockBrowserLog>,
    bundler: Arc<MockBundler>,
    entry: PathBuf,
    _dir: TempDir,
}

fn fixture(behavior: MockPageBehavior) -> Fixture {
    let dir = TempDir::new().unwrap();
    let entry = dir.path().join("app.js");
    std::fs::write(&entry, "export const answer = 42;").unwrap();

    let launcher = MockLauncher::with_behavior(behavior);
    let log = launcher.log();
    let bundler = Arc::new(MockBundler::new("window.testReady = true;"));
    let manager = BrowserSessionManager::new(
        Arc::new(launcher),
        Arc::clone(&bundler) as Arc<dyn Bundler>,
    )
    .with_global_retry(20);
    Fixture {
        suite: Ensayo::with_browsers(EnsayoConfig::new(), manager),
        log,
        bundler,
        entry,
        _dir: dir,
    }
}

fn browser(entry: &PathBuf) -> BrowserOptions {
    BrowserOptions::new()
        .with_entry_point(entry.clone())
        .with_ready_timeout(50)
}

#[tokio::test]
async fn test_suite_reuses_one_process_and_closes_it_on_completion() {
    let fx = fixture(MockPageBehavior::new());
    fx.suite
        .describe_with(
            "app",
            SuiteOptions::new().with_browser(browser(&fx.entry)),
            |s| {
                s.it("first", |ctx| async move {
                    expect(ctx.browser().is_some()).to_be(true)
                })?;
                s.it("second", |ctx| async move {
                    let page = ctx.browser().unwrap();
                    expect(page.html_path().is_some()).to_be(true)
                })
            },
        )
        .unwrap();

    let report = fx.suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
    assert_eq!(fx.log.launches(), 1);
    assert_eq!(fx.log.pages_opened(), 2);
    assert_eq!(fx.log.pages_closed(), 2);
    assert_eq!(fx.log.processes_closed(), 1);
    assert_eq!(fx.bundler.builds(), 1);
    assert_eq!(fx.log.navigations().len(), 2);
    assert!(fx.log.navigations()[0].starts_with("file://"));
    assert_eq!(report.completions[0].name, "app (afterAll)");
    assert!(fx.suite.browsers().cached_paths().is_empty());
}

#[tokio::test]
async fn test_browser_closed_by_a_test_is_relaunched_for_the_next() {
    let fx = fixture(MockPageBehavior::new());
    fx.suite
        .describe_with(
            "app",
            SuiteOptions::new().with_browser(browser(&fx.entry)),
            |s| {
                s.it("closes its browser", |ctx| async move {
                    let page = ctx.browser().unwrap();
                    page.close().await?;
                    expect(page.is_closed()).to_be(true)
                })?;
                s.it("gets a live browser", |ctx| async move {
                    let page = ctx.browser().unwrap();
                    expect(page.is_closed()).to_be(false)?;
                    expect(page.html_path().is_some()).to_be(true)
                })
            },
        )
        .unwrap();

    let report = fx.suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
    assert_eq!(fx.log.launches(), 2);
    assert_eq!(fx.log.processes_closed(), 2);
    assert!(fx.suite.browsers().cached_paths().is_empty());
}

#[tokio::test]
async fn test_browser_tests_disable_resource_sanitizers() {
    let fx = fixture(MockPageBehavior::new());
    fx.suite
        .describe_with(
            "sanitized",
            SuiteOptions::new()
                .with_browser(browser(&fx.entry))
                .with_sanitize_ops(true),
            |s| {
                s.it("forced off", |ctx| async move {
                    ctx.set_sanitize_resources(true);
                    expect(ctx.sanitize_ops()).to_be(false)
                })
            },
        )
        .unwrap();

    let report = fx.suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
    assert_eq!(
        report.get("sanitized > forced off").unwrap().sanitize,
        Some(SanitizeFlags {
            ops: false,
            resources: false,
            exit: true,
        })
    );
}

#[tokio::test]
async fn test_reuse_disabled_launches_per_test() {
    let fx = fixture(MockPageBehavior::new());
    fx.suite
        .describe_with(
            "fresh",
            SuiteOptions::new().with_browser(browser(&fx.entry).with_reuse(false)),
            |s| {
                s.it("one", |_| async { Ok(()) })?;
                s.it("two", |_| async { Ok(()) })
            },
        )
        .unwrap();

    let report = fx.suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
    assert_eq!(fx.log.launches(), 2);
    assert_eq!(fx.log.processes_closed(), 2);
}

#[tokio::test]
async fn test_root_level_browser_test_owns_its_process() {
    let fx = fixture(MockPageBehavior::new());
    fx.suite
        .it_with(
            "standalone",
            TestOptions::new().with_browser(BrowserOptions::new()),
            |ctx| async move {
                let page = ctx.browser().unwrap();
                expect(page.is_closed()).to_be(false)
            },
        )
        .unwrap();

    let report = fx.suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
    assert_eq!(fx.log.launches(), 1);
    assert_eq!(fx.log.processes_closed(), 1);
    assert!(report.completions.is_empty());
    assert_eq!(fx.bundler.builds(), 0);
}

#[tokio::test]
async fn test_disabled_browser_options_attach_nothing() {
    let fx = fixture(MockPageBehavior::new());
    fx.suite
        .it_with(
            "plain",
            TestOptions::new().with_browser(BrowserOptions::disabled()),
            |ctx| async move {
                expect(ctx.browser().is_none()).to_be(true)?;
                expect(ctx.sanitize_ops()).to_be(true)
            },
        )
        .unwrap();

    let report = fx.suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
    assert_eq!(fx.log.launches(), 0);
}

#[tokio::test]
async fn test_evaluate_through_context() {
    let fx = fixture(MockPageBehavior::new().with_response("window.answer", json!(42)));
    fx.suite
        .describe_with(
            "eval",
            SuiteOptions::new().with_browser(browser(&fx.entry)),
            |s| {
                s.it("reads globals", |ctx| async move {
                    let page = ctx.browser().unwrap();
                    let answer: i64 = page.evaluate_as("window.answer").await?;
                    expect(answer).to_be(42)
                })
            },
        )
        .unwrap();

    let report = fx.suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
}

// ============================================================================
// Setup failures
// ============================================================================

#[tokio::test]
async fn test_setup_failure_throws_by_default() {
    let fx = fixture(MockPageBehavior::new().with_failed_launch());
    fx.suite
        .describe_with(
            "broken",
            SuiteOptions::new().with_browser(browser(&fx.entry)),
            |s| s.it("never sees a page", |_| async { Ok(()) }),
        )
        .unwrap();

    let report = fx.suite.run().await;
    let result = report.get("broken > never sees a page").unwrap();
    assert!(result.failed());
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("Failed to launch browser"));
}

#[tokio::test]
async fn test_setup_failure_passed_to_test() {
    let fx = fixture(MockPageBehavior::new().with_failed_launch());
    fx.suite
        .describe_with(
            "tolerant",
            SuiteOptions::new()
                .with_browser(browser(&fx.entry).with_on_setup_error(OnSetupError::Pass)),
            |s| {
                s.it("inspects the error", |ctx| async move {
                    expect(ctx.browser().is_none()).to_be(true)?;
                    let error = ctx.setup_error().unwrap();
                    expect(error.to_string()).to_match("launch")
                })
            },
        )
        .unwrap();

    let report = fx.suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
    assert_eq!(
        report.get("tolerant > inspects the error").unwrap().sanitize,
        Some(SanitizeFlags {
            ops: false,
            resources: false,
            exit: true,
        })
    );
}

#[tokio::test]
async fn test_page_that_never_signals_ready_fails_setup() {
    let fx = fixture(
        MockPageBehavior::new()
            .with_ready(false)
            .with_console_error("ReferenceError: App is not defined"),
    );
    fx.suite
        .describe_with(
            "stuck",
            SuiteOptions::new().with_browser(browser(&fx.entry).with_global_name("App")),
            |s| s.it("waits", |_| async { Ok(()) }),
        )
        .unwrap();

    let report = fx.suite.run().await;
    let message = report.get("stuck > waits").unwrap().error.clone().unwrap();
    assert!(message.starts_with("Browser setup failed"), "{message}");
    assert!(message.contains("ReferenceError: App is not defined"));
    assert_eq!(fx.log.processes_closed(), 1);
}

#[tokio::test]
async fn test_defined_global_counts_as_ready() {
    let fx = fixture(MockPageBehavior::new().with_ready(false).with_global("App"));
    fx.suite
        .describe_with(
            "global",
            SuiteOptions::new().with_browser(browser(&fx.entry).with_global_name("App")),
            |s| s.it("loads", |_| async { Ok(()) }),
        )
        .unwrap();

    let report = fx.suite.run().await;
    assert!(report.all_passed(), "{:?}", report.failures());
}

#[tokio::test]
async fn test_navigation_failure_closes_fresh_process() {
    let fx = fixture(MockPageBehavior::new().with_failed_navigation());
    fx.suite
        .describe_with(
            "offline",
            SuiteOptions::new().with_browser(browser(&fx.entry)),
            |s| s.it("loads", |_| async { Ok(()) }),
        )
        .unwrap();

    let report = fx.suite.run().await;
    let message = report.get("offline > loads").unwrap().error.clone().unwrap();
    assert!(message.contains("Navigation to file://"), "{message}");
    assert_eq!(fx.log.launches(), 1);
    assert_eq!(fx.log.processes_closed(), 1);
    assert!(fx.suite.browsers().cached_paths().is_empty());
}
