//! Ensayo: BDD test suites for Rust
//!
//! Ensayo (Spanish: "rehearsal") provides `describe`/`it` suites with
//! lifecycle hooks, an `expect()` matcher surface, function and fetch mocks,
//! value snapshots, micro-benchmarks and browser-backed integration tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ENSAYO Architecture                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ describe / │    │ Test       │    │ Browser    │            │
//! │   │ it / hooks │───►│ Runtime    │───►│ Session    │            │
//! │   │ (Ensayo)   │    │ + invoke   │    │ Manager    │            │
//! │   └────────────┘    └────────────┘    └────────────┘            │
//! │         │                 │                 │                   │
//! │         ▼                 ▼                 ▼                   │
//! │   expect / mocks     RunReport      Chromium + esbuild          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ensayo::prelude::*;
//!
//! # async fn demo() -> ensayo::EnsayoResult<()> {
//! let suite = Ensayo::new();
//! suite.describe("strings", |s| {
//!     s.it("compares deeply", |_ctx| async {
//!         expect(vec![1, 2]).to_equal(vec![1, 2])
//!     })
//! })?;
//! let report = suite.run().await;
//! assert!(report.all_passed());
//! # Ok(())
//! # }
//! ```

// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

pub mod bench;
pub mod browser;
pub mod config;
pub mod i18n;
pub mod logging;
pub mod matcher;
pub mod mock;
pub mod result;
pub mod snapshot;
pub mod suite;

pub use config::{EnsayoConfig, RuntimeKind};
pub use matcher::{expect, expect_fn, Expect, ExpectFn, Value};
pub use mock::{fetch, mock_fetch};
pub use result::{EnsayoError, EnsayoResult};
pub use suite::{Ensayo, RunReport, TestContext};

/// Everything a test file usually needs
pub mod prelude {
    pub use super::bench::{bench, bench_async, BenchOptions, BenchReport};
    pub use super::browser::{BrowserHandle, BrowserOptions, OnSetupError};
    pub use super::config::{EnsayoConfig, RuntimeKind};
    pub use super::matcher::{
        assert_deep_equal, assert_equals, assert_not_equals, assert_strict_equals, expect,
        expect_fn, Value,
    };
    pub use super::mock::{
        create_cookie_document, expect_mock, fetch, fn_mock, mock_fetch, spy, FetchRequest,
        FetchResponse, MockFetchOptions, MockResponse, UrlPattern,
    };
    pub use super::result::{EnsayoError, EnsayoResult};
    pub use super::snapshot::SnapshotStore;
    pub use super::suite::{
        Ensayo, HookOptions, RunReport, SanitizeFlags, SuiteOptions, TestContext, TestOptions,
        TestStatus,
    };
}
