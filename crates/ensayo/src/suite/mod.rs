//! BDD suites: `describe`/`it` registration, hooks, sanitizer resolution and
//! the per-test invocation sequence.
//!
//! ```text
//! Ensayo::describe ─▶ SuiteTree ─▶ TestRuntime (serial | flat)
//!                                        │ run
//!                                        ▼
//!                         orchestrator: beforeAll → beforeEach → browser
//!                                       → body → detach → afterEach
//! ```

pub mod context;
mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod tree;

pub use context::{SanitizeFlags, SanitizeOverrides, StepResult, TestContext};
pub use orchestrator::DEFAULT_ORIGIN;
pub use registry::Ensayo;
pub use runtime::{
    completion_name, runtime_for, FlatRuntime, NativeContext, RegisteredTest, RunReport,
    SerialRuntime, SuiteCompletion, TestResult, TestRuntime, TestStatus,
};
pub use tree::{
    BodyFn, BoxedRun, Hook, HookKind, HookOptions, Mode, SuiteHooks, SuiteId, SuiteOptions,
    TestId, TestOptions, PATH_SEPARATOR,
};
