//! Underlying test runtimes and run reports.
//!
//! Both runtimes run registered tests strictly one after another. They
//! differ in when registration is allowed and in whether they expose
//! per-test sanitizer controls:
//!
//! | runtime  | registration                            | sanitize controls |
//! |----------|-----------------------------------------|-------------------|
//! | `Serial` | anywhere, even while the run is going   | yes               |
//! | `Flat`   | only inside a suite body, before the run| no                |

use super::context::{SanitizeFlags, StepResult};
use super::tree::{BoxedRun, Mode};
use crate::config::RuntimeKind;
use crate::i18n::Messages;
use crate::result::{panic_message, EnsayoError, EnsayoResult};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the runtime hands to a test when it runs it
#[derive(Debug, Clone, Default)]
pub struct NativeContext {
    sanitize: Option<Arc<Mutex<SanitizeFlags>>>,
    steps: Arc<Mutex<Vec<StepResult>>>,
}

impl NativeContext {
    /// Context exposing sanitize controls that start at `flags`
    #[must_use]
    pub fn with_sanitize(flags: SanitizeFlags) -> Self {
        Self {
            sanitize: Some(Arc::new(Mutex::new(flags))),
            steps: Arc::default(),
        }
    }

    /// Whether this runtime honours per-test sanitize flags
    #[must_use]
    pub fn exposes_sanitize(&self) -> bool {
        self.sanitize.is_some()
    }

    #[must_use]
    pub fn sanitize(&self) -> Option<SanitizeFlags> {
        self.sanitize.as_ref().map(|slot| *lock(slot))
    }

    /// Store final flags; ignored when no controls are exposed
    pub fn set_sanitize(&self, flags: SanitizeFlags) {
        if let Some(slot) = &self.sanitize {
            *lock(slot) = flags;
        }
    }

    pub fn record_steps(&self, steps: Vec<StepResult>) {
        lock(&self.steps).extend(steps);
    }

    #[must_use]
    pub fn steps(&self) -> Vec<StepResult> {
        lock(&self.steps).clone()
    }
}

/// Adapter closure the runtime invokes once per execution
pub type AdapterFn = Arc<dyn Fn(NativeContext) -> BoxedRun + Send + Sync>;

/// A test as the runtime sees it
#[derive(Clone)]
pub struct RegisteredTest {
    pub name: String,
    pub mode: Mode,
    /// Initial native sanitize flags
    pub sanitize: SanitizeFlags,
    pub run: AdapterFn,
}

impl fmt::Debug for RegisteredTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTest")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("sanitize", &self.sanitize)
            .finish_non_exhaustive()
    }
}

/// Work scheduled after the last test of a suite
#[derive(Clone)]
pub struct SuiteCompletion {
    /// `"<suite path> (afterAll)"`
    pub name: String,
    /// Whether any test of the suite's subtree ran
    pub active: Arc<dyn Fn() -> bool + Send + Sync>,
    pub run: AdapterFn,
}

impl fmt::Debug for SuiteCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteCompletion")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Name of the completion for a suite path
#[must_use]
pub fn completion_name(suite_path: &str) -> String {
    if suite_path.is_empty() {
        "(afterAll)".to_string()
    } else {
        format!("{suite_path} (afterAll)")
    }
}

/// Final state of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStatus {
    Passed,
    Failed,
    /// Marked skip
    Skipped,
    /// Excluded because other tests are marked only
    Filtered,
}

/// Result of running a single test or completion
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test name
    pub name: String,
    pub status: TestStatus,
    /// Error message if failed
    pub error: Option<String>,
    /// Test duration
    pub duration: Duration,
    /// Final native sanitize flags, when the runtime exposes them
    pub sanitize: Option<SanitizeFlags>,
    pub steps: Vec<StepResult>,
}

impl TestResult {
    fn not_run(name: String, status: TestStatus) -> Self {
        Self {
            name,
            status,
            error: None,
            duration: Duration::ZERO,
            sanitize: None,
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.status == TestStatus::Failed
    }
}

/// Results of one run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Test results in execution order
    pub tests: Vec<TestResult>,
    /// Suite completion results in execution order
    pub completions: Vec<TestResult>,
    /// Total duration
    pub duration: Duration,
}

impl RunReport {
    /// Check that no test or completion failed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.tests.iter().filter(|r| r.passed()).count()
    }

    /// Failed tests and completions
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failures().len()
    }

    /// Tests not run, whether skipped or filtered
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.tests
            .iter()
            .filter(|r| matches!(r.status, TestStatus::Skipped | TestStatus::Filtered))
            .count()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.tests.len()
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&TestResult> {
        self.tests
            .iter()
            .chain(&self.completions)
            .filter(|r| r.failed())
            .collect()
    }

    /// Find a test or completion by full name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TestResult> {
        self.tests
            .iter()
            .chain(&self.completions)
            .find(|r| r.name == name)
    }
}

/// An underlying test runtime
#[async_trait]
pub trait TestRuntime: Send + Sync + fmt::Debug {
    fn kind(&self) -> RuntimeKind;

    /// A suite body starts executing
    fn enter_suite(&self);

    /// A suite body finished, normally or not
    fn exit_suite(&self);

    fn register(&self, test: RegisteredTest) -> EnsayoResult<()>;

    fn register_completion(&self, completion: SuiteCompletion) -> EnsayoResult<()>;

    /// Run everything registered, in registration order
    async fn run(&self) -> RunReport;
}

#[derive(Debug)]
enum Item {
    Test(RegisteredTest),
    Completion(SuiteCompletion),
}

/// FIFO of registered work shared by both runtimes
#[derive(Debug, Default)]
struct Queue {
    items: Mutex<VecDeque<Item>>,
    started: AtomicBool,
}

impl Queue {
    fn push(&self, item: Item) {
        lock(&self.items).push_back(item);
    }

    fn pop(&self) -> Option<Item> {
        lock(&self.items).pop_front()
    }

    fn any_only(&self) -> bool {
        lock(&self.items)
            .iter()
            .any(|item| matches!(item, Item::Test(t) if t.mode == Mode::Only))
    }

    async fn run(&self, native_sanitize: bool) -> RunReport {
        self.started.store(true, Ordering::SeqCst);
        let start = Instant::now();
        let only = self.any_only();
        let mut report = RunReport::default();
        while let Some(item) = self.pop() {
            match item {
                Item::Test(test) => {
                    let result = run_test(test, only, native_sanitize).await;
                    report.tests.push(result);
                }
                Item::Completion(completion) => {
                    let result = run_completion(completion).await;
                    report.completions.push(result);
                }
            }
        }
        report.duration = start.elapsed();
        tracing::info!(
            passed = report.passed_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            "run finished"
        );
        report
    }
}

async fn invoke(name: String, run: &AdapterFn, native: NativeContext) -> TestResult {
    let start = Instant::now();
    let outcome = AssertUnwindSafe(run(native.clone())).catch_unwind().await;
    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(payload) => Some(EnsayoError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    };
    if let Some(e) = &error {
        tracing::debug!(test = %name, error = %e, "test failed");
    }
    TestResult {
        name,
        status: if error.is_some() {
            TestStatus::Failed
        } else {
            TestStatus::Passed
        },
        error: error.map(|e| e.to_string()),
        duration: start.elapsed(),
        sanitize: native.sanitize(),
        steps: native.steps(),
    }
}

async fn run_test(test: RegisteredTest, only: bool, native_sanitize: bool) -> TestResult {
    match test.mode {
        Mode::Skip => return TestResult::not_run(test.name, TestStatus::Skipped),
        Mode::Run if only => return TestResult::not_run(test.name, TestStatus::Filtered),
        _ => {}
    }
    let native = if native_sanitize {
        NativeContext::with_sanitize(test.sanitize)
    } else {
        NativeContext::default()
    };
    invoke(test.name, &test.run, native).await
}

async fn run_completion(completion: SuiteCompletion) -> TestResult {
    if !(completion.active)() {
        return TestResult::not_run(completion.name, TestStatus::Skipped);
    }
    invoke(completion.name, &completion.run, NativeContext::default()).await
}

/// Eager runtime: registration is accepted at any time and tests expose
/// native sanitize controls
#[derive(Debug, Default)]
pub struct SerialRuntime {
    queue: Queue,
}

impl SerialRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestRuntime for SerialRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Serial
    }

    fn enter_suite(&self) {}

    fn exit_suite(&self) {}

    fn register(&self, test: RegisteredTest) -> EnsayoResult<()> {
        tracing::trace!(test = %test.name, "registered");
        self.queue.push(Item::Test(test));
        Ok(())
    }

    fn register_completion(&self, completion: SuiteCompletion) -> EnsayoResult<()> {
        self.queue.push(Item::Completion(completion));
        Ok(())
    }

    async fn run(&self) -> RunReport {
        self.queue.run(true).await
    }
}

/// Deferred runtime: tests must be registered while a suite body is
/// executing and before the run starts
#[derive(Debug, Default)]
pub struct FlatRuntime {
    queue: Queue,
    depth: AtomicUsize,
}

impl FlatRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Suite bodies currently executing
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    fn check_open(&self, name: &str) -> EnsayoResult<()> {
        if self.queue.started.load(Ordering::SeqCst) {
            return Err(EnsayoError::config(
                Messages::current().registration_after_start(name),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TestRuntime for FlatRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Flat
    }

    fn enter_suite(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_suite(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
    }

    fn register(&self, test: RegisteredTest) -> EnsayoResult<()> {
        self.check_open(&test.name)?;
        if self.depth() == 0 {
            return Err(EnsayoError::config(
                Messages::current().registration_outside_suite(&test.name),
            ));
        }
        tracing::trace!(test = %test.name, "registered");
        self.queue.push(Item::Test(test));
        Ok(())
    }

    fn register_completion(&self, completion: SuiteCompletion) -> EnsayoResult<()> {
        self.check_open(&completion.name)?;
        self.queue.push(Item::Completion(completion));
        Ok(())
    }

    async fn run(&self) -> RunReport {
        self.queue.run(false).await
    }
}

/// Runtime for a [`RuntimeKind`]
#[must_use]
pub fn runtime_for(kind: RuntimeKind) -> Box<dyn TestRuntime> {
    match kind {
        RuntimeKind::Serial => Box::new(SerialRuntime::new()),
        RuntimeKind::Flat => Box::new(FlatRuntime::new()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test(
        name: &str,
        mode: Mode,
        run: impl Fn(NativeContext) -> BoxedRun + Send + Sync + 'static,
    ) -> RegisteredTest {
        RegisteredTest {
            name: name.to_string(),
            mode,
            sanitize: SanitizeFlags::default(),
            run: Arc::new(run),
        }
    }

    fn passing(name: &str) -> RegisteredTest {
        test(name, Mode::Run, |_| async { Ok(()) }.boxed())
    }

    mod serial_tests {
        use super::*;

        #[tokio::test]
        async fn test_runs_in_registration_order() {
            let runtime = SerialRuntime::new();
            runtime.register(passing("a")).unwrap();
            runtime
                .register(test("b", Mode::Run, |_| {
                    async { Err(EnsayoError::assertion("nope")) }.boxed()
                }))
                .unwrap();
            runtime.register(passing("c")).unwrap();

            let report = runtime.run().await;
            let names: Vec<_> = report.tests.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["a", "b", "c"]);
            assert_eq!(report.passed_count(), 2);
            assert_eq!(report.failed_count(), 1);
            assert!(report.get("b").unwrap().error.as_deref().unwrap().contains("nope"));
        }

        #[tokio::test]
        async fn test_native_sanitize_round_trip() {
            let runtime = SerialRuntime::new();
            runtime
                .register(test("flags", Mode::Run, |native| {
                    async move {
                        assert!(native.exposes_sanitize());
                        native.set_sanitize(SanitizeFlags::disabled());
                        Ok(())
                    }
                    .boxed()
                }))
                .unwrap();
            let report = runtime.run().await;
            assert_eq!(report.tests[0].sanitize, Some(SanitizeFlags::disabled()));
        }

        #[tokio::test]
        async fn test_panic_is_reported() {
            let runtime = SerialRuntime::new();
            runtime
                .register(test("boom", Mode::Run, |_| {
                    async {
                        if true {
                            panic!("kaboom");
                        }
                        Ok(())
                    }
                    .boxed()
                }))
                .unwrap();
            let report = runtime.run().await;
            let error = report.tests[0].error.as_deref().unwrap();
            assert!(error.contains("panicked"));
            assert!(error.contains("kaboom"));
        }

        #[tokio::test]
        async fn test_only_filters_and_skip_skips() {
            let runtime = SerialRuntime::new();
            runtime.register(passing("plain")).unwrap();
            runtime.register(test("focus", Mode::Only, |_| async { Ok(()) }.boxed())).unwrap();
            runtime.register(test("later", Mode::Skip, |_| async { Ok(()) }.boxed())).unwrap();

            let report = runtime.run().await;
            assert_eq!(report.get("plain").unwrap().status, TestStatus::Filtered);
            assert_eq!(report.get("focus").unwrap().status, TestStatus::Passed);
            assert_eq!(report.get("later").unwrap().status, TestStatus::Skipped);
            assert_eq!(report.skipped_count(), 2);
            assert!(report.all_passed());
        }

        #[tokio::test]
        async fn test_inactive_completion_is_skipped() {
            let runtime = SerialRuntime::new();
            runtime
                .register_completion(SuiteCompletion {
                    name: completion_name("s"),
                    active: Arc::new(|| false),
                    run: Arc::new(|_| async { Err(EnsayoError::assertion("ran")) }.boxed()),
                })
                .unwrap();
            let report = runtime.run().await;
            assert_eq!(report.completions[0].name, "s (afterAll)");
            assert_eq!(report.completions[0].status, TestStatus::Skipped);
        }
    }

    mod flat_tests {
        use super::*;

        #[test]
        fn test_registration_outside_suite_is_config_error() {
            let runtime = FlatRuntime::new();
            let err = runtime.register(passing("stray")).unwrap_err();
            assert!(matches!(err, EnsayoError::Config { .. }));
            assert!(err.to_string().contains("stray"));
        }

        #[test]
        fn test_depth_tracks_suite_bodies() {
            let runtime = FlatRuntime::new();
            runtime.enter_suite();
            runtime.enter_suite();
            runtime.exit_suite();
            assert_eq!(runtime.depth(), 1);
            runtime.register(passing("inside")).unwrap();
            runtime.exit_suite();
            runtime.exit_suite();
            assert_eq!(runtime.depth(), 0);
        }

        #[tokio::test]
        async fn test_registration_after_start_rejected() {
            let runtime = FlatRuntime::new();
            runtime.enter_suite();
            runtime.register(passing("a")).unwrap();
            let report = runtime.run().await;
            assert_eq!(report.tests[0].sanitize, None);

            let err = runtime.register(passing("late")).unwrap_err();
            assert!(matches!(err, EnsayoError::Config { .. }));
            assert!(err.to_string().contains("late"));
        }
    }

    #[test]
    fn test_runtime_for_kind() {
        assert_eq!(runtime_for(RuntimeKind::Flat).kind(), RuntimeKind::Flat);
        assert_eq!(runtime_for(RuntimeKind::Serial).kind(), RuntimeKind::Serial);
    }
}
