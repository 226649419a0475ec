//! Execution context handed to hooks and test bodies.

use crate::browser::BrowserHandle;
use crate::result::{panic_message, EnsayoError, EnsayoResult};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Final sanitizer settings of a test invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SanitizeFlags {
    pub ops: bool,
    pub resources: bool,
    pub exit: bool,
}

impl Default for SanitizeFlags {
    fn default() -> Self {
        Self {
            ops: true,
            resources: true,
            exit: true,
        }
    }
}

impl SanitizeFlags {
    /// All sanitizers off
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            ops: false,
            resources: false,
            exit: false,
        }
    }
}

/// Optional sanitizer settings; `None` defers to the enclosing scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SanitizeOverrides {
    pub ops: Option<bool>,
    pub resources: Option<bool>,
    pub exit: Option<bool>,
}

impl SanitizeOverrides {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ops.is_none() && self.resources.is_none() && self.exit.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Flag {
    value: bool,
    explicit: bool,
}

impl Flag {
    const fn base(value: bool) -> Self {
        Self {
            value,
            explicit: false,
        }
    }

    fn set(&mut self, value: bool) {
        self.value = value;
        self.explicit = true;
    }

    fn adopt(&mut self, other: Self) {
        if other.explicit {
            *self = other;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FlagSet {
    ops: Flag,
    resources: Flag,
    exit: Flag,
}

impl FlagSet {
    const fn base(flags: SanitizeFlags) -> Self {
        Self {
            ops: Flag::base(flags.ops),
            resources: Flag::base(flags.resources),
            exit: Flag::base(flags.exit),
        }
    }

    const fn values(&self) -> SanitizeFlags {
        SanitizeFlags {
            ops: self.ops.value,
            resources: self.resources.value,
            exit: self.exit.value,
        }
    }
}

/// Outcome of one [`TestContext::step`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

#[derive(Debug)]
struct ContextState {
    name: String,
    origin: String,
    invocation: Uuid,
    flags: Mutex<FlagSet>,
    browser: Mutex<Option<BrowserHandle>>,
    setup_error: Mutex<Option<Arc<EnsayoError>>>,
    steps: Mutex<Vec<StepResult>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-invocation context for a hook, test body or step.
///
/// Clones share state, so flag changes made by a hook are visible to the
/// orchestrator once the hook returns.
#[derive(Debug, Clone)]
pub struct TestContext {
    state: Arc<ContextState>,
}

impl TestContext {
    /// Context with non-explicit base flags
    #[must_use]
    pub fn new(name: impl Into<String>, origin: impl Into<String>, flags: SanitizeFlags) -> Self {
        Self::with_invocation(name, origin, Uuid::new_v4(), FlagSet::base(flags))
    }

    fn with_invocation(
        name: impl Into<String>,
        origin: impl Into<String>,
        invocation: Uuid,
        flags: FlagSet,
    ) -> Self {
        Self {
            state: Arc::new(ContextState {
                name: name.into(),
                origin: origin.into(),
                invocation,
                flags: Mutex::new(flags),
                browser: Mutex::new(None),
                setup_error: Mutex::new(None),
                steps: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fresh context for the same invocation, starting from `flags`
    #[must_use]
    pub(crate) fn scoped(&self, name: impl Into<String>, flags: SanitizeFlags) -> Self {
        Self::with_invocation(
            name,
            self.origin(),
            self.state.invocation,
            FlagSet::base(flags),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.state.origin
    }

    /// Identifier shared by every context of one test invocation
    #[must_use]
    pub fn invocation_id(&self) -> Uuid {
        self.state.invocation
    }

    #[must_use]
    pub fn sanitize(&self) -> SanitizeFlags {
        lock(&self.state.flags).values()
    }

    #[must_use]
    pub fn sanitize_ops(&self) -> bool {
        self.sanitize().ops
    }

    #[must_use]
    pub fn sanitize_resources(&self) -> bool {
        self.sanitize().resources
    }

    #[must_use]
    pub fn sanitize_exit(&self) -> bool {
        self.sanitize().exit
    }

    pub fn set_sanitize_ops(&self, value: bool) {
        lock(&self.state.flags).ops.set(value);
    }

    pub fn set_sanitize_resources(&self, value: bool) {
        lock(&self.state.flags).resources.set(value);
    }

    pub fn set_sanitize_exit(&self, value: bool) {
        lock(&self.state.flags).exit.set(value);
    }

    /// Apply explicit overrides
    pub(crate) fn apply(&self, overrides: &SanitizeOverrides) {
        let mut flags = lock(&self.state.flags);
        if let Some(value) = overrides.ops {
            flags.ops.set(value);
        }
        if let Some(value) = overrides.resources {
            flags.resources.set(value);
        }
        if let Some(value) = overrides.exit {
            flags.exit.set(value);
        }
    }

    /// Take over the flags `other` set explicitly
    pub(crate) fn adopt(&self, other: &Self) {
        let theirs = *lock(&other.state.flags);
        let mut flags = lock(&self.state.flags);
        flags.ops.adopt(theirs.ops);
        flags.resources.adopt(theirs.resources);
        flags.exit.adopt(theirs.exit);
    }

    /// Browser automation holds resources the sanitizers cannot see
    pub(crate) fn disable_resource_sanitizers(&self) {
        let mut flags = lock(&self.state.flags);
        flags.ops.set(false);
        flags.resources.set(false);
    }

    /// Browser context attached to this invocation
    #[must_use]
    pub fn browser(&self) -> Option<BrowserHandle> {
        lock(&self.state.browser).clone()
    }

    pub(crate) fn set_browser(&self, browser: Option<BrowserHandle>) {
        *lock(&self.state.browser) = browser;
    }

    /// Browser setup failure captured under [`OnSetupError::Pass`](crate::browser::OnSetupError::Pass)
    #[must_use]
    pub fn setup_error(&self) -> Option<Arc<EnsayoError>> {
        lock(&self.state.setup_error).clone()
    }

    pub(crate) fn set_setup_error(&self, error: EnsayoError) {
        *lock(&self.state.setup_error) = Some(Arc::new(error));
    }

    /// Steps run so far, in order
    #[must_use]
    pub fn steps(&self) -> Vec<StepResult> {
        lock(&self.state.steps).clone()
    }

    /// Run a named sub-step with its own context.
    ///
    /// The step inherits this context's flags and browser; its result is
    /// recorded and returned. A panic inside the step is reported as a
    /// failed step.
    pub async fn step<F, Fut>(&self, name: &str, f: F) -> EnsayoResult<()>
    where
        F: FnOnce(TestContext) -> Fut,
        Fut: Future<Output = EnsayoResult<()>>,
    {
        let flags = *lock(&self.state.flags);
        let child = Self::with_invocation(
            format!("{} > {name}", self.name()),
            self.origin(),
            self.state.invocation,
            flags,
        );
        child.set_browser(self.browser());

        let start = Instant::now();
        let result = match AssertUnwindSafe(f(child)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(EnsayoError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        };
        lock(&self.state.steps).push(StepResult {
            name: name.to_string(),
            passed: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
            duration: start.elapsed(),
        });
        tracing::debug!(test = self.name(), step = name, passed = result.is_ok(), "step finished");
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn context() -> TestContext {
        TestContext::new("adds", "tests/math.rs", SanitizeFlags::default())
    }

    mod flag_tests {
        use super::*;

        #[test]
        fn test_base_flags_are_not_explicit() {
            let ctx = context();
            let other = ctx.scoped("beforeEach", SanitizeFlags::disabled());
            ctx.adopt(&other);
            assert_eq!(ctx.sanitize(), SanitizeFlags::default());
        }

        #[test]
        fn test_explicit_flags_are_adopted() {
            let ctx = context();
            let hook = ctx.scoped("beforeEach", SanitizeFlags::default());
            hook.apply(&SanitizeOverrides {
                ops: Some(false),
                ..SanitizeOverrides::default()
            });
            hook.set_sanitize_exit(false);
            ctx.adopt(&hook);
            assert_eq!(
                ctx.sanitize(),
                SanitizeFlags {
                    ops: false,
                    resources: true,
                    exit: false,
                }
            );
        }

        #[test]
        fn test_disable_resource_sanitizers_wins() {
            let ctx = context();
            ctx.set_sanitize_ops(true);
            ctx.disable_resource_sanitizers();
            assert!(!ctx.sanitize_ops());
            assert!(!ctx.sanitize_resources());
            assert!(ctx.sanitize_exit());
        }

        #[test]
        fn test_scoped_shares_invocation() {
            let ctx = context();
            let hook = ctx.scoped("afterEach", SanitizeFlags::default());
            assert_eq!(hook.invocation_id(), ctx.invocation_id());
            assert_eq!(hook.origin(), "tests/math.rs");
            assert_eq!(hook.name(), "afterEach");
        }
    }

    mod step_tests {
        use super::*;

        #[tokio::test]
        async fn test_steps_are_recorded() {
            let ctx = context();
            ctx.step("first", |step| async move {
                assert_eq!(step.name(), "adds > first");
                Ok(())
            })
            .await
            .unwrap();
            let err = ctx
                .step("second", |_| async { Err(EnsayoError::assertion("nope")) })
                .await
                .unwrap_err();
            assert!(err.to_string().contains("nope"));

            let steps = ctx.steps();
            assert_eq!(steps.len(), 2);
            assert!(steps[0].passed);
            assert!(!steps[1].passed);
            assert!(steps[1].error.as_deref().unwrap().contains("nope"));
        }

        #[tokio::test]
        async fn test_step_inherits_flags() {
            let ctx = context();
            ctx.set_sanitize_resources(false);
            ctx.step("nested", |step| async move {
                assert!(!step.sanitize_resources());
                step.set_sanitize_ops(false);
                Ok(())
            })
            .await
            .unwrap();
            assert!(ctx.sanitize_ops());
        }

        async fn explode(_ctx: TestContext) -> EnsayoResult<()> {
            panic!("step exploded")
        }

        #[tokio::test]
        async fn test_step_panic_is_failure() {
            let ctx = context();
            let err = ctx.step("boom", explode).await.unwrap_err();
            assert!(matches!(err, EnsayoError::Panicked { .. }));
            assert!(!ctx.steps()[0].passed);
        }
    }

    #[test]
    fn test_setup_error_slot() {
        let ctx = context();
        assert!(ctx.setup_error().is_none());
        ctx.set_setup_error(EnsayoError::BrowserNotFound);
        assert!(matches!(
            ctx.setup_error().as_deref(),
            Some(EnsayoError::BrowserNotFound)
        ));
    }
}
