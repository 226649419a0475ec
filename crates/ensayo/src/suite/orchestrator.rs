//! The per-invocation sequence run by every registered test.
//!
//! ```text
//! 1. ancestors root → leaf
//! 2. beforeAll once per suite (flag set only on success)
//! 3. beforeEach root → leaf, each with a scoped context
//! 4. test context adopts explicit flags from step 3
//! 5. browser attach (Throw | Pass), sanitizers off
//! 6. body, raced against the timeout; flags go back to the runtime
//! 7. detach, then afterEach leaf → root
//! 8. body error first, afterEach errors attached
//! ```

use super::context::{SanitizeFlags, TestContext};
use super::registry::Registry;
use super::runtime::{completion_name, NativeContext};
use super::tree::{BodyFn, Hook, HookKind, SuiteId, TestId};
use crate::browser::{BrowserOptions, OnSetupError};
use crate::result::{panic_message, EnsayoError, EnsayoResult};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::Instrument;

/// Origin tag used when none is configured
pub const DEFAULT_ORIGIN: &str = "ensayo";

/// Hooks of one ancestor suite
#[derive(Debug)]
struct Level {
    id: SuiteId,
    path: String,
    before_all: Option<Hook>,
    before_each: Option<Hook>,
    after_each: Option<Hook>,
}

/// Everything an invocation needs, captured up front
struct Plan {
    name: String,
    suite: SuiteId,
    suite_path: String,
    levels: Vec<Level>,
    body: BodyFn,
    flags: SanitizeFlags,
    browser: Option<BrowserOptions>,
    timeout_ms: Option<u64>,
}

fn hook_error(kind: HookKind, suite: &str, error: &EnsayoError) -> EnsayoError {
    EnsayoError::Hook {
        kind: kind.to_string(),
        suite: if suite.is_empty() {
            "(root)".to_string()
        } else {
            suite.to_string()
        },
        message: error.to_string(),
    }
}

/// Attach cleanup failures to the error that decided the outcome
fn with_cleanup(primary: EnsayoError, cleanup: Vec<EnsayoError>) -> EnsayoError {
    if cleanup.is_empty() {
        return primary;
    }
    EnsayoError::WithCleanupFailures {
        source: Box::new(primary),
        cleanup: cleanup.iter().map(ToString::to_string).collect(),
    }
}

async fn run_hook(hook: &Hook, kind: HookKind, suite: &str, ctx: TestContext) -> EnsayoResult<()> {
    ctx.apply(&hook.options().sanitize);
    let result = match AssertUnwindSafe(hook.call(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(EnsayoError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    };
    result.map_err(|e| hook_error(kind, suite, &e))
}

impl Registry {
    fn origin(&self) -> String {
        self.config
            .origin
            .clone()
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string())
    }

    fn plan(&self, test: TestId) -> Plan {
        let state = self.state();
        let tree = &state.tree;
        let entry = tree.test(test);
        let levels = tree
            .ancestors(entry.suite)
            .into_iter()
            .map(|id| {
                let node = tree.suite(id);
                Level {
                    id,
                    path: tree.path(id),
                    before_all: node.defined(HookKind::BeforeAll).cloned(),
                    before_each: node.defined(HookKind::BeforeEach).cloned(),
                    after_each: node.defined(HookKind::AfterEach).cloned(),
                }
            })
            .collect();
        Plan {
            name: tree.test_name(entry.suite, &entry.name),
            suite: entry.suite,
            suite_path: tree.path(entry.suite),
            levels,
            body: entry.body.clone(),
            flags: tree.effective_sanitize(entry.suite, &entry.options.sanitize),
            browser: tree.effective_browser(entry.suite, entry.options.browser.as_ref()),
            timeout_ms: entry.options.timeout_ms.or(self.config.default_timeout_ms),
        }
    }

    pub(crate) fn suite_ran(&self, suite: SuiteId) -> bool {
        self.state().tree.suite(suite).ran
    }

    fn mark_ran(&self, suite: SuiteId) {
        self.state().tree.mark_ran(suite);
    }

    fn before_all_done(&self, suite: SuiteId) -> bool {
        self.state().tree.suite(suite).before_all_done
    }

    fn set_before_all_done(&self, suite: SuiteId) {
        self.state().tree.suite_mut(suite).before_all_done = true;
    }

    fn after_all(&self, suite: SuiteId) -> (Option<Hook>, String) {
        let state = self.state();
        let hook = state.tree.suite(suite).defined(HookKind::AfterAll).cloned();
        (hook, state.tree.path(suite))
    }

    /// Run one test invocation
    pub(crate) async fn invoke(&self, test: TestId, native: NativeContext) -> EnsayoResult<()> {
        let plan = self.plan(test);
        let ctx = TestContext::new(plan.name.clone(), self.origin(), plan.flags);
        let span = tracing::info_span!("test", name = %plan.name, invocation = %ctx.invocation_id());
        self.run_invocation(plan, ctx, native).instrument(span).await
    }

    async fn run_invocation(
        &self,
        plan: Plan,
        ctx: TestContext,
        native: NativeContext,
    ) -> EnsayoResult<()> {
        self.mark_ran(plan.suite);

        for level in &plan.levels {
            let Some(hook) = &level.before_all else {
                continue;
            };
            if self.before_all_done(level.id) {
                continue;
            }
            let hook_ctx = ctx.scoped(HookKind::BeforeAll.as_str(), plan.flags);
            run_hook(hook, HookKind::BeforeAll, &level.path, hook_ctx).await?;
            self.set_before_all_done(level.id);
            tracing::debug!(suite = %level.path, "beforeAll done");
        }

        let mut entered = Vec::new();
        for (depth, level) in plan.levels.iter().enumerate() {
            let Some(hook) = &level.before_each else {
                continue;
            };
            let hook_ctx = ctx.scoped(HookKind::BeforeEach.as_str(), plan.flags);
            if let Err(e) = run_hook(hook, HookKind::BeforeEach, &level.path, hook_ctx.clone()).await {
                let cleanup = self.after_each(&plan, &ctx, depth).await;
                return Err(with_cleanup(e, cleanup));
            }
            entered.push(hook_ctx);
        }
        for hook_ctx in &entered {
            ctx.adopt(hook_ctx);
        }

        let mut attachment = None;
        if let Some(options) = &plan.browser {
            let suite_path = Some(plan.suite_path.as_str()).filter(|p| !p.is_empty());
            match self.browsers.attach(options, suite_path).await {
                Ok(attached) => {
                    ctx.set_browser(Some(attached.handle().clone()));
                    attachment = Some(attached);
                }
                Err(e) if options.on_setup_error == OnSetupError::Pass => {
                    tracing::warn!(error = %e, "browser setup failed; running test with the error");
                    ctx.set_setup_error(e);
                }
                Err(e) => {
                    let cleanup = self.after_each(&plan, &ctx, plan.levels.len()).await;
                    return Err(with_cleanup(e, cleanup));
                }
            }
            ctx.disable_resource_sanitizers();
        }

        let outcome = run_body(&plan, ctx.clone()).await;
        if plan.browser.is_some() {
            ctx.disable_resource_sanitizers();
        }
        native.set_sanitize(ctx.sanitize());
        native.record_steps(ctx.steps());

        if let Some(attached) = attachment {
            ctx.set_browser(None);
            self.browsers.detach(attached).await;
        }
        let mut cleanup = self.after_each(&plan, &ctx, plan.levels.len()).await;

        match outcome {
            Err(e) => Err(with_cleanup(e, cleanup)),
            Ok(()) if cleanup.is_empty() => Ok(()),
            Ok(()) => {
                let first = cleanup.remove(0);
                Err(with_cleanup(first, cleanup))
            }
        }
    }

    /// Run `afterEach` of `levels[..depth]` leaf to root, collecting failures
    async fn after_each(&self, plan: &Plan, ctx: &TestContext, depth: usize) -> Vec<EnsayoError> {
        let mut failures = Vec::new();
        for level in plan.levels[..depth].iter().rev() {
            let Some(hook) = &level.after_each else {
                continue;
            };
            let hook_ctx = ctx.scoped(HookKind::AfterEach.as_str(), plan.flags);
            if let Err(e) = run_hook(hook, HookKind::AfterEach, &level.path, hook_ctx).await {
                tracing::debug!(suite = %level.path, error = %e, "afterEach failed");
                failures.push(e);
            }
        }
        failures
    }

    /// Suite completion: `afterAll`, then closing the suite's browsers
    pub(crate) async fn complete(&self, suite: SuiteId) -> EnsayoResult<()> {
        let (hook, path) = self.after_all(suite);
        let result = match hook {
            Some(hook) => {
                let ctx = TestContext::new(completion_name(&path), self.origin(), SanitizeFlags::disabled());
                run_hook(&hook, HookKind::AfterAll, &path, ctx).await
            }
            None => Ok(()),
        };
        if !path.is_empty() {
            self.browsers.cleanup(&path).await;
        }
        result
    }
}

async fn run_body(plan: &Plan, ctx: TestContext) -> EnsayoResult<()> {
    let call = AssertUnwindSafe((plan.body)(ctx)).catch_unwind().map(|caught| {
        caught.unwrap_or_else(|payload| {
            Err(EnsayoError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        })
    });
    match plan.timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), call)
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(test = %plan.name, ms, "test timed out");
                Err(EnsayoError::Timeout { ms })
            }),
        None => call.await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_with_cleanup_keeps_primary() {
        let err = with_cleanup(EnsayoError::assertion("body"), Vec::new());
        assert!(matches!(err, EnsayoError::Assertion { .. }));

        let err = with_cleanup(
            EnsayoError::assertion("body"),
            vec![hook_error(HookKind::AfterEach, "s", &EnsayoError::assertion("cleanup"))],
        );
        match err {
            EnsayoError::WithCleanupFailures { source, cleanup } => {
                assert!(source.to_string().contains("body"));
                assert_eq!(cleanup.len(), 1);
                assert!(cleanup[0].contains("afterEach hook failed in 's'"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_root_hook_error_names_root() {
        let err = hook_error(HookKind::BeforeAll, "", &EnsayoError::config("x"));
        assert!(err.to_string().contains("'(root)'"));
    }
}
