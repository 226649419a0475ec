//! The [`Ensayo`] handle: suite definition and the run entry point.

use super::context::TestContext;
use super::runtime::{
    completion_name, runtime_for, AdapterFn, NativeContext, RegisteredTest, RunReport,
    SuiteCompletion, TestRuntime,
};
use super::tree::{
    boxed, Hook, HookKind, HookOptions, Mode, SuiteId, SuiteOptions, SuiteTree, TestEntry, TestId,
    TestOptions,
};
use crate::browser::BrowserSessionManager;
use crate::config::{EnsayoConfig, RuntimeKind};
use crate::i18n::Messages;
use crate::result::{EnsayoError, EnsayoResult};
use crate::snapshot::SnapshotStore;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    pub(crate) tree: SuiteTree,
    stack: Vec<SuiteId>,
    root_completion: bool,
}

impl RegistryState {
    fn current(&self) -> SuiteId {
        self.stack.last().copied().unwrap_or(SuiteId::ROOT)
    }
}

pub(crate) struct Registry {
    pub(crate) config: EnsayoConfig,
    state: Mutex<RegistryState>,
    runtime: Box<dyn TestRuntime>,
    pub(crate) browsers: Arc<BrowserSessionManager>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub(crate) fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn upgrade(weak: &Weak<Self>) -> EnsayoResult<Arc<Self>> {
        weak.upgrade()
            .ok_or_else(|| EnsayoError::invalid_state("the suite registry was dropped"))
    }

    fn test_adapter(weak: Weak<Self>, test: TestId) -> AdapterFn {
        Arc::new(move |native: NativeContext| {
            let weak = weak.clone();
            async move { Self::upgrade(&weak)?.invoke(test, native).await }.boxed()
        })
    }

    fn completion(weak: Weak<Self>, suite: SuiteId, name: String) -> SuiteCompletion {
        let registry = weak.clone();
        SuiteCompletion {
            name,
            active: Arc::new(move || registry.upgrade().map_or(false, |r| r.suite_ran(suite))),
            run: Arc::new(move |_native: NativeContext| {
                let weak = weak.clone();
                async move { Self::upgrade(&weak)?.complete(suite).await }.boxed()
            }),
        }
    }
}

/// Pops the suite stack when a `describe` body ends, even by panic
struct SuiteScope<'a> {
    registry: &'a Registry,
}

impl Drop for SuiteScope<'_> {
    fn drop(&mut self) {
        self.registry.state().stack.pop();
        self.registry.runtime.exit_suite();
    }
}

/// Suite registry and runner.
///
/// Clones share one registry. Tests are defined with
/// [`describe`](Self::describe) and [`it`](Self::it) and run, strictly one
/// at a time, by [`run`](Self::run):
///
/// ```no_run
/// use ensayo::prelude::*;
///
/// # async fn demo() -> ensayo::EnsayoResult<()> {
/// let suite = Ensayo::new();
/// suite.describe("math", |s| {
///     s.before_each(|_ctx| async { Ok(()) });
///     s.it("adds", |_ctx| async { expect(1 + 1).to_be(2) })?;
///     Ok(())
/// })?;
/// let report = suite.run().await;
/// assert!(report.all_passed());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Ensayo {
    inner: Arc<Registry>,
}

impl Default for Ensayo {
    fn default() -> Self {
        Self::new()
    }
}

impl Ensayo {
    /// Registry configured from the environment, driving Chromium
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(EnsayoConfig::from_env())
    }

    #[must_use]
    pub fn from_config(config: EnsayoConfig) -> Self {
        Self::with_browsers(config, BrowserSessionManager::default())
    }

    /// Registry using a specific browser session manager
    #[must_use]
    pub fn with_browsers(config: EnsayoConfig, browsers: BrowserSessionManager) -> Self {
        tracing::debug!(runtime = config.runtime.as_str(), "suite registry created");
        Self {
            inner: Arc::new(Registry {
                runtime: runtime_for(config.runtime),
                config,
                state: Mutex::new(RegistryState::default()),
                browsers: Arc::new(browsers),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EnsayoConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn runtime_kind(&self) -> RuntimeKind {
        self.inner.runtime.kind()
    }

    #[must_use]
    pub fn browsers(&self) -> Arc<BrowserSessionManager> {
        Arc::clone(&self.inner.browsers)
    }

    /// Snapshot store for this configuration
    #[must_use]
    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore::from_config(&self.inner.config)
    }

    pub fn describe<F>(&self, name: &str, body: F) -> EnsayoResult<()>
    where
        F: FnOnce(&Self) -> EnsayoResult<()>,
    {
        self.define_suite(name, SuiteOptions::default(), Mode::Run, body)
    }

    pub fn describe_with<F>(&self, name: &str, options: SuiteOptions, body: F) -> EnsayoResult<()>
    where
        F: FnOnce(&Self) -> EnsayoResult<()>,
    {
        self.define_suite(name, options, Mode::Run, body)
    }

    /// Define a suite whose tests are all skipped
    pub fn describe_skip<F>(&self, name: &str, body: F) -> EnsayoResult<()>
    where
        F: FnOnce(&Self) -> EnsayoResult<()>,
    {
        self.define_suite(name, SuiteOptions::default(), Mode::Skip, body)
    }

    /// Define a focused suite
    pub fn describe_only<F>(&self, name: &str, body: F) -> EnsayoResult<()>
    where
        F: FnOnce(&Self) -> EnsayoResult<()>,
    {
        self.define_suite(name, SuiteOptions::default(), Mode::Only, body)
    }

    fn define_suite<F>(&self, name: &str, options: SuiteOptions, mode: Mode, body: F) -> EnsayoResult<()>
    where
        F: FnOnce(&Self) -> EnsayoResult<()>,
    {
        if name.trim().is_empty() {
            return Err(EnsayoError::config(Messages::current().empty_name("describe")));
        }
        let id = {
            let mut state = self.inner.state();
            let parent = state.current();
            let id = state.tree.add_suite(parent, name, options, mode);
            state.stack.push(id);
            id
        };
        self.inner.runtime.enter_suite();
        let scope = SuiteScope {
            registry: &self.inner,
        };
        let result = body(self);
        let closed = self.close_suite(id);
        drop(scope);
        result.and(closed)
    }

    /// Queue the suite's completion when it defines its own `afterAll` or
    /// owns browser tests
    fn close_suite(&self, id: SuiteId) -> EnsayoResult<()> {
        let (needed, path) = {
            let state = self.inner.state();
            let node = state.tree.suite(id);
            let needed = node.defined(HookKind::AfterAll).is_some()
                || state.tree.owns_browser_tests(id);
            (needed, state.tree.path(id))
        };
        if !needed {
            return Ok(());
        }
        tracing::trace!(suite = %path, "suite completion queued");
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .runtime
            .register_completion(Registry::completion(weak, id, completion_name(&path)))
    }

    /// Register a test in the current suite
    pub fn it<F, Fut>(&self, name: &str, body: F) -> EnsayoResult<()>
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.define_test(name, TestOptions::default(), Mode::Run, body)
    }

    /// Alias of [`it`](Self::it)
    pub fn test<F, Fut>(&self, name: &str, body: F) -> EnsayoResult<()>
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.define_test(name, TestOptions::default(), Mode::Run, body)
    }

    pub fn it_with<F, Fut>(&self, name: &str, options: TestOptions, body: F) -> EnsayoResult<()>
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.define_test(name, options, Mode::Run, body)
    }

    pub fn it_skip<F, Fut>(&self, name: &str, body: F) -> EnsayoResult<()>
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.define_test(name, TestOptions::default(), Mode::Skip, body)
    }

    pub fn it_only<F, Fut>(&self, name: &str, body: F) -> EnsayoResult<()>
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.define_test(name, TestOptions::default(), Mode::Only, body)
    }

    fn define_test<F, Fut>(&self, name: &str, options: TestOptions, mode: Mode, body: F) -> EnsayoResult<()>
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        if name.trim().is_empty() {
            return Err(EnsayoError::config(Messages::current().empty_name("it")));
        }
        let mut state = self.inner.state();
        let suite = state.current();
        let id = state.tree.next_test_id();
        let registered = RegisteredTest {
            name: state.tree.test_name(suite, name),
            mode: state.tree.effective_mode(suite, mode),
            sanitize: state.tree.effective_sanitize(suite, &options.sanitize),
            run: Registry::test_adapter(Arc::downgrade(&self.inner), id),
        };
        self.inner.runtime.register(registered)?;
        state.tree.add_test(TestEntry {
            name: name.to_string(),
            suite,
            body: boxed(body),
            options,
        });
        Ok(())
    }

    /// Set a hook on the current suite (the root outside any `describe`)
    pub fn hook(&self, kind: HookKind, hook: Hook) {
        let mut state = self.inner.state();
        let suite = state.current();
        state.tree.suite_mut(suite).hooks.set(kind, hook);
    }

    pub fn before_all<F, Fut>(&self, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.hook(HookKind::BeforeAll, Hook::new(f));
    }

    pub fn after_all<F, Fut>(&self, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.hook(HookKind::AfterAll, Hook::new(f));
    }

    pub fn before_each<F, Fut>(&self, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.hook(HookKind::BeforeEach, Hook::new(f));
    }

    pub fn after_each<F, Fut>(&self, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.hook(HookKind::AfterEach, Hook::new(f));
    }

    pub fn before_all_with<F, Fut>(&self, options: HookOptions, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.hook(HookKind::BeforeAll, Hook::new(f).with_options(options));
    }

    pub fn after_all_with<F, Fut>(&self, options: HookOptions, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.hook(HookKind::AfterAll, Hook::new(f).with_options(options));
    }

    pub fn before_each_with<F, Fut>(&self, options: HookOptions, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.hook(HookKind::BeforeEach, Hook::new(f).with_options(options));
    }

    pub fn after_each_with<F, Fut>(&self, options: HookOptions, f: F)
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        self.hook(HookKind::AfterEach, Hook::new(f).with_options(options));
    }

    /// Full names of the registered tests, in registration order
    #[must_use]
    pub fn test_names(&self) -> Vec<String> {
        let state = self.inner.state();
        (0..state.tree.next_test_id().0)
            .map(|i| {
                let entry = state.tree.test(TestId(i));
                state.tree.test_name(entry.suite, &entry.name)
            })
            .collect()
    }

    /// Paths of every defined suite, depth first in definition order
    #[must_use]
    pub fn suite_paths(&self) -> Vec<String> {
        let state = self.inner.state();
        let mut paths = Vec::new();
        let mut pending = vec![SuiteId::ROOT];
        while let Some(id) = pending.pop() {
            if id != SuiteId::ROOT {
                paths.push(state.tree.path(id));
            }
            pending.extend(state.tree.suite(id).children.iter().rev());
        }
        paths
    }

    /// Run every registered test, then close all cached browsers
    pub async fn run(&self) -> RunReport {
        self.queue_root_completion();
        self.inner.browsers.install_signal_cleanup();
        let report = self.inner.runtime.run().await;
        let closed = self.inner.browsers.cleanup_all().await;
        if closed > 0 {
            tracing::debug!(closed, "closed remaining browsers");
        }
        report
    }

    /// Root-level `afterAll` runs once, after everything else
    fn queue_root_completion(&self) {
        {
            let mut state = self.inner.state();
            if state.root_completion
                || state.tree.suite(SuiteId::ROOT).defined(HookKind::AfterAll).is_none()
            {
                return;
            }
            state.root_completion = true;
        }
        let weak = Arc::downgrade(&self.inner);
        let completion = Registry::completion(weak, SuiteId::ROOT, completion_name(""));
        if let Err(e) = self.inner.runtime.register_completion(completion) {
            tracing::warn!(error = %e, "root afterAll could not be scheduled");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry(kind: RuntimeKind) -> Ensayo {
        Ensayo::from_config(EnsayoConfig::default().with_runtime(kind))
    }

    mod definition_tests {
        use super::*;

        #[test]
        fn test_names_and_paths() {
            let suite = registry(RuntimeKind::Serial);
            suite
                .describe("a", |s| {
                    s.it("one", |_| async { Ok(()) })?;
                    s.describe("b", |s| s.it("two", |_| async { Ok(()) }))?;
                    s.describe("c", |_| Ok(()))
                })
                .unwrap();
            suite.it("top", |_| async { Ok(()) }).unwrap();

            assert_eq!(suite.test_names(), vec!["a > one", "a > b > two", "top"]);
            assert_eq!(suite.suite_paths(), vec!["a", "a > b", "a > c"]);
        }

        #[test]
        fn test_empty_names_rejected() {
            let suite = registry(RuntimeKind::Serial);
            assert!(matches!(
                suite.describe(" ", |_| Ok(())).unwrap_err(),
                EnsayoError::Config { .. }
            ));
            assert!(matches!(
                suite.it("", |_| async { Ok(()) }).unwrap_err(),
                EnsayoError::Config { .. }
            ));
        }

        #[test]
        fn test_stack_pops_after_error() {
            let suite = registry(RuntimeKind::Serial);
            let err = suite
                .describe("broken", |_| Err(EnsayoError::config("bad suite")))
                .unwrap_err();
            assert!(err.to_string().contains("bad suite"));
            suite.it("after", |_| async { Ok(()) }).unwrap();
            assert_eq!(suite.test_names(), vec!["after"]);
        }

        #[test]
        fn test_stack_pops_after_panic() {
            let suite = registry(RuntimeKind::Flat);
            let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _ = suite.describe("explodes", |_| panic!("in suite body"));
            }));
            assert!(caught.is_err());
            assert!(suite.it("stray", |_| async { Ok(()) }).is_err());
            suite
                .describe("next", |s| s.it("inside", |_| async { Ok(()) }))
                .unwrap();
            assert_eq!(suite.test_names(), vec!["next > inside"]);
        }
    }

    mod flat_tests {
        use super::*;

        #[test]
        fn test_it_outside_describe_is_config_error() {
            let suite = registry(RuntimeKind::Flat);
            let err = suite.it("stray", |_| async { Ok(()) }).unwrap_err();
            assert!(matches!(err, EnsayoError::Config { .. }));
            assert!(err.to_string().contains("stray"));
            assert!(suite.test_names().is_empty());
        }

        #[tokio::test]
        async fn test_it_inside_running_test_is_config_error() {
            let suite = registry(RuntimeKind::Flat);
            let handle = suite.clone();
            suite
                .describe("outer", move |s| {
                    s.it("registers", move |_| {
                        let handle = handle.clone();
                        async move {
                            let err = handle.it("nested", |_| async { Ok(()) }).unwrap_err();
                            assert!(matches!(err, EnsayoError::Config { .. }));
                            Ok(())
                        }
                    })
                })
                .unwrap();
            let report = suite.run().await;
            assert!(report.all_passed(), "{:?}", report.failures());
            assert_eq!(report.total(), 1);
        }
    }
}
