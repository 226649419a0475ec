//! Suite tree: an arena of suites and tests built at definition time.

use super::context::{SanitizeFlags, SanitizeOverrides, TestContext};
use crate::browser::BrowserOptions;
use crate::result::EnsayoResult;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Separator between suite names in a suite path
pub const PATH_SEPARATOR: &str = " > ";

/// Boxed future returned by hooks and test bodies
pub type BoxedRun = BoxFuture<'static, EnsayoResult<()>>;

/// Type-erased hook or test body
pub type BodyFn = Arc<dyn Fn(TestContext) -> BoxedRun + Send + Sync>;

pub(crate) fn boxed<F, Fut>(f: F) -> BodyFn
where
    F: Fn(TestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Index of a suite in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuiteId(pub(crate) usize);

impl SuiteId {
    /// The implicit root suite
    pub const ROOT: Self = Self(0);
}

/// Index of a test in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId(pub(crate) usize);

/// Lifecycle point a hook runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

impl HookKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeAll => "beforeAll",
            Self::AfterAll => "afterAll",
            Self::BeforeEach => "beforeEach",
            Self::AfterEach => "afterEach",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sanitizer overrides applied to the context a hook runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HookOptions {
    pub sanitize: SanitizeOverrides,
}

impl HookOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_sanitize_ops(mut self, value: bool) -> Self {
        self.sanitize.ops = Some(value);
        self
    }

    #[must_use]
    pub const fn with_sanitize_resources(mut self, value: bool) -> Self {
        self.sanitize.resources = Some(value);
        self
    }

    #[must_use]
    pub const fn with_sanitize_exit(mut self, value: bool) -> Self {
        self.sanitize.exit = Some(value);
        self
    }
}

/// A lifecycle hook.
///
/// Clones are the same hook: registering a clone in a nested suite is not
/// a new definition.
#[derive(Clone)]
pub struct Hook {
    run: BodyFn,
    options: HookOptions,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Hook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EnsayoResult<()>> + Send + 'static,
    {
        Self {
            run: boxed(f),
            options: HookOptions::default(),
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: HookOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn options(&self) -> &HookOptions {
        &self.options
    }

    /// Whether both values are the same hook
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.run, &other.run)
    }

    pub(crate) fn call(&self, ctx: TestContext) -> BoxedRun {
        (self.run)(ctx)
    }
}

/// At most one hook per kind
#[derive(Debug, Clone, Default)]
pub struct SuiteHooks {
    pub before_all: Option<Hook>,
    pub after_all: Option<Hook>,
    pub before_each: Option<Hook>,
    pub after_each: Option<Hook>,
}

impl SuiteHooks {
    #[must_use]
    pub const fn get(&self, kind: HookKind) -> Option<&Hook> {
        match kind {
            HookKind::BeforeAll => self.before_all.as_ref(),
            HookKind::AfterAll => self.after_all.as_ref(),
            HookKind::BeforeEach => self.before_each.as_ref(),
            HookKind::AfterEach => self.after_each.as_ref(),
        }
    }

    /// Set a hook; a later call replaces an earlier one
    pub fn set(&mut self, kind: HookKind, hook: Hook) {
        let slot = match kind {
            HookKind::BeforeAll => &mut self.before_all,
            HookKind::AfterAll => &mut self.after_all,
            HookKind::BeforeEach => &mut self.before_each,
            HookKind::AfterEach => &mut self.after_each,
        };
        *slot = Some(hook);
    }
}

/// Skip/only marker of a suite or test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    #[default]
    Run,
    Skip,
    Only,
}

/// Configuration attached to a `describe`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SuiteOptions {
    pub sanitize: SanitizeOverrides,
    pub browser: Option<BrowserOptions>,
}

impl SuiteOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_sanitize_ops(mut self, value: bool) -> Self {
        self.sanitize.ops = Some(value);
        self
    }

    #[must_use]
    pub const fn with_sanitize_resources(mut self, value: bool) -> Self {
        self.sanitize.resources = Some(value);
        self
    }

    #[must_use]
    pub const fn with_sanitize_exit(mut self, value: bool) -> Self {
        self.sanitize.exit = Some(value);
        self
    }

    #[must_use]
    pub fn with_browser(mut self, browser: BrowserOptions) -> Self {
        self.browser = Some(browser);
        self
    }
}

/// Configuration attached to an `it`/`test`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestOptions {
    /// Per-test timeout; falls back to the configured default
    pub timeout_ms: Option<u64>,
    pub sanitize: SanitizeOverrides,
    /// Wins over every suite-level browser setting
    pub browser: Option<BrowserOptions>,
}

impl TestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    #[must_use]
    pub const fn with_sanitize_ops(mut self, value: bool) -> Self {
        self.sanitize.ops = Some(value);
        self
    }

    #[must_use]
    pub const fn with_sanitize_resources(mut self, value: bool) -> Self {
        self.sanitize.resources = Some(value);
        self
    }

    #[must_use]
    pub const fn with_sanitize_exit(mut self, value: bool) -> Self {
        self.sanitize.exit = Some(value);
        self
    }

    #[must_use]
    pub fn with_browser(mut self, browser: BrowserOptions) -> Self {
        self.browser = Some(browser);
        self
    }
}

#[derive(Debug)]
pub(crate) struct SuiteNode {
    pub(crate) name: String,
    pub(crate) parent: Option<SuiteId>,
    pub(crate) children: Vec<SuiteId>,
    pub(crate) tests: Vec<TestId>,
    pub(crate) hooks: SuiteHooks,
    pub(crate) inherited: SuiteHooks,
    pub(crate) options: SuiteOptions,
    pub(crate) mode: Mode,
    pub(crate) before_all_done: bool,
    pub(crate) ran: bool,
}

impl SuiteNode {
    /// This suite's own hook of `kind`, unless it is the inherited one
    pub(crate) fn defined(&self, kind: HookKind) -> Option<&Hook> {
        let own = self.hooks.get(kind)?;
        match self.inherited.get(kind) {
            Some(inherited) if inherited.same(own) => None,
            _ => Some(own),
        }
    }

    /// Hooks a child created now starts from
    fn visible(&self) -> SuiteHooks {
        let pick = |kind| self.hooks.get(kind).or(self.inherited.get(kind)).cloned();
        SuiteHooks {
            before_all: pick(HookKind::BeforeAll),
            after_all: pick(HookKind::AfterAll),
            before_each: pick(HookKind::BeforeEach),
            after_each: pick(HookKind::AfterEach),
        }
    }
}

pub(crate) struct TestEntry {
    pub(crate) name: String,
    pub(crate) suite: SuiteId,
    pub(crate) body: BodyFn,
    pub(crate) options: TestOptions,
}

impl fmt::Debug for TestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestEntry")
            .field("name", &self.name)
            .field("suite", &self.suite)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Arena of suites; index 0 is the implicit root
#[derive(Debug)]
pub(crate) struct SuiteTree {
    suites: Vec<SuiteNode>,
    tests: Vec<TestEntry>,
}

impl Default for SuiteTree {
    fn default() -> Self {
        Self {
            suites: vec![SuiteNode {
                name: String::new(),
                parent: None,
                children: Vec::new(),
                tests: Vec::new(),
                hooks: SuiteHooks::default(),
                inherited: SuiteHooks::default(),
                options: SuiteOptions::default(),
                mode: Mode::Run,
                before_all_done: false,
                ran: false,
            }],
            tests: Vec::new(),
        }
    }
}

impl SuiteTree {
    pub(crate) fn suite(&self, id: SuiteId) -> &SuiteNode {
        &self.suites[id.0]
    }

    pub(crate) fn suite_mut(&mut self, id: SuiteId) -> &mut SuiteNode {
        &mut self.suites[id.0]
    }

    pub(crate) fn test(&self, id: TestId) -> &TestEntry {
        &self.tests[id.0]
    }

    pub(crate) fn add_suite(
        &mut self,
        parent: SuiteId,
        name: &str,
        options: SuiteOptions,
        mode: Mode,
    ) -> SuiteId {
        let id = SuiteId(self.suites.len());
        let inherited = self.suite(parent).visible();
        self.suites.push(SuiteNode {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            tests: Vec::new(),
            hooks: SuiteHooks::default(),
            inherited,
            options,
            mode,
            before_all_done: false,
            ran: false,
        });
        self.suite_mut(parent).children.push(id);
        id
    }

    /// Id the next added test will get
    pub(crate) fn next_test_id(&self) -> TestId {
        TestId(self.tests.len())
    }

    pub(crate) fn add_test(&mut self, entry: TestEntry) -> TestId {
        let id = self.next_test_id();
        let suite = entry.suite;
        self.tests.push(entry);
        self.suite_mut(suite).tests.push(id);
        id
    }

    /// Suites from the root down to `id`, inclusive
    pub(crate) fn ancestors(&self, id: SuiteId) -> Vec<SuiteId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.suite(current).parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Suite names from the root down, joined by [`PATH_SEPARATOR`]
    pub(crate) fn path(&self, id: SuiteId) -> String {
        self.ancestors(id)
            .into_iter()
            .filter(|s| *s != SuiteId::ROOT)
            .map(|s| self.suite(s).name.as_str())
            .collect::<Vec<_>>()
            .join(PATH_SEPARATOR)
    }

    /// Full display name of a test
    pub(crate) fn test_name(&self, suite: SuiteId, name: &str) -> String {
        let path = self.path(suite);
        if path.is_empty() {
            name.to_string()
        } else {
            format!("{path}{PATH_SEPARATOR}{name}")
        }
    }

    /// Nearest explicit value per flag: test, then suites leaf to root
    pub(crate) fn effective_sanitize(&self, suite: SuiteId, test: &SanitizeOverrides) -> SanitizeFlags {
        let mut resolved = *test;
        for id in self.ancestors(suite).into_iter().rev() {
            let own = self.suite(id).options.sanitize;
            resolved.ops = resolved.ops.or(own.ops);
            resolved.resources = resolved.resources.or(own.resources);
            resolved.exit = resolved.exit.or(own.exit);
        }
        let defaults = SanitizeFlags::default();
        SanitizeFlags {
            ops: resolved.ops.unwrap_or(defaults.ops),
            resources: resolved.resources.unwrap_or(defaults.resources),
            exit: resolved.exit.unwrap_or(defaults.exit),
        }
    }

    /// Browser options from the test, else the nearest suite; `None`
    /// when absent or disabled
    pub(crate) fn effective_browser(
        &self,
        suite: SuiteId,
        test: Option<&BrowserOptions>,
    ) -> Option<BrowserOptions> {
        let found = test.cloned().or_else(|| {
            self.ancestors(suite)
                .into_iter()
                .rev()
                .find_map(|id| self.suite(id).options.browser.clone())
        });
        found.filter(|options| options.enabled)
    }

    /// Skip on the test or any ancestor wins; otherwise only if marked
    /// anywhere on the chain
    pub(crate) fn effective_mode(&self, suite: SuiteId, test: Mode) -> Mode {
        let chain = self.ancestors(suite);
        let modes = std::iter::once(test).chain(chain.iter().map(|id| self.suite(*id).mode));
        let mut result = Mode::Run;
        for mode in modes {
            match mode {
                Mode::Skip => return Mode::Skip,
                Mode::Only => result = Mode::Only,
                Mode::Run => {}
            }
        }
        result
    }

    /// Whether a direct test of `suite` runs with a browser
    pub(crate) fn owns_browser_tests(&self, suite: SuiteId) -> bool {
        self.suite(suite)
            .tests
            .iter()
            .any(|t| self.effective_browser(suite, self.test(*t).options.browser.as_ref()).is_some())
    }

    /// Mark `suite` and its ancestors as having run a test
    pub(crate) fn mark_ran(&mut self, suite: SuiteId) {
        for id in self.ancestors(suite) {
            self.suite_mut(id).ran = true;
        }
    }
}
