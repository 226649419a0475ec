//! In-memory browser driver and bundler for tests without Chromium.
//!
//! Pages answer the readiness predicates from a scripted
//! [`MockPageBehavior`]; every launch, page, navigation and close is counted
//! in a shared [`MockBrowserLog`].

use super::bundle::{BundleOptions, Bundler};
use super::document::{global_predicate, ready_predicate};
use super::driver::{BrowserLauncher, BrowserPage, BrowserProcess, LaunchOptions};
use crate::result::{EnsayoError, EnsayoResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How mock pages behave after navigation
#[derive(Debug, Clone)]
pub struct MockPageBehavior {
    /// Page sets `window.testReady = true`
    pub sets_ready: bool,
    /// Globals the page defines on `window`
    pub globals: Vec<String>,
    /// Console errors reported by every page
    pub console_errors: Vec<String>,
    /// Scripted evaluation results by exact expression
    pub responses: HashMap<String, serde_json::Value>,
    /// Fail `launch` with a launch error
    pub fail_launch: bool,
    /// Fail `goto` with a navigation error
    pub fail_navigation: bool,
}

impl Default for MockPageBehavior {
    fn default() -> Self {
        Self {
            sets_ready: true,
            globals: Vec::new(),
            console_errors: Vec::new(),
            responses: HashMap::new(),
            fail_launch: false,
            fail_navigation: false,
        }
    }
}

impl MockPageBehavior {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_ready(mut self, sets_ready: bool) -> Self {
        self.sets_ready = sets_ready;
        self
    }

    #[must_use]
    pub fn with_global(mut self, name: &str) -> Self {
        self.globals.push(name.to_string());
        self
    }

    #[must_use]
    pub fn with_console_error(mut self, message: &str) -> Self {
        self.console_errors.push(message.to_string());
        self
    }

    #[must_use]
    pub fn with_response(mut self, expression: &str, value: serde_json::Value) -> Self {
        self.responses.insert(expression.to_string(), value);
        self
    }

    #[must_use]
    pub const fn with_failed_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    #[must_use]
    pub const fn with_failed_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    fn satisfied(&self, predicate: &str) -> bool {
        if self.sets_ready && predicate == ready_predicate(None) {
            return true;
        }
        self.globals.iter().any(|global| {
            predicate == global_predicate(global)
                || (self.sets_ready && predicate == ready_predicate(Some(global)))
        })
    }
}

/// Counters shared by a launcher and everything it created
#[derive(Debug, Default)]
pub struct MockBrowserLog {
    launches: AtomicUsize,
    processes_closed: AtomicUsize,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    navigations: Mutex<Vec<String>>,
    evaluations: Mutex<Vec<String>>,
}

impl MockBrowserLog {
    #[must_use]
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn processes_closed(&self) -> usize {
        self.processes_closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pages_closed(&self) -> usize {
        self.pages_closed.load(Ordering::SeqCst)
    }

    /// URLs navigated to, in order
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        lock(&self.navigations).clone()
    }

    /// Expressions evaluated, in order
    #[must_use]
    pub fn evaluations(&self) -> Vec<String> {
        lock(&self.evaluations).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Launcher producing in-memory processes
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    behavior: Arc<Mutex<MockPageBehavior>>,
    log: Arc<MockBrowserLog>,
}

impl MockLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_behavior(behavior: MockPageBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            log: Arc::default(),
        }
    }

    /// Change behavior for pages opened from now on
    pub fn set_behavior(&self, behavior: MockPageBehavior) {
        *lock(&self.behavior) = behavior;
    }

    #[must_use]
    pub fn log(&self) -> Arc<MockBrowserLog> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self, options: &LaunchOptions) -> EnsayoResult<Arc<dyn BrowserProcess>> {
        if lock(&self.behavior).fail_launch {
            return Err(EnsayoError::BrowserLaunch {
                message: "mock launch failure".to_string(),
            });
        }
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(headless = options.headless, "mock browser launched");
        Ok(Arc::new(MockProcess {
            behavior: Arc::clone(&self.behavior),
            log: Arc::clone(&self.log),
        }))
    }
}

#[derive(Debug)]
struct MockProcess {
    behavior: Arc<Mutex<MockPageBehavior>>,
    log: Arc<MockBrowserLog>,
}

#[async_trait]
impl BrowserProcess for MockProcess {
    async fn new_page(&self) -> EnsayoResult<Arc<dyn BrowserPage>> {
        self.log.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockPage {
            behavior: lock(&self.behavior).clone(),
            log: Arc::clone(&self.log),
            loaded: Mutex::new(false),
        }))
    }

    async fn close(&self) -> EnsayoResult<()> {
        self.log.processes_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct MockPage {
    behavior: MockPageBehavior,
    log: Arc<MockBrowserLog>,
    loaded: Mutex<bool>,
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn goto(&self, url: &str) -> EnsayoResult<()> {
        lock(&self.log.navigations).push(url.to_string());
        if self.behavior.fail_navigation {
            return Err(EnsayoError::Navigation {
                url: url.to_string(),
                message: "mock navigation failure".to_string(),
            });
        }
        *lock(&self.loaded) = true;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> EnsayoResult<serde_json::Value> {
        lock(&self.log.evaluations).push(expression.to_string());
        if let Some(value) = self.behavior.responses.get(expression) {
            return Ok(value.clone());
        }
        let predicate = expression
            .strip_prefix("!!(")
            .and_then(|rest| rest.strip_suffix(')'));
        match predicate {
            Some(predicate) => Ok(serde_json::Value::Bool(
                *lock(&self.loaded) && self.behavior.satisfied(predicate),
            )),
            None => Ok(serde_json::Value::Null),
        }
    }

    fn console_errors(&self) -> Vec<String> {
        self.behavior.console_errors.clone()
    }

    async fn close(&self) -> EnsayoResult<()> {
        self.log.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Bundler returning fixed code and counting builds
#[derive(Debug, Default)]
pub struct MockBundler {
    code: String,
    builds: AtomicUsize,
    failures: Mutex<VecDeque<EnsayoError>>,
}

impl MockBundler {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Fail the next builds with these errors, in order
    #[must_use]
    pub fn with_failures(self, failures: impl IntoIterator<Item = EnsayoError>) -> Self {
        lock(&self.failures).extend(failures);
        self
    }

    /// Build calls observed, failed ones included
    #[must_use]
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bundler for MockBundler {
    async fn build(&self, entry: &Path, options: &BundleOptions) -> EnsayoResult<String> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = lock(&self.failures).pop_front() {
            return Err(failure);
        }
        Ok(match &options.global_name {
            Some(global) => format!("/* {} */ var {global} = (() => {{ {} }})();", entry.display(), self.code),
            None => format!("/* {} */ {}", entry.display(), self.code),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readiness_needs_navigation() {
        let launcher = MockLauncher::with_behavior(MockPageBehavior::new().with_global("App"));
        let process = launcher.launch(&LaunchOptions::default()).await.unwrap();
        let page = process.new_page().await.unwrap();

        assert!(page.wait_for_function(&ready_predicate(None), 60).await.is_err());
        page.goto("file:///tmp/x.html").await.unwrap();
        page.wait_for_function(&ready_predicate(Some("App")), 60).await.unwrap();
        page.wait_for_function(&global_predicate("App"), 60).await.unwrap();
        assert!(page.wait_for_function(&global_predicate("Other"), 60).await.is_err());
    }

    #[tokio::test]
    async fn test_log_counts() {
        let launcher = MockLauncher::new();
        let log = launcher.log();
        let process = launcher.launch(&LaunchOptions::default()).await.unwrap();
        let page = process.new_page().await.unwrap();
        page.goto("about:blank").await.unwrap();
        page.close().await.unwrap();
        process.close().await.unwrap();
        assert_eq!(log.launches(), 1);
        assert_eq!(log.pages_opened(), 1);
        assert_eq!(log.pages_closed(), 1);
        assert_eq!(log.processes_closed(), 1);
        assert_eq!(log.navigations(), vec!["about:blank".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_response() {
        let launcher = MockLauncher::with_behavior(
            MockPageBehavior::new().with_response("1 + 1", serde_json::json!(2)),
        );
        let page = launcher
            .launch(&LaunchOptions::default())
            .await
            .unwrap()
            .new_page()
            .await
            .unwrap();
        assert_eq!(page.evaluate("1 + 1").await.unwrap(), serde_json::json!(2));
        assert_eq!(page.evaluate("unknown").await.unwrap(), serde_json::Value::Null);
    }
}
