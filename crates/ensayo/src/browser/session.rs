//! The browser context handed to tests.

use super::document::HtmlDocument;
use super::driver::{BrowserPage, BrowserProcess};
use crate::result::{EnsayoError, EnsayoResult};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug)]
struct SessionState {
    id: Uuid,
    process: Arc<dyn BrowserProcess>,
    page: Mutex<Option<Arc<dyn BrowserPage>>>,
    document: Mutex<Option<HtmlDocument>>,
    closed: AtomicBool,
}

/// Handle to one browser process and its current page.
///
/// Clones share state. Page operations look the page up on every call, so
/// after a page swap they act on the new page.
#[derive(Debug, Clone)]
pub struct BrowserHandle {
    state: Arc<SessionState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BrowserHandle {
    pub(crate) fn new(process: Arc<dyn BrowserProcess>) -> Self {
        Self {
            state: Arc::new(SessionState {
                id: Uuid::new_v4(),
                process,
                page: Mutex::new(None),
                document: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Identifier of the underlying browser process
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Whether `close` has run
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Whether both handles refer to the same process
    #[must_use]
    pub fn same_process(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub(crate) fn process(&self) -> Arc<dyn BrowserProcess> {
        Arc::clone(&self.state.process)
    }

    fn page(&self) -> EnsayoResult<Arc<dyn BrowserPage>> {
        lock(&self.state.page)
            .clone()
            .ok_or_else(|| EnsayoError::invalid_state("browser context has no open page"))
    }

    /// Evaluate an expression in the current page
    pub async fn evaluate(&self, expression: &str) -> EnsayoResult<serde_json::Value> {
        self.page()?.evaluate(expression).await
    }

    /// Evaluate and deserialize the result
    pub async fn evaluate_as<T: DeserializeOwned>(&self, expression: &str) -> EnsayoResult<T> {
        let value = self.evaluate(expression).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call a function source with JSON arguments, e.g.
    /// `evaluate_function("(a, b) => a + b", &[json!(1), json!(2)])`
    pub async fn evaluate_function(
        &self,
        function: &str,
        args: &[serde_json::Value],
    ) -> EnsayoResult<serde_json::Value> {
        let args = args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        self.evaluate(&format!("({function})({args})")).await
    }

    pub async fn goto(&self, url: &str) -> EnsayoResult<()> {
        self.page()?.goto(url).await
    }

    /// Wait until `predicate` is truthy in the current page
    pub async fn wait_for(&self, predicate: &str, timeout_ms: u64) -> EnsayoResult<()> {
        self.page()?.wait_for_function(predicate, timeout_ms).await
    }

    /// Console errors captured by the current page
    #[must_use]
    pub fn console_errors(&self) -> Vec<String> {
        lock(&self.state.page)
            .as_ref()
            .map(|page| page.console_errors())
            .unwrap_or_default()
    }

    /// Path of the loaded HTML document, if any
    #[must_use]
    pub fn html_path(&self) -> Option<PathBuf> {
        lock(&self.state.document).as_ref().map(HtmlDocument::path)
    }

    /// Close the current page and the browser process
    pub async fn close(&self) -> EnsayoResult<()> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.close_page().await;
        tracing::debug!(browser = %self.state.id, "closing browser process");
        self.state.process.close().await
    }

    /// Install a freshly opened page, returning the page it replaced
    pub(crate) fn install_page(&self, page: Arc<dyn BrowserPage>) -> Option<Arc<dyn BrowserPage>> {
        lock(&self.state.page).replace(page)
    }

    pub(crate) fn install_document(&self, document: HtmlDocument) {
        if let Some(old) = lock(&self.state.document).replace(document) {
            old.remove();
        }
    }

    /// Close the current page and delete its document; failures are logged
    pub(crate) async fn close_page(&self) {
        let page = lock(&self.state.page).take();
        let document = lock(&self.state.document).take();
        if let Some(page) = page {
            if let Err(e) = page.close().await {
                tracing::warn!(browser = %self.state.id, error = %e, "failed to close page");
            }
        }
        if let Some(document) = document {
            document.remove();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::browser::driver::{BrowserLauncher, LaunchOptions};
    use crate::browser::mock::{MockLauncher, MockPageBehavior};
    use serde_json::json;

    async fn handle(launcher: &MockLauncher) -> BrowserHandle {
        let process = launcher.launch(&LaunchOptions::default()).await.unwrap();
        let handle = BrowserHandle::new(process.clone());
        handle.install_page(process.new_page().await.unwrap());
        handle
    }

    #[tokio::test]
    async fn test_operations_follow_page_swap() {
        let launcher = MockLauncher::new();
        let log = launcher.log();
        let handle = handle(&launcher).await;

        launcher.set_behavior(MockPageBehavior::new().with_response("answer", json!(42)));
        let old = handle
            .install_page(handle.process().new_page().await.unwrap())
            .unwrap();
        old.close().await.unwrap();

        assert_eq!(handle.evaluate("answer").await.unwrap(), json!(42));
        assert_eq!(log.pages_opened(), 2);
    }

    #[tokio::test]
    async fn test_evaluate_as_and_function() {
        let launcher = MockLauncher::with_behavior(
            MockPageBehavior::new()
                .with_response("document.title", json!("ensayo"))
                .with_response("((a, b) => a + b)(1, \"x\")", json!("1x")),
        );
        let handle = handle(&launcher).await;
        let title: String = handle.evaluate_as("document.title").await.unwrap();
        assert_eq!(title, "ensayo");
        let sum = handle
            .evaluate_function("(a, b) => a + b", &[json!(1), json!("x")])
            .await
            .unwrap();
        assert_eq!(sum, json!("1x"));
    }

    #[tokio::test]
    async fn test_no_page_is_invalid_state() {
        let launcher = MockLauncher::new();
        let handle = handle(&launcher).await;
        handle.close_page().await;
        let err = handle.evaluate("1").await.unwrap_err();
        assert!(matches!(err, EnsayoError::InvalidState { .. }));
        assert!(handle.console_errors().is_empty());
    }

    #[tokio::test]
    async fn test_close_page_deletes_document() {
        let launcher = MockLauncher::new();
        let handle = handle(&launcher).await;
        handle.install_document(HtmlDocument::write("<p></p>").unwrap());
        let path = handle.html_path().unwrap();
        assert!(path.exists());

        handle.close_page().await;
        assert!(!path.exists());
        assert_eq!(handle.html_path(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let launcher = MockLauncher::new();
        let log = launcher.log();
        let handle = handle(&launcher).await;
        handle.close().await.unwrap();
        handle.close().await.unwrap();
        assert!(handle.is_closed());
        assert_eq!(log.processes_closed(), 1);
        assert_eq!(log.pages_closed(), 1);
    }
}
