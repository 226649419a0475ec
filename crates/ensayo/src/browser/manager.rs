//! Browser session manager: launching, caching and tearing down browser
//! processes for test invocations.
//!
//! Processes are cached per suite path. A cached process outlives the
//! tests that use it; only pages are opened and closed per test. Entries
//! leave the cache through [`BrowserSessionManager::cleanup`],
//! [`BrowserSessionManager::cleanup_all`] or the signal handler.

use super::bundle::{BundleCache, Bundler, EsbuildBundler};
use super::chrome::find_chrome;
use super::chromium::ChromiumLauncher;
use super::document::{self, HtmlDocument, DEFAULT_TEMPLATE};
use super::driver::{BrowserLauncher, BrowserPage};
use super::options::BrowserOptions;
use super::session::BrowserHandle;
use crate::i18n::Messages;
use crate::result::{EnsayoError, EnsayoResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Window of the global-only readiness retry
pub const DEFAULT_GLOBAL_RETRY_MS: u64 = 2000;

/// A browser context attached to one test invocation
#[derive(Debug, Clone)]
pub struct Attachment {
    handle: BrowserHandle,
    owned: bool,
}

impl Attachment {
    #[must_use]
    pub fn handle(&self) -> &BrowserHandle {
        &self.handle
    }

    /// Whether the invocation owns the process (closed on detach)
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

/// Launches, caches and cleans up browser sessions
#[derive(Debug)]
pub struct BrowserSessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    bundles: BundleCache,
    cache: Mutex<HashMap<String, Vec<BrowserHandle>>>,
    global_retry_ms: u64,
    signal_installed: AtomicBool,
}

impl Default for BrowserSessionManager {
    fn default() -> Self {
        Self::new(Arc::new(ChromiumLauncher), Arc::new(EsbuildBundler::new()))
    }
}

impl BrowserSessionManager {
    #[must_use]
    pub fn new(launcher: Arc<dyn BrowserLauncher>, bundler: Arc<dyn Bundler>) -> Self {
        Self {
            launcher,
            bundles: BundleCache::new(bundler),
            cache: Mutex::new(HashMap::new()),
            global_retry_ms: DEFAULT_GLOBAL_RETRY_MS,
            signal_installed: AtomicBool::new(false),
        }
    }

    /// Change the global-only readiness retry window
    #[must_use]
    pub const fn with_global_retry(mut self, ms: u64) -> Self {
        self.global_retry_ms = ms;
        self
    }

    /// Change the pause between transient bundler retries
    #[must_use]
    pub fn with_bundle_retry_delay(mut self, delay: Duration) -> Self {
        self.bundles = self.bundles.with_retry_delay(delay);
        self
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Vec<BrowserHandle>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Suite paths with cached processes, sorted
    #[must_use]
    pub fn cached_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.cache().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of processes cached under `suite_path`
    #[must_use]
    pub fn cached_processes(&self, suite_path: &str) -> usize {
        self.cache().get(suite_path).map_or(0, Vec::len)
    }

    /// First cached process under `path` that is still open.
    ///
    /// Handles a test closed itself are dropped from the entry, and an entry
    /// left empty is removed.
    fn live_cached(&self, path: &str) -> Option<BrowserHandle> {
        let mut cache = self.cache();
        let handles = cache.get_mut(path)?;
        let before = handles.len();
        handles.retain(|handle| !handle.is_closed());
        if handles.len() < before {
            tracing::debug!(suite = path, pruned = before - handles.len(), "dropped closed browsers from cache");
        }
        let live = handles.first().cloned();
        if live.is_none() {
            cache.remove(path);
        }
        live
    }

    /// Attach a browser context for one test invocation.
    ///
    /// With a suite path and reuse not disabled, a cached process gets a
    /// fresh page. Otherwise a new process is launched; it is cached under
    /// the suite path whether or not reuse is enabled. Without a suite
    /// path the invocation owns the process.
    pub async fn attach(
        &self,
        options: &BrowserOptions,
        suite_path: Option<&str>,
    ) -> EnsayoResult<Attachment> {
        if let Some(path) = suite_path.filter(|_| options.reuses_browser()) {
            if let Some(handle) = self.live_cached(path) {
                tracing::debug!(suite = path, browser = %handle.id(), "reusing cached browser");
                self.prepare_page(&handle, options).await?;
                return Ok(Attachment {
                    handle,
                    owned: false,
                });
            }
        }

        let detected = if options.executable_path.is_none() {
            find_chrome()
        } else {
            None
        };
        let process = self.launcher.launch(&options.launch_options(detected)).await?;
        let handle = BrowserHandle::new(process);
        tracing::debug!(suite = suite_path.unwrap_or(""), browser = %handle.id(), "launched browser");

        if let Err(e) = self.prepare_page(&handle, options).await {
            if let Err(close_error) = handle.close().await {
                tracing::warn!(error = %close_error, "failed to close browser after setup error");
            }
            return Err(e);
        }

        let owned = match suite_path {
            Some(path) => {
                self.cache()
                    .entry(path.to_string())
                    .or_default()
                    .push(handle.clone());
                false
            }
            None => true,
        };
        Ok(Attachment { handle, owned })
    }

    /// Open a page on the handle's process and load the entry point
    async fn prepare_page(&self, handle: &BrowserHandle, options: &BrowserOptions) -> EnsayoResult<()> {
        let page = handle.process().new_page().await?;
        if let Some(previous) = handle.install_page(Arc::clone(&page)) {
            if let Err(e) = previous.close().await {
                tracing::warn!(error = %e, "failed to close replaced page");
            }
        }
        let Some(entry) = &options.entry_point else {
            return Ok(());
        };
        match self.load_entry(&page, entry, options).await {
            Ok(document) => {
                handle.install_document(document);
                Ok(())
            }
            Err(e) => {
                handle.close_page().await;
                Err(e)
            }
        }
    }

    async fn load_entry(
        &self,
        page: &Arc<dyn BrowserPage>,
        entry: &Path,
        options: &BrowserOptions,
    ) -> EnsayoResult<HtmlDocument> {
        let code = self.bundles.get(entry, &options.bundle_options()).await?;
        let template = options.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        let html = document::render(template, &code, &options.body_content);
        let document = HtmlDocument::write(&html)?;
        page.goto(&document.url()).await?;
        self.wait_ready(page, entry, options).await?;
        Ok(document)
    }

    async fn wait_ready(
        &self,
        page: &Arc<dyn BrowserPage>,
        entry: &Path,
        options: &BrowserOptions,
    ) -> EnsayoResult<()> {
        let global = options.global_name.as_deref();
        let ready = document::ready_predicate(global);
        if page
            .wait_for_function(&ready, options.ready_timeout_ms)
            .await
            .is_ok()
        {
            return Ok(());
        }
        if let Some(global) = global {
            let defined = document::global_predicate(global);
            if page
                .wait_for_function(&defined, self.global_retry_ms)
                .await
                .is_ok()
            {
                tracing::debug!(global, "page defined its global without setting testReady");
                return Ok(());
            }
        }
        Err(EnsayoError::BrowserSetup {
            message: Messages::current().page_not_ready(
                &entry.display().to_string(),
                global,
                &page.console_errors(),
            ),
        })
    }

    /// Close the invocation's page; owned processes are closed too
    pub async fn detach(&self, attachment: Attachment) {
        attachment.handle.close_page().await;
        if attachment.owned {
            if let Err(e) = attachment.handle.close().await {
                tracing::warn!(browser = %attachment.handle.id(), error = %e, "failed to close browser");
            }
        }
    }

    /// Remove and close every process cached under `suite_path`
    pub async fn cleanup(&self, suite_path: &str) -> usize {
        let handles = self.cache().remove(suite_path).unwrap_or_default();
        let count = handles.len();
        close_all(handles).await;
        if count > 0 {
            tracing::debug!(suite = suite_path, count, "closed cached browsers");
        }
        count
    }

    /// Remove and close every cached process concurrently
    pub async fn cleanup_all(&self) -> usize {
        let handles: Vec<BrowserHandle> = self.cache().drain().flat_map(|(_, v)| v).collect();
        let count = handles.len();
        close_all(handles).await;
        count
    }

    /// Run [`cleanup_all`](Self::cleanup_all) on Ctrl-C or SIGTERM, then
    /// exit. Returns whether a listener was installed by this call.
    pub fn install_signal_cleanup(self: &Arc<Self>) -> bool {
        if self.signal_installed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(error = %e, "no async runtime; signal cleanup not installed");
                self.signal_installed.store(false, Ordering::SeqCst);
                return false;
            }
        };
        let manager = Arc::clone(self);
        runtime.spawn(async move {
            let code = termination_signal().await;
            let closed = manager.cleanup_all().await;
            tracing::info!(closed, "closed browsers after termination signal");
            std::process::exit(code);
        });
        true
    }
}

async fn close_all(handles: Vec<BrowserHandle>) {
    let results = futures::future::join_all(handles.iter().map(BrowserHandle::close)).await;
    for (handle, result) in handles.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!(browser = %handle.id(), error = %e, "failed to close browser");
        }
    }
}

/// Resolve with the exit code of the first termination signal. Never
/// resolves if no listener can be registered.
async fn termination_signal() -> i32 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                return tokio::select! {
                    _ = tokio::signal::ctrl_c() => 130,
                    _ = terminate.recv() => 143,
                };
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }
    match tokio::signal::ctrl_c().await {
        Ok(()) => 130,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            futures::future::pending().await
        }
    }
}
