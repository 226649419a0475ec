//! Browser automation collaborators.
//!
//! The session manager only talks to browsers through these traits, so the
//! CDP implementation and the in-memory mock are interchangeable.
//!
//! ```text
//! BrowserLauncher ──launch──▶ BrowserProcess ──new_page──▶ BrowserPage
//!                                    │                        │
//!                                  close          goto / evaluate / wait / close
//! ```

use crate::result::{EnsayoError, EnsayoResult};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Interval between readiness predicate evaluations
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Sandbox-related arguments passed when none are configured
pub const DEFAULT_BROWSER_ARGS: [&str; 2] = ["--no-sandbox", "--disable-setuid-sandbox"];

/// How to start a browser process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Run without a visible window
    pub headless: bool,
    /// Browser executable; the driver resolves one itself when `None`
    pub executable_path: Option<PathBuf>,
    /// Extra command-line arguments
    pub args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable_path: None,
            args: DEFAULT_BROWSER_ARGS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Starts isolated browser processes
#[async_trait]
pub trait BrowserLauncher: Send + Sync + fmt::Debug {
    async fn launch(&self, options: &LaunchOptions) -> EnsayoResult<Arc<dyn BrowserProcess>>;
}

/// A running browser process
#[async_trait]
pub trait BrowserProcess: Send + Sync + fmt::Debug {
    async fn new_page(&self) -> EnsayoResult<Arc<dyn BrowserPage>>;

    /// Terminate the process and all of its pages
    async fn close(&self) -> EnsayoResult<()>;
}

/// One page (tab) of a browser process
#[async_trait]
pub trait BrowserPage: Send + Sync + fmt::Debug {
    /// Navigate and wait for the load event
    async fn goto(&self, url: &str) -> EnsayoResult<()>;

    /// Evaluate a JavaScript expression, awaiting promises, and return its
    /// JSON value (`null` for non-serializable results)
    async fn evaluate(&self, expression: &str) -> EnsayoResult<serde_json::Value>;

    /// Wait until `predicate` evaluates truthy.
    ///
    /// Polls [`evaluate`](Self::evaluate) every 50ms; evaluation errors count
    /// as "not yet" since the page may still be loading.
    async fn wait_for_function(&self, predicate: &str, timeout_ms: u64) -> EnsayoResult<()> {
        let expression = format!("!!({predicate})");
        let poll = async {
            loop {
                if matches!(
                    self.evaluate(&expression).await,
                    Ok(serde_json::Value::Bool(true))
                ) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)).await;
            }
        };
        tokio::time::timeout(Duration::from_millis(timeout_ms), poll)
            .await
            .map_err(|_| EnsayoError::Timeout { ms: timeout_ms })
    }

    /// Console errors and uncaught exceptions seen since the page opened
    fn console_errors(&self) -> Vec<String>;

    async fn close(&self) -> EnsayoResult<()>;
}
