//! Per-suite and per-test browser configuration.

use super::bundle::{BundleOptions, Platform, DEFAULT_TARGET};
use super::driver::{LaunchOptions, DEFAULT_BROWSER_ARGS};
use std::path::PathBuf;

/// Default readiness timeout
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;

/// What to do when the browser context cannot be attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OnSetupError {
    /// Fail the test before its body runs
    #[default]
    Throw,
    /// Run the body anyway with the error on the test context
    Pass,
}

/// Browser configuration for a suite or test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserOptions {
    /// Whether the test gets a browser context at all
    pub enabled: bool,
    /// Reuse the suite's browser process; `None` means reuse
    pub reuse_browser: Option<bool>,
    /// Module bundled and loaded into the page
    pub entry_point: Option<PathBuf>,
    /// Global the bundle defines on `window`
    pub global_name: Option<String>,
    pub headless: bool,
    pub executable_path: Option<PathBuf>,
    pub args: Vec<String>,
    /// HTML template with `{{BUNDLE_CODE}}` and `{{BODY_CONTENT}}`
    pub template: Option<String>,
    pub body_content: String,
    pub ready_timeout_ms: u64,
    pub on_setup_error: OnSetupError,
    pub target: String,
    pub minify: bool,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            reuse_browser: None,
            entry_point: None,
            global_name: None,
            headless: true,
            executable_path: None,
            args: DEFAULT_BROWSER_ARGS.iter().map(ToString::to_string).collect(),
            template: None,
            body_content: String::new(),
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            on_setup_error: OnSetupError::default(),
            target: DEFAULT_TARGET.to_string(),
            minify: false,
        }
    }
}

impl BrowserOptions {
    /// Enabled browser options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that explicitly turn browser testing off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_reuse(mut self, reuse: bool) -> Self {
        self.reuse_browser = Some(reuse);
        self
    }

    #[must_use]
    pub fn with_entry_point(mut self, entry: impl Into<PathBuf>) -> Self {
        self.entry_point = Some(entry.into());
        self
    }

    #[must_use]
    pub fn with_global_name(mut self, name: impl Into<String>) -> Self {
        self.global_name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn with_executable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_path = Some(path.into());
        self
    }

    /// Replace the browser command-line arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    #[must_use]
    pub fn with_body_content(mut self, body: impl Into<String>) -> Self {
        self.body_content = body.into();
        self
    }

    #[must_use]
    pub const fn with_ready_timeout(mut self, ms: u64) -> Self {
        self.ready_timeout_ms = ms;
        self
    }

    #[must_use]
    pub const fn with_on_setup_error(mut self, policy: OnSetupError) -> Self {
        self.on_setup_error = policy;
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    #[must_use]
    pub const fn with_minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    /// Whether a cached process may be reused
    #[must_use]
    pub fn reuses_browser(&self) -> bool {
        self.reuse_browser != Some(false)
    }

    /// Launch options; `executable` fills in when none is configured
    #[must_use]
    pub fn launch_options(&self, executable: Option<PathBuf>) -> LaunchOptions {
        LaunchOptions {
            headless: self.headless,
            executable_path: self.executable_path.clone().or(executable),
            args: self.args.clone(),
        }
    }

    /// Bundle options for the entry point
    #[must_use]
    pub fn bundle_options(&self) -> BundleOptions {
        BundleOptions {
            global_name: self.global_name.clone(),
            platform: Platform::Browser,
            target: self.target.clone(),
            minify: self.minify,
        }
    }
}
