//! Browser-backed integration testing.
//!
//! ```text
//! ┌──────────────────────┐  attach/detach  ┌───────────────┐
//! │ suite orchestrator   │ ───────────────▶│ SessionManager│──▶ BrowserLauncher
//! └──────────────────────┘                 │  suite cache  │──▶ BundleCache ──▶ Bundler
//!                                          └───────────────┘
//! ```

pub mod bundle;
pub mod chrome;
pub mod chromium;
pub mod document;
pub mod driver;
pub mod manager;
pub mod mock;
pub mod options;
pub mod session;

pub use bundle::{BundleCache, BundleOptions, Bundler, EsbuildBundler, Platform};
pub use chrome::find_chrome;
pub use chromium::ChromiumLauncher;
pub use document::{HtmlDocument, DEFAULT_TEMPLATE};
pub use driver::{BrowserLauncher, BrowserPage, BrowserProcess, LaunchOptions};
pub use manager::{Attachment, BrowserSessionManager};
pub use mock::{MockBrowserLog, MockBundler, MockLauncher, MockPageBehavior};
pub use options::{BrowserOptions, OnSetupError};
pub use session::BrowserHandle;
