//! Result and error types for Ensayo.

use thiserror::Error;

/// Result type for Ensayo operations
pub type EnsayoResult<T> = Result<T, EnsayoError>;

/// Errors that can occur in Ensayo
#[derive(Debug, Error)]
pub enum EnsayoError {
    /// Wrong argument shape or a call made outside its valid window
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Assertion failed (from `expect()` and the `assert_*` helpers)
    #[error("Assertion failed: {message}")]
    Assertion {
        /// Error message
        message: String,
    },

    /// A lifecycle hook failed
    #[error("{kind} hook failed in '{suite}': {message}")]
    Hook {
        /// Hook kind (`beforeAll`, `beforeEach`, ...)
        kind: String,
        /// Suite path that owns the hook
        suite: String,
        /// Error message
        message: String,
    },

    /// Test body panicked
    #[error("Test panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Browser executable not found
    #[error("Browser not found. Install Chromium or set CHROME_PATH")]
    BrowserNotFound,

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Browser context could not be prepared for a test
    #[error("Browser setup failed: {message}")]
    BrowserSetup {
        /// Error message, including captured in-page console output
        message: String,
    },

    /// Page error
    #[error("Page error: {message}")]
    Page {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// In-page evaluation error
    #[error("Evaluation failed: {message}")]
    Evaluation {
        /// Error message
        message: String,
    },

    /// Bundler reported a build failure
    #[error("Bundling {entry} failed: {message}")]
    Bundle {
        /// Entry point that failed
        entry: String,
        /// Error message
        message: String,
    },

    /// Bundler service was transiently unavailable
    #[error("Bundler unavailable: {message}")]
    BundlerUnavailable {
        /// Error message
        message: String,
    },

    /// Snapshot mismatch
    #[error("Snapshot mismatch: {name}\n{diff}")]
    SnapshotMismatch {
        /// Snapshot name
        name: String,
        /// Line diff between stored and received values
        diff: String,
    },

    /// Network error in fetch pass-through
    #[error("Network error: {message}")]
    Network {
        /// Error message
        message: String,
    },

    /// Invalid state error (operation called in wrong state)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// A primary failure accompanied by failures raised during cleanup
    #[error("{source}\n  while cleaning up: {}", .cleanup.join("; "))]
    WithCleanupFailures {
        /// The failure that decided the outcome
        source: Box<EnsayoError>,
        /// Messages of the cleanup failures that followed it
        cleanup: Vec<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl EnsayoError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an assertion error
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Create an invalid-state error
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::BundlerUnavailable { .. })
    }

    /// Whether this is a timeout failure
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::WithCleanupFailures { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Render a caught panic payload as text
#[must_use]
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_carries_value() {
        let err = EnsayoError::Timeout { ms: 250 };
        assert_eq!(err.to_string(), "Operation timed out after 250ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_cleanup_failures_surface_both() {
        let err = EnsayoError::WithCleanupFailures {
            source: Box::new(EnsayoError::assertion("expected 2, received 1")),
            cleanup: vec!["afterEach exploded".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("expected 2, received 1"));
        assert!(text.contains("afterEach exploded"));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_only_bundler_unavailable_is_transient() {
        assert!(EnsayoError::BundlerUnavailable {
            message: "service stopped".into()
        }
        .is_transient());
        assert!(!EnsayoError::config("nope").is_transient());
    }

    #[test]
    fn test_panic_message_payloads() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 1");
        let caught = std::panic::catch_unwind(|| std::panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "non-string panic payload");
    }
}
