//! Process-level configuration.
//!
//! Values come from the environment (`EnsayoConfig::from_env`) or from a
//! YAML document with the same shape.

use crate::result::{EnsayoError, EnsayoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable selecting the registration runtime
pub const RUNTIME_ENV: &str = "ENSAYO_RUNTIME";

/// Environment variable enabling snapshot updates
pub const UPDATE_SNAPSHOTS_ENV: &str = "UPDATE_SNAPSHOTS";

/// Environment variable overriding the snapshot directory
pub const SNAPSHOT_DIR_ENV: &str = "ENSAYO_SNAPSHOT_DIR";

/// Environment variable with the default per-test timeout
pub const TIMEOUT_ENV: &str = "ENSAYO_TIMEOUT_MS";

/// Default snapshot directory
pub const DEFAULT_SNAPSHOT_DIR: &str = "__snapshots__";

/// Which underlying test runtime receives registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Eager registration, serial execution, native sanitize controls
    #[default]
    Serial,
    /// Registration only inside suite bodies, no native sanitize controls
    Flat,
}

impl RuntimeKind {
    /// Parse a runtime name (`serial`/`eager` or `flat`/`deferred`)
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "serial" | "eager" => Some(Self::Serial),
            "flat" | "deferred" => Some(Self::Flat),
            _ => None,
        }
    }

    /// Probe the environment for the active runtime
    #[must_use]
    pub fn detect() -> Self {
        std::env::var(RUNTIME_ENV)
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    /// Runtime name as used in configuration
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Flat => "flat",
        }
    }
}

/// Top-level Ensayo configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsayoConfig {
    /// Registration runtime
    pub runtime: RuntimeKind,
    /// Overwrite stored snapshots instead of comparing
    pub update_snapshots: bool,
    /// Directory holding snapshot files
    pub snapshot_dir: PathBuf,
    /// Timeout applied to tests without their own
    pub default_timeout_ms: Option<u64>,
    /// Origin tag reported on every execution context
    pub origin: Option<String>,
}

impl Default for EnsayoConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            update_snapshots: false,
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            default_timeout_ms: None,
            origin: None,
        }
    }
}

impl EnsayoConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(kind) = lookup(RUNTIME_ENV).and_then(|v| RuntimeKind::parse(&v)) {
            config.runtime = kind;
        }
        if let Some(flag) = lookup(UPDATE_SNAPSHOTS_ENV) {
            config.update_snapshots = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        if let Some(dir) = lookup(SNAPSHOT_DIR_ENV).filter(|d| !d.is_empty()) {
            config.snapshot_dir = PathBuf::from(dir);
        }
        config.default_timeout_ms = lookup(TIMEOUT_ENV).and_then(|v| v.trim().parse().ok());
        config
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(yaml: &str) -> EnsayoResult<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> EnsayoResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EnsayoError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Set the runtime
    #[must_use]
    pub const fn with_runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = runtime;
        self
    }

    /// Set snapshot update mode
    #[must_use]
    pub const fn with_update_snapshots(mut self, update: bool) -> Self {
        self.update_snapshots = update;
        self
    }

    /// Set snapshot directory
    #[must_use]
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    /// Set default per-test timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, ms: u64) -> Self {
        self.default_timeout_ms = Some(ms);
        self
    }

    /// Set origin tag
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}
