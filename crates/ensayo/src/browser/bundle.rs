//! Bundling entry modules into browser-loadable scripts.
//!
//! [`BundleCache`] memoizes builds per entry and option set, keyed on the
//! entry file's modification time.

use crate::result::{EnsayoError, EnsayoResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

/// Default bundle target
pub const DEFAULT_TARGET: &str = "es2020";

/// Pause between retries of a transiently failed build
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// Retries after the first transient failure
pub const MAX_BUNDLE_RETRIES: usize = 2;

/// Platform the bundle is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    #[default]
    Browser,
    Node,
}

impl Platform {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Node => "node",
        }
    }
}

/// Build options; every field is part of the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleOptions {
    /// Expose the entry's exports as `window[global_name]`
    pub global_name: Option<String>,
    pub platform: Platform,
    /// ECMAScript target such as `es2020`
    pub target: String,
    pub minify: bool,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            global_name: None,
            platform: Platform::default(),
            target: DEFAULT_TARGET.to_string(),
            minify: false,
        }
    }
}

impl BundleOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_global_name(mut self, name: impl Into<String>) -> Self {
        self.global_name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
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
}

/// Produces browser-executable source text from an entry module
#[async_trait]
pub trait Bundler: Send + Sync + fmt::Debug {
    /// Build `entry`; a transiently unavailable bundler reports
    /// [`EnsayoError::BundlerUnavailable`]
    async fn build(&self, entry: &Path, options: &BundleOptions) -> EnsayoResult<String>;
}

/// Bundler shelling out to the `esbuild` binary
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    binary: PathBuf,
}

impl Default for EsbuildBundler {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("esbuild"),
        }
    }
}

impl EsbuildBundler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific esbuild executable
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Command-line arguments for one build
    #[must_use]
    pub fn args(entry: &Path, options: &BundleOptions) -> Vec<String> {
        let mut args = vec![
            entry.to_string_lossy().into_owned(),
            "--bundle".to_string(),
            "--format=iife".to_string(),
            format!("--platform={}", options.platform.as_str()),
            format!("--target={}", options.target),
        ];
        if let Some(global) = &options.global_name {
            args.push(format!("--global-name={global}"));
        }
        if options.minify {
            args.push("--minify".to_string());
        }
        args
    }
}

fn service_stopped(stderr: &str) -> bool {
    stderr.contains("service was stopped") || stderr.contains("service is no longer running")
}

#[async_trait]
impl Bundler for EsbuildBundler {
    async fn build(&self, entry: &Path, options: &BundleOptions) -> EnsayoResult<String> {
        let shown = entry.display().to_string();
        let output = tokio::process::Command::new(&self.binary)
            .args(Self::args(entry, options))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EnsayoError::Bundle {
                    entry: shown.clone(),
                    message: format!("{} not found: {e}", self.binary.display()),
                },
                _ => EnsayoError::BundlerUnavailable {
                    message: e.to_string(),
                },
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if service_stopped(&stderr) {
            return Err(EnsayoError::BundlerUnavailable { message: stderr });
        }
        if !output.status.success() {
            return Err(EnsayoError::Bundle {
                entry: shown,
                message: stderr.trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|e| EnsayoError::Bundle {
            entry: shown,
            message: format!("bundle is not UTF-8: {e}"),
        })
    }
}

type CacheKey = (PathBuf, BundleOptions);

#[derive(Debug, Clone)]
struct CachedBundle {
    modified: SystemTime,
    code: String,
}

/// Memoizing front of a [`Bundler`]
#[derive(Debug)]
pub struct BundleCache {
    bundler: Arc<dyn Bundler>,
    entries: Mutex<HashMap<CacheKey, CachedBundle>>,
    retry_delay: Duration,
}

impl BundleCache {
    #[must_use]
    pub fn new(bundler: Arc<dyn Bundler>) -> Self {
        Self {
            bundler,
            entries: Mutex::new(HashMap::new()),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    /// Change the pause between transient-failure retries
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Number of cached bundles
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bundle `entry`, reusing the cached build while its mtime is unchanged
    pub async fn get(&self, entry: &Path, options: &BundleOptions) -> EnsayoResult<String> {
        let modified = std::fs::metadata(entry)
            .and_then(|meta| meta.modified())
            .map_err(|e| EnsayoError::Bundle {
                entry: entry.display().to_string(),
                message: e.to_string(),
            })?;
        let key = (entry.to_path_buf(), options.clone());

        let cached = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .filter(|hit| hit.modified == modified)
            .map(|hit| hit.code.clone());
        if let Some(code) = cached {
            tracing::debug!(entry = %entry.display(), "bundle cache hit");
            return Ok(code);
        }

        let code = self.build_with_retry(entry, options).await?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                CachedBundle {
                    modified,
                    code: code.clone(),
                },
            );
        Ok(code)
    }

    async fn build_with_retry(&self, entry: &Path, options: &BundleOptions) -> EnsayoResult<String> {
        let mut attempt = 0;
        loop {
            match self.bundler.build(entry, options).await {
                Err(e) if e.is_transient() && attempt < MAX_BUNDLE_RETRIES => {
                    attempt += 1;
                    tracing::warn!(entry = %entry.display(), attempt, error = %e, "retrying bundle");
                    tokio::time::sleep(self.retry_delay).await;
                }
                other => return other,
            }
        }
    }
}
