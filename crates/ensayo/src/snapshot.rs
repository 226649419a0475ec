//! On-disk value snapshots.
//!
//! Snapshots are stored as pretty-printed JSON in `<dir>/<key>.snap`, where
//! the key is the sanitized snapshot name. A missing file is created, update
//! mode overwrites, and otherwise the stored text must match exactly.

use crate::config::EnsayoConfig;
use crate::matcher::Value;
use crate::result::{EnsayoError, EnsayoResult};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// File extension of stored snapshots
pub const SNAPSHOT_EXTENSION: &str = "snap";

/// What `assert_snapshot` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// No stored snapshot existed; one was written
    Created,
    /// Update mode overwrote the stored snapshot
    Updated,
    /// Stored snapshot matched
    Matched,
}

/// Directory of stored snapshots
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    update: bool,
}

impl SnapshotStore {
    /// Create a store rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            update: false,
        }
    }

    /// Store configured from `snapshot_dir` and `update_snapshots`
    #[must_use]
    pub fn from_config(config: &EnsayoConfig) -> Self {
        Self::new(config.snapshot_dir.clone()).with_update(config.update_snapshots)
    }

    /// Set update mode
    #[must_use]
    pub const fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    /// Snapshot directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether mismatches overwrite instead of failing
    #[must_use]
    pub const fn is_update(&self) -> bool {
        self.update
    }

    /// File holding the snapshot for `name`
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{SNAPSHOT_EXTENSION}", sanitize_key(name)))
    }

    /// Compare a serializable value against its stored snapshot
    pub fn assert_snapshot<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> EnsayoResult<SnapshotOutcome> {
        let text = serde_json::to_string_pretty(value)?;
        self.assert_text(name, &text)
    }

    /// Compare a matcher value against its stored snapshot
    pub fn assert_value(&self, name: &str, value: &Value) -> EnsayoResult<SnapshotOutcome> {
        let text = serde_json::to_string_pretty(&value.to_json())?;
        self.assert_text(name, &text)
    }

    fn assert_text(&self, name: &str, received: &str) -> EnsayoResult<SnapshotOutcome> {
        let path = self.path_for(name);
        if !path.exists() {
            self.write(&path, received)?;
            tracing::info!(snapshot = name, path = %path.display(), "snapshot created");
            return Ok(SnapshotOutcome::Created);
        }
        if self.update {
            self.write(&path, received)?;
            tracing::info!(snapshot = name, path = %path.display(), "snapshot updated");
            return Ok(SnapshotOutcome::Updated);
        }
        let stored = std::fs::read_to_string(&path)?;
        if stored.trim_end() == received.trim_end() {
            Ok(SnapshotOutcome::Matched)
        } else {
            Err(EnsayoError::SnapshotMismatch {
                name: name.to_string(),
                diff: line_diff(&stored, received),
            })
        }
    }

    fn write(&self, path: &Path, text: &str) -> EnsayoResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(path, format!("{text}\n"))?;
        Ok(())
    }
}

/// Reduce a test name to a file-safe key.
///
/// Characters outside `[A-Za-z0-9_-]` become `_`, runs of `_` collapse, and
/// leading/trailing `_` are trimmed.
#[must_use]
pub fn sanitize_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        };
        if c == '_' && key.ends_with('_') {
            continue;
        }
        key.push(c);
    }
    let trimmed = key.trim_matches('_');
    if trimmed.is_empty() {
        "snapshot".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Line diff in `- stored` / `+ received` form.
///
/// Lines common to both sides are matched through a longest-common-subsequence
/// table and printed with two spaces.
#[must_use]
pub fn line_diff(stored: &str, received: &str) -> String {
    let old: Vec<&str> = stored.lines().collect();
    let new: Vec<&str> = received.lines().collect();
    let (n, m) = (old.len(), new.len());
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            out.push(format!("  {}", old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(format!("- {}", old[i]));
            i += 1;
        } else {
            out.push(format!("+ {}", new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|line| format!("- {line}")));
    out.extend(new[j..].iter().map(|line| format!("+ {line}")));
    out.join("\n")
}
