//! Per-package dependency cache and staleness evaluation.
//!
//! Each package keeps a `dependencies.json` mapping every compiled source
//! file to the files the compiler reported it depends on. A source file is
//! up to date when its object file exists and is strictly newer than every
//! recorded dependency.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::verbose::{vprintln, wprintln};

/// Result of a freshness check on one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The object file can be reused.
    Fresh,
    /// The file must be recompiled, with a human-readable reason.
    Stale(String),
}

impl Freshness {
    /// Returns `true` if the result is `Fresh`.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Source path to the ordered list of files it depends on.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyCache {
    records: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl DependencyCache {
    /// Load the cache at `path`.
    ///
    /// A missing file is an empty cache (first build). A corrupt file is
    /// reported and also treated as empty, which forces every file in the
    /// package to recompile and rewrites the cache.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            vprintln!("  no dependency cache at {}", path.display());
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match serde_json::from_str(&data) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                wprintln!("ignoring corrupt dependency cache {}: {e}", path.display());
                Ok(Self::default())
            }
        }
    }

    /// Overwrite the cache at `path` atomically (write to tmp, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let json = serde_json::to_string_pretty(self)
            .context("failed to serialize dependency cache")?;
        fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;

        vprintln!("  dependency cache: saved {} records", self.len());
        Ok(())
    }

    /// Recorded dependencies of `source`, if it has ever compiled.
    pub fn get(&self, source: &Path) -> Option<&[PathBuf]> {
        self.records.get(source).map(Vec::as_slice)
    }

    /// Replace the record for `source` after a successful compilation.
    pub fn record(&mut self, source: PathBuf, deps: Vec<PathBuf>) {
        self.records.insert(source, deps);
    }

    /// Drop records for sources not in `sources`. Returns how many went.
    pub fn retain_sources(&mut self, sources: &HashSet<PathBuf>) -> usize {
        let before = self.records.len();
        self.records.retain(|source, _| sources.contains(source));
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Last-modified times memoized for one build invocation.
///
/// A missing file is remembered as `None`, which staleness checks treat as
/// newer than anything.
#[derive(Debug, Default)]
pub struct Timestamps {
    memo: HashMap<PathBuf, Option<SystemTime>>,
}

impl Timestamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-modified time of `path`, or `None` if it does not exist.
    pub fn modified(&mut self, path: &Path) -> Option<SystemTime> {
        if let Some(cached) = self.memo.get(path) {
            return *cached;
        }
        let mtime = file_mtime(path);
        self.memo.insert(path.to_path_buf(), mtime);
        mtime
    }
}

/// Decide whether `source` must be recompiled into `object`.
///
/// 1. No object file: stale.
/// 2. No dependency record: stale, the compiler has to tell us.
/// 3. Any recorded dependency missing, or modified at or after the object
///    file: stale.
pub fn check(
    source: &Path,
    record: Option<&[PathBuf]>,
    object: &Path,
    stamps: &mut Timestamps,
) -> Freshness {
    // The object's own time is not memoized: it changes during the build.
    let Some(object_mtime) = file_mtime(object) else {
        return Freshness::Stale(format!("{} has no object file", source.display()));
    };

    let Some(deps) = record else {
        return Freshness::Stale(format!("{} has no recorded dependencies", source.display()));
    };

    for dep in deps {
        match stamps.modified(dep) {
            None => {
                return Freshness::Stale(format!("dependency missing: {}", dep.display()));
            }
            Some(mtime) if mtime >= object_mtime => {
                return Freshness::Stale(format!("{} changed", dep.display()));
            }
            Some(_) => {}
        }
    }

    Freshness::Fresh
}

/// A file's last-modified time, or `None` if it cannot be read.
pub fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok()?.modified().ok()
}
