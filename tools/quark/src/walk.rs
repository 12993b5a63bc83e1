//! Recursive source tree enumeration with a mirrored output tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// A regular file under the source root and its mirrored output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub source: PathBuf,
    pub mirror: PathBuf,
}

/// Lazily yields every regular file under a source root, creating the
/// matching directory under the mirror root as each directory is entered.
///
/// Entries come in directory-listing order. Symlinks are not followed and
/// not yielded.
pub struct SourceWalker {
    inner: Option<walkdir::IntoIter>,
    source_root: PathBuf,
    mirror_root: PathBuf,
}

/// Walk `source_root`, mirroring its directories under `mirror_root`.
///
/// A missing source root yields nothing.
pub fn walk(source_root: &Path, mirror_root: &Path) -> SourceWalker {
    let inner = source_root
        .is_dir()
        .then(|| WalkDir::new(source_root).follow_links(false).into_iter());
    SourceWalker {
        inner,
        source_root: source_root.to_path_buf(),
        mirror_root: mirror_root.to_path_buf(),
    }
}

impl SourceWalker {
    fn mirror_of(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.source_root) {
            Ok(rel) if rel.as_os_str().is_empty() => self.mirror_root.clone(),
            Ok(rel) => self.mirror_root.join(rel),
            Err(_) => self.mirror_root.join(path.file_name().unwrap_or_default()),
        }
    }
}

impl Iterator for SourceWalker {
    type Item = Result<SourceEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.as_mut()?.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    return Some(Err(e).context("failed to read source directory"));
                }
            };

            let mirror = self.mirror_of(entry.path());
            let file_type = entry.file_type();
            if file_type.is_dir() {
                if let Err(e) = std::fs::create_dir_all(&mirror) {
                    return Some(Err(e).with_context(|| {
                        format!("failed to create {}", mirror.display())
                    }));
                }
            } else if file_type.is_file() {
                return Some(Ok(SourceEntry {
                    source: entry.into_path(),
                    mirror,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("source");
        let out = dir.path().join("build");
        std::fs::create_dir_all(src.join("drivers/ps2")).unwrap();
        std::fs::create_dir_all(src.join("empty")).unwrap();
        std::fs::write(src.join("main.cc"), "").unwrap();
        std::fs::write(src.join("drivers/ps2/keyboard.cc"), "").unwrap();

        let mut entries: Vec<SourceEntry> = walk(&src, &out).map(Result::unwrap).collect();
        entries.sort_by(|a, b| a.source.cmp(&b.source));

        assert_eq!(
            entries,
            vec![
                SourceEntry {
                    source: src.join("drivers/ps2/keyboard.cc"),
                    mirror: out.join("drivers/ps2/keyboard.cc"),
                },
                SourceEntry {
                    source: src.join("main.cc"),
                    mirror: out.join("main.cc"),
                },
            ]
        );
        assert!(out.join("drivers/ps2").is_dir());
        // Directories are mirrored even when they hold nothing buildable.
        assert!(out.join("empty").is_dir());
    }

    #[test]
    fn walking_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("source");
        let out = dir.path().join("build");
        std::fs::create_dir_all(src.join("a")).unwrap();
        std::fs::write(src.join("a/x.c"), "").unwrap();

        assert_eq!(walk(&src, &out).count(), 1);
        assert_eq!(walk(&src, &out).count(), 1);
    }

    #[test]
    fn missing_source_root_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(walk(&dir.path().join("source"), &dir.path().join("build")).count(), 0);
        assert!(!dir.path().join("build").exists());
    }
}
