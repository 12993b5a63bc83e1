//! Remove every build product.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Layout;
use crate::package::{CACHE_FILE, PackageId};
use crate::verbose::dprintln;

/// Delete object trees, caches, linked outputs, staged binaries and the disk
/// image. Sources, metadata and `public/` headers are left alone.
///
/// Returns the number of paths removed.
pub fn clean(layout: &Layout) -> Result<usize> {
    let mut removed = 0;

    let kernel = PackageId::kernel();
    removed += clean_package(layout, &kernel)?;
    removed += remove(&layout.staged_kernel_path())?;

    for name in package_dirs(&layout.libraries_dir)? {
        removed += clean_package(layout, &PackageId::library(name))?;
    }

    for name in package_dirs(&layout.applications_dir)? {
        removed += remove(&layout.staged_application_path(&name))?;
        removed += clean_package(layout, &PackageId::application(name))?;
    }

    removed += remove(&layout.iso_path)?;

    if removed == 0 {
        dprintln!("Nothing to clean.");
    }
    Ok(removed)
}

fn clean_package(layout: &Layout, id: &PackageId) -> Result<usize> {
    let dir = layout.package_dir(id);
    let mut removed = 0;
    for path in [
        dir.join("build"),
        dir.join(CACHE_FILE),
        dir.join(id.ty.output_file_name()),
    ] {
        removed += remove(&path)?;
    }
    Ok(removed)
}

/// Subdirectory names of `root`. A missing root has none.
fn package_dirs(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("failed to list {}", root.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// Remove a file or directory tree if it exists.
fn remove(path: &Path) -> Result<usize> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(0);
    };
    dprintln!("Removing {}", path.display());
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{METADATA_FILE, PackageType};

    fn write(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn removes_products_and_keeps_sources() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::with_defaults(dir.path());
        let libc = layout.package_dir(&PackageId::library("libc"));
        let shell = layout.package_dir(&PackageId::application("shell"));

        for pkg in [&layout.kernel_dir, &libc, &shell] {
            write(&pkg.join("source/main.c"));
            write(&pkg.join("public/api.h"));
            write(&pkg.join(METADATA_FILE));
            write(&pkg.join("build/main.c.obj"));
            write(&pkg.join(CACHE_FILE));
        }
        write(&layout.kernel_dir.join(PackageType::Kernel.output_file_name()));
        write(&libc.join(PackageType::Library.output_file_name()));
        write(&shell.join(PackageType::Application.output_file_name()));
        write(&layout.staged_kernel_path());
        write(&layout.staged_application_path("shell"));
        write(&layout.iso_path);

        // 3 packages x 3 products, 2 staged binaries, 1 image.
        assert_eq!(clean(&layout).unwrap(), 12);

        for pkg in [&layout.kernel_dir, &libc, &shell] {
            assert!(pkg.join("source/main.c").exists());
            assert!(pkg.join("public/api.h").exists());
            assert!(pkg.join(METADATA_FILE).exists());
            assert!(!pkg.join("build").exists());
            assert!(!pkg.join(CACHE_FILE).exists());
        }
        assert!(!layout.staged_kernel_path().exists());
        assert!(!layout.staged_application_path("shell").exists());
        assert!(!layout.iso_path.exists());

        assert_eq!(clean(&layout).unwrap(), 0);
    }

    #[test]
    fn empty_tree_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(clean(&Layout::with_defaults(dir.path())).unwrap(), 0);
    }
}
