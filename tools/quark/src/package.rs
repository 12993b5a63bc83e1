//! Package identity and on-disk structure.
//!
//! A package directory looks like:
//!
//! ```text
//! <package>/
//!   metadata.json       { "dependencies": ["libc", ...] }
//!   dependencies.json   per-source-file dependency cache
//!   source/             sources, walked recursively
//!   public/             headers exposed to dependents
//!   build/              mirrored object files
//!   library.lib | application.app | kernel.app
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Layout;

/// Metadata filename within a package directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Dependency cache filename within a package directory.
pub const CACHE_FILE: &str = "dependencies.json";

/// Kind of package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    Kernel,
    Library,
    Application,
}

impl PackageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::Library => "library",
            Self::Application => "application",
        }
    }

    /// Filename of the linked output inside the package directory.
    pub fn output_file_name(self) -> &'static str {
        match self {
            Self::Kernel => "kernel.app",
            Self::Library => "library.lib",
            Self::Application => "application.app",
        }
    }
}

/// Identity of a package: its type plus its name. The kernel is anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    pub ty: PackageType,
    pub name: String,
}

impl PackageId {
    pub fn kernel() -> Self {
        Self {
            ty: PackageType::Kernel,
            name: String::new(),
        }
    }

    pub fn library(name: impl Into<String>) -> Self {
        Self {
            ty: PackageType::Library,
            name: name.into(),
        }
    }

    pub fn application(name: impl Into<String>) -> Self {
        Self {
            ty: PackageType::Application,
            name: name.into(),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            PackageType::Kernel => f.write_str("kernel"),
            ty => write!(f, "{} {}", ty.as_str(), self.name),
        }
    }
}

/// Contents of `metadata.json`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Names of library packages this package depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A package materialized from its directory for one build invocation.
#[derive(Debug)]
pub struct Package {
    pub id: PackageId,
    pub dir: PathBuf,
    metadata: Metadata,
}

impl Package {
    /// Open the package at its layout location.
    ///
    /// A missing `metadata.json` is created with an empty dependency list.
    /// Returns `Ok(None)` if the package directory does not exist.
    pub fn open(layout: &Layout, id: &PackageId) -> Result<Option<Self>> {
        let dir = layout.package_dir(id);
        if !dir.is_dir() {
            return Ok(None);
        }

        let metadata = load_or_create_metadata(&dir.join(METADATA_FILE))?;
        Ok(Some(Self {
            id: id.clone(),
            dir,
            metadata,
        }))
    }

    /// Declared library dependencies. Always empty for the kernel, whatever
    /// its metadata file says.
    pub fn dependencies(&self) -> &[String] {
        match self.id.ty {
            PackageType::Kernel => &[],
            PackageType::Library | PackageType::Application => &self.metadata.dependencies,
        }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.dir.join("source")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.dir.join("build")
    }

    pub fn public_dir(&self) -> PathBuf {
        self.dir.join("public")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE)
    }

    /// Path of the linked archive or binary.
    pub fn output_path(&self) -> PathBuf {
        self.dir.join(self.id.ty.output_file_name())
    }
}

fn load_or_create_metadata(path: &Path) -> Result<Metadata> {
    if !path.exists() {
        let metadata = Metadata::default();
        let json = serde_json::to_string(&metadata).context("failed to serialize metadata")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to create {}", path.display()))?;
        return Ok(metadata);
    }

    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}
