//! Project configuration.
//!
//! Two files live at the project root:
//! - `tools.json` (required for building): maps logical tool names
//!   (`gcc`, `ld`, `nasm`, `grub-mkrescue`, `qemu`) to executable paths.
//! - `quark.toml` (optional): project name, directory layout overrides,
//!   and per-command flag overrides.
//!
//! Flag strings may contain `{root}` and `{iso}` placeholders, which are
//! expanded once when the configuration is resolved.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::error::BuildError;
use crate::package::{PackageId, PackageType};

/// Tool-path configuration filename.
pub const TOOLS_FILE: &str = "tools.json";

/// Optional project configuration filename.
pub const PROJECT_FILE: &str = "quark.toml";

/// Find the project root, as an absolute path without symlinks.
///
/// An explicit `--root` wins. Otherwise walk up from the working directory
/// looking for `quark.toml`, then for `tools.json`, and fall back to the
/// working directory itself.
pub fn find_project_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        if !root.is_dir() {
            bail!("project root {} is not a directory", root.display());
        }
        return canonical(root);
    }

    let cwd = canonical(Path::new("."))?;
    for marker in [PROJECT_FILE, TOOLS_FILE] {
        if let Some(dir) = cwd.ancestors().find(|dir| dir.join(marker).is_file()) {
            return Ok(dir.to_path_buf());
        }
    }
    Ok(cwd)
}

/// Every cache key and object path is derived from the root, so it must have
/// one spelling however it was given.
fn canonical(dir: &Path) -> Result<PathBuf> {
    dir.canonicalize()
        .with_context(|| format!("failed to resolve project root {}", dir.display()))
}

// ---------------------------------------------------------------------------
// tools.json
// ---------------------------------------------------------------------------

/// Logical tool name to executable path, as read from `tools.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ToolPaths {
    tools: BTreeMap<String, String>,
}

impl ToolPaths {
    /// Load `tools.json` from the project root.
    ///
    /// A missing file is a [`BuildError::ConfigMissing`].
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(TOOLS_FILE);
        if !path.is_file() {
            return Err(BuildError::ConfigMissing { path }.into());
        }
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Look up a required tool.
    pub fn get(&self, name: &str) -> Result<&str> {
        self.tools
            .get(name)
            .map(String::as_str)
            .with_context(|| format!("no `{name}` entry in {TOOLS_FILE}"))
    }

    /// Look up a tool, falling back to `default` when it is not configured.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.tools.get(name).map_or(default, String::as_str)
    }
}

impl FromIterator<(String, String)> for ToolPaths {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            tools: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// quark.toml
// ---------------------------------------------------------------------------

/// Top-level contents of `quark.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectFile {
    pub project: ProjectSection,
    pub layout: LayoutSection,
    pub flags: Flags,
}

/// `[project]` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectSection {
    /// Names the disk image (`<name>.iso`).
    pub name: String,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: "Perception".into(),
        }
    }
}

/// `[layout]` section. Paths are relative to the project root.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct LayoutSection {
    pub kernel: PathBuf,
    pub libraries: PathBuf,
    pub applications: PathBuf,
    pub fs: PathBuf,
}

impl Default for LayoutSection {
    fn default() -> Self {
        Self {
            kernel: "Kernel".into(),
            libraries: "Libraries".into(),
            applications: "Applications".into(),
            fs: "fs".into(),
        }
    }
}

/// `[flags]` section: the arguments placed between each tool's executable
/// and the per-file arguments quark appends itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Flags {
    pub cc: Vec<String>,
    pub kernel_cc: Vec<String>,
    pub asm: Vec<String>,
    pub library_ld: Vec<String>,
    pub application_ld: Vec<String>,
    pub kernel_ld: Vec<String>,
    pub mkrescue: Vec<String>,
    pub emulator: Vec<String>,
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            cc: strings(&[
                "-O3", "-m64", "-ffreestanding", "-nostdlib", "-nostdinc++", "-mno-red-zone", "-c",
            ]),
            kernel_cc: strings(&[
                "-m64",
                "-mcmodel=kernel",
                "-ffreestanding",
                "-fno-builtin",
                "-nostdlib",
                "-nostdinc",
                "-mno-red-zone",
                "-c",
                "-msoft-float",
                "-mno-mmx",
                "-mno-sse",
                "-mno-sse2",
                "-mno-3dnow",
                "-mno-avx",
                "-mno-avx2",
            ]),
            asm: strings(&["-felf64"]),
            library_ld: strings(&["-nodefaultlibs", "-relocatable"]),
            application_ld: strings(&[
                "-nodefaultlibs",
                "-T",
                "{root}/Build/userland.ld",
                "-Map={root}/Build/map.txt",
            ]),
            kernel_ld: strings(&[
                "-nodefaultlibs",
                "-T",
                "{root}/Kernel/source/linker.ld",
                "-Map={root}/Build/map.txt",
            ]),
            mkrescue: Vec::new(),
            emulator: strings(&["-boot", "d", "-cdrom", "{iso}", "-m", "512", "-serial", "stdio"]),
        }
    }
}

impl Flags {
    /// Replace `{root}` and `{iso}` in every flag.
    fn expand(&mut self, root: &Path, iso: &Path) {
        let root = root.display().to_string();
        let iso = iso.display().to_string();
        for list in [
            &mut self.cc,
            &mut self.kernel_cc,
            &mut self.asm,
            &mut self.library_ld,
            &mut self.application_ld,
            &mut self.kernel_ld,
            &mut self.mkrescue,
            &mut self.emulator,
        ] {
            for arg in list.iter_mut() {
                *arg = arg.replace("{root}", &root).replace("{iso}", &iso);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Absolute on-disk locations of every package, output, and staged file.
#[derive(Debug, Clone)]
pub struct Layout {
    pub kernel_dir: PathBuf,
    pub libraries_dir: PathBuf,
    pub applications_dir: PathBuf,
    pub fs_dir: PathBuf,
    pub iso_path: PathBuf,
}

impl Layout {
    /// Build a layout from a `[layout]` section rooted at `root`.
    pub fn new(root: &Path, section: &LayoutSection, project_name: &str) -> Self {
        Self {
            kernel_dir: root.join(&section.kernel),
            libraries_dir: root.join(&section.libraries),
            applications_dir: root.join(&section.applications),
            fs_dir: root.join(&section.fs),
            iso_path: root.join(format!("{project_name}.iso")),
        }
    }

    /// The default layout rooted at `root`.
    #[cfg(test)]
    pub fn with_defaults(root: &Path) -> Self {
        Self::new(root, &LayoutSection::default(), &ProjectSection::default().name)
    }

    /// Directory holding a package's `source/`, `public/`, metadata and outputs.
    pub fn package_dir(&self, id: &PackageId) -> PathBuf {
        match id.ty {
            PackageType::Kernel => self.kernel_dir.clone(),
            PackageType::Library => self.libraries_dir.join(&id.name),
            PackageType::Application => self.applications_dir.join(&id.name),
        }
    }

    /// Where the kernel binary is staged for the boot image.
    pub fn staged_kernel_path(&self) -> PathBuf {
        self.fs_dir.join("boot").join(PackageType::Kernel.output_file_name())
    }

    /// Where an application binary is staged for the boot image.
    pub fn staged_application_path(&self, name: &str) -> PathBuf {
        self.fs_dir.join(format!("{name}.app"))
    }
}

/// Everything a build needs to know about the project.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub project_name: String,
    pub layout: Layout,
    pub tools: ToolPaths,
    pub flags: Flags,
}

impl ResolvedConfig {
    /// Resolve configuration for a build: requires `tools.json`.
    pub fn load(root: &Path) -> Result<Self> {
        let tools = ToolPaths::load(root)?;
        Self::load_with_tools(root, tools)
    }

    /// Resolve configuration with an already-loaded tool map.
    pub fn load_with_tools(root: &Path, tools: ToolPaths) -> Result<Self> {
        let project = load_project_file(root)?;
        let layout = Layout::new(root, &project.layout, &project.project.name);
        let mut flags = project.flags;
        flags.expand(root, &layout.iso_path);

        Ok(Self {
            project_name: project.project.name,
            layout,
            tools,
            flags,
        })
    }
}

/// Read `quark.toml`, or return the defaults if it does not exist.
pub fn load_project_file(root: &Path) -> Result<ProjectFile> {
    let path = root.join(PROJECT_FILE);
    if !path.is_file() {
        return Ok(ProjectFile::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
