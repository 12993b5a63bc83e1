//! Whole-system build: kernel, every application, then the boot image.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::cache;
use crate::config::{Layout, ResolvedConfig};
use crate::image;
use crate::package::PackageId;
use crate::resolver::{BuildContext, BuildOutcome};
use crate::verbose::{dprintln, vprintln, wprintln};

/// What [`build_packages`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    /// Overall outcome. `Failed` means later packages were not attempted.
    pub outcome: BuildOutcome,
    /// Whether any binary was copied into the staging filesystem.
    pub staged: bool,
}

/// Build the kernel and every application, copying each binary into the
/// staging filesystem when it is newer than the staged copy.
///
/// The first failed package stops the run.
pub fn build_packages(ctx: &mut BuildContext<'_>) -> Result<StageReport> {
    let layout = ctx.layout();
    let mut report = StageReport {
        outcome: BuildOutcome::AlreadyUpToDate,
        staged: false,
    };

    let kernel = PackageId::kernel();
    if !stage(ctx, &kernel, &layout.staged_kernel_path(), &mut report)? {
        return Ok(report);
    }

    for name in application_names(layout)? {
        let staged = layout.staged_application_path(&name);
        if !stage(ctx, &PackageId::application(name), &staged, &mut report)? {
            return Ok(report);
        }
    }

    Ok(report)
}

/// Resolve one package and stage its binary. Returns `false` on failure.
fn stage(
    ctx: &mut BuildContext<'_>,
    id: &PackageId,
    destination: &Path,
    report: &mut StageReport,
) -> Result<bool> {
    match ctx.resolve(id)? {
        BuildOutcome::Failed => {
            eprintln!("Compile error. Stopping the world.");
            report.outcome = BuildOutcome::Failed;
            return Ok(false);
        }
        BuildOutcome::Recompiled => report.outcome = BuildOutcome::Recompiled,
        BuildOutcome::AlreadyUpToDate => {}
    }

    let output = ctx.layout().package_dir(id).join(id.ty.output_file_name());
    report.staged |= copy_if_newer(&output, destination)?;
    Ok(true)
}

/// Build everything and assemble the boot image if anything was staged or
/// the image does not exist yet.
pub fn build_everything(ctx: &mut BuildContext<'_>, config: &ResolvedConfig) -> Result<BuildOutcome> {
    let report = build_packages(ctx)?;
    if report.outcome.is_failed() {
        return Ok(BuildOutcome::Failed);
    }

    if !report.staged && config.layout.iso_path.exists() {
        vprintln!("  {}: up to date", config.layout.iso_path.display());
        return Ok(report.outcome);
    }

    match image::assemble(config) {
        Ok(()) => Ok(BuildOutcome::Recompiled),
        Err(e) => {
            eprintln!("error: {e:#}");
            Ok(BuildOutcome::Failed)
        }
    }
}

/// Names of the directories under the applications root, in listing order.
///
/// A missing applications root has no applications.
pub fn application_names(layout: &Layout) -> Result<Vec<String>> {
    let root = &layout.applications_dir;
    if !root.is_dir() {
        vprintln!("  no applications directory at {}", root.display());
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("failed to list {}", root.display()))? {
        let entry = entry.with_context(|| format!("failed to list {}", root.display()))?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => wprintln!("skipping non-UTF-8 application {name:?}"),
        }
    }
    Ok(names)
}

/// Copy `source` to `destination` unless the destination is at least as
/// new. Returns whether a copy happened.
pub fn copy_if_newer(source: &Path, destination: &Path) -> Result<bool> {
    if let Some(existing) = cache::file_mtime(destination) {
        let built = cache::file_mtime(source)
            .with_context(|| format!("{} does not exist", source.display()))?;
        if built <= existing {
            return Ok(false);
        }
        fs::remove_file(destination)
            .with_context(|| format!("failed to remove {}", destination.display()))?;
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    dprintln!("Copying {}", destination.display());
    fs::copy(source, destination).with_context(|| {
        format!("failed to copy {} to {}", source.display(), destination.display())
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::BuildOptions;
    use crate::package::METADATA_FILE;
    use crate::toolchain::testing::FakeTools;
    use std::time::{Duration, SystemTime};

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
    }

    struct System {
        _dir: tempfile::TempDir,
        layout: Layout,
        tools: FakeTools,
    }

    impl System {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = Layout::with_defaults(dir.path());
            let tools = FakeTools::install(&dir.path().join("tools"));
            Self {
                _dir: dir,
                layout,
                tools,
            }
        }

        fn add(&self, id: &PackageId, deps: &[&str], file: &str, content: &str) {
            let pkg = self.layout.package_dir(id);
            fs::create_dir_all(pkg.join("source")).unwrap();
            let metadata = serde_json::json!({ "dependencies": deps });
            fs::write(pkg.join(METADATA_FILE), metadata.to_string()).unwrap();
            let path = pkg.join("source").join(file);
            fs::write(&path, content).unwrap();
            set_mtime(&path, SystemTime::now() - Duration::from_secs(120));
        }

        fn build(&self) -> StageReport {
            let toolchain = self.tools.toolchain();
            let mut ctx = BuildContext::new(&self.layout, &toolchain, BuildOptions::default());
            build_packages(&mut ctx).unwrap()
        }
    }

    #[test]
    fn copy_skips_older_or_equal_sources() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("application.app");
        let destination = dir.path().join("fs/shell.app");
        fs::write(&source, "v1").unwrap();

        assert!(copy_if_newer(&source, &destination).unwrap());
        assert_eq!(fs::read_to_string(&destination).unwrap(), "v1");

        let now = SystemTime::now();
        set_mtime(&source, now);
        set_mtime(&destination, now);
        assert!(!copy_if_newer(&source, &destination).unwrap());

        fs::write(&source, "v2").unwrap();
        set_mtime(&source, now + Duration::from_secs(5));
        assert!(copy_if_newer(&source, &destination).unwrap());
        assert_eq!(fs::read_to_string(&destination).unwrap(), "v2");
    }

    #[test]
    fn only_directories_are_applications() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::with_defaults(dir.path());
        fs::create_dir_all(layout.applications_dir.join("shell")).unwrap();
        fs::create_dir_all(layout.applications_dir.join("clock")).unwrap();
        fs::write(layout.applications_dir.join("README.md"), "").unwrap();

        let mut names = application_names(&layout).unwrap();
        names.sort();
        assert_eq!(names, ["clock", "shell"]);
    }

    #[test]
    fn missing_applications_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(application_names(&Layout::with_defaults(dir.path())).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn stages_kernel_and_applications_once() {
        let s = System::new();
        s.add(&PackageId::kernel(), &[], "main.c", "int k;\n");
        s.add(&PackageId::library("libc"), &[], "libc.c", "int c;\n");
        s.add(&PackageId::application("shell"), &["libc"], "main.c", "int s;\n");
        s.add(&PackageId::application("clock"), &["libc"], "main.c", "int t;\n");

        let first = s.build();
        assert_eq!(first, StageReport { outcome: BuildOutcome::Recompiled, staged: true });
        assert!(s.layout.staged_kernel_path().exists());
        assert!(s.layout.staged_application_path("shell").exists());
        assert!(s.layout.staged_application_path("clock").exists());
        // libc compiled once for both applications.
        assert_eq!(s.tools.compiled().len(), 4);

        s.tools.reset_logs();
        let second = s.build();
        assert_eq!(second, StageReport { outcome: BuildOutcome::AlreadyUpToDate, staged: false });
        assert!(s.tools.compiled().is_empty());
        assert!(s.tools.linked().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn shared_library_change_relinks_every_application() {
        let s = System::new();
        s.add(&PackageId::kernel(), &[], "main.c", "int k;\n");
        s.add(&PackageId::library("libc"), &[], "libc.c", "int c;\n");
        s.add(&PackageId::application("shell"), &["libc"], "main.c", "int s;\n");
        s.add(&PackageId::application("clock"), &["libc"], "main.c", "int t;\n");
        s.build();

        let libc_source = s.layout.package_dir(&PackageId::library("libc")).join("source/libc.c");
        set_mtime(&libc_source, SystemTime::now() + Duration::from_secs(5));
        s.tools.reset_logs();

        let report = s.build();
        assert_eq!(report, StageReport { outcome: BuildOutcome::Recompiled, staged: true });
        assert_eq!(s.tools.compiled(), vec![libc_source.display().to_string()]);

        let links = s.tools.linked();
        let linked = |id: &PackageId| {
            let output = s.layout.package_dir(id).join(id.ty.output_file_name());
            let prefix = format!("{}:", output.display());
            links.iter().filter(|l| l.starts_with(&prefix)).count()
        };
        assert_eq!(linked(&PackageId::library("libc")), 1);
        assert_eq!(linked(&PackageId::application("shell")), 1);
        assert_eq!(linked(&PackageId::application("clock")), 1);
        assert_eq!(linked(&PackageId::kernel()), 0);
        assert_eq!(links.len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn kernel_failure_stops_before_applications() {
        let s = System::new();
        s.add(&PackageId::kernel(), &[], "main.c", "FAIL\n");
        s.add(&PackageId::application("shell"), &[], "main.c", "int s;\n");

        let report = s.build();
        assert_eq!(report.outcome, BuildOutcome::Failed);
        assert!(!report.staged);
        assert_eq!(s.tools.compiled().len(), 1);
        assert!(!s.layout.staged_application_path("shell").exists());
    }

    #[cfg(unix)]
    #[test]
    fn application_failure_fails_the_run() {
        let s = System::new();
        s.add(&PackageId::kernel(), &[], "main.c", "int k;\n");
        s.add(&PackageId::application("broken"), &[], "main.c", "FAIL\n");

        let report = s.build();
        assert_eq!(report.outcome, BuildOutcome::Failed);
        assert!(!s.layout.staged_application_path("broken").exists());
    }

    #[cfg(unix)]
    #[test]
    fn missing_kernel_fails() {
        let s = System::new();
        assert_eq!(s.build().outcome, BuildOutcome::Failed);
    }

    #[cfg(unix)]
    #[test]
    fn everything_assembles_image_only_when_needed() {
        let s = System::new();
        s.add(&PackageId::kernel(), &[], "main.c", "int k;\n");
        let script = s.tools.dir.join("mkrescue.sh");
        fs::write(&script, "while [ \"$1\" != -o ]; do shift; done\necho iso >> \"$2\"\n").unwrap();

        let config = ResolvedConfig {
            project_name: "Perception".into(),
            layout: s.layout.clone(),
            tools: [("grub-mkrescue".to_string(), "sh".to_string())].into_iter().collect(),
            flags: crate::config::Flags {
                mkrescue: vec![script.display().to_string()],
                ..Default::default()
            },
        };
        let toolchain = s.tools.toolchain();

        let mut ctx = BuildContext::new(&s.layout, &toolchain, BuildOptions::default());
        assert_eq!(build_everything(&mut ctx, &config).unwrap(), BuildOutcome::Recompiled);
        assert_eq!(fs::read_to_string(&s.layout.iso_path).unwrap(), "iso\n");

        let mut ctx = BuildContext::new(&s.layout, &toolchain, BuildOptions::default());
        assert_eq!(build_everything(&mut ctx, &config).unwrap(), BuildOutcome::AlreadyUpToDate);
        assert_eq!(fs::read_to_string(&s.layout.iso_path).unwrap(), "iso\n");

        fs::remove_file(&s.layout.iso_path).unwrap();
        let mut ctx = BuildContext::new(&s.layout, &toolchain, BuildOptions::default());
        assert_eq!(build_everything(&mut ctx, &config).unwrap(), BuildOutcome::Recompiled);
        assert!(s.layout.iso_path.exists());
    }
}
