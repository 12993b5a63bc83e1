//! Package graph resolution.
//!
//! Resolving a package builds its declared library dependencies first
//! (depth-first, in declaration order), then compiles its own sources, then
//! links. The tri-state [`BuildOutcome`] of each dependency decides whether
//! the dependent must relink even when its own sources are unchanged.
//!
//! Include directories propagate one level: a package compiles against the
//! `public/` directories of its direct dependencies. Library archives
//! propagate transitively: an application links every library below it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::cache::Timestamps;
use crate::compile::{self, BuildOptions};
use crate::config::Layout;
use crate::error::BuildError;
use crate::package::{Package, PackageId, PackageType};
use crate::toolchain::{self, Toolchain};
use crate::verbose::{Timer, dprintln, vprintln};

/// Result of resolving one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The package, or something it depends on, failed to build.
    Failed,
    /// Nothing needed rebuilding.
    AlreadyUpToDate,
    /// The package's output was rebuilt, or a library below it was.
    Recompiled,
}

impl BuildOutcome {
    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }
}

/// What a package contributes to the package that depends on it.
#[derive(Debug, Default)]
pub struct LinkInputs {
    /// Library archives to link, each listed once, dependencies first.
    pub libraries: Vec<PathBuf>,
    /// Public include directories of direct dependencies.
    pub public_includes: Vec<PathBuf>,
}

impl LinkInputs {
    fn add_library(&mut self, archive: &Path) {
        if !self.libraries.iter().any(|l| l == archive) {
            self.libraries.push(archive.to_path_buf());
        }
    }

    fn add_include(&mut self, dir: &Path) {
        if !self.public_includes.iter().any(|d| d == dir) {
            self.public_includes.push(dir.to_path_buf());
        }
    }
}

/// A library already resolved during this invocation.
#[derive(Debug)]
struct ResolvedLibrary {
    outcome: BuildOutcome,
    /// Every archive the library brings along, its own last.
    archives: Vec<PathBuf>,
    public_include: PathBuf,
}

/// Per-invocation build state: memoized timestamps, resolved libraries, and
/// the chain of libraries currently being resolved.
pub struct BuildContext<'a> {
    layout: &'a Layout,
    toolchain: &'a Toolchain,
    options: BuildOptions,
    timestamps: Timestamps,
    libraries: HashMap<String, ResolvedLibrary>,
    in_progress: Vec<String>,
}

impl<'a> BuildContext<'a> {
    pub fn new(layout: &'a Layout, toolchain: &'a Toolchain, options: BuildOptions) -> Self {
        Self {
            layout,
            toolchain,
            options,
            timestamps: Timestamps::new(),
            libraries: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    pub fn layout(&self) -> &'a Layout {
        self.layout
    }

    /// Build a package and everything it depends on.
    pub fn resolve(&mut self, id: &PackageId) -> Result<BuildOutcome> {
        let mut inputs = LinkInputs::default();
        self.resolve_into(id, &mut inputs)
    }

    /// Resolve `id` and add what it exports to `parent`.
    fn resolve_into(&mut self, id: &PackageId, parent: &mut LinkInputs) -> Result<BuildOutcome> {
        if id.ty != PackageType::Library {
            return Ok(self.build_package(id)?.0);
        }

        if let Some(done) = self.libraries.get(&id.name) {
            vprintln!("  {id} already resolved ({:?})", done.outcome);
            if !done.outcome.is_failed() {
                for archive in &done.archives {
                    parent.add_library(archive);
                }
                parent.add_include(&done.public_include);
            }
            return Ok(done.outcome);
        }

        if self.in_progress.contains(&id.name) {
            let mut chain = self.in_progress.clone();
            chain.push(id.name.clone());
            return Err(BuildError::DependencyCycle { chain }.into());
        }

        self.in_progress.push(id.name.clone());
        let result = self.build_package(id);
        self.in_progress.pop();
        let (outcome, resolved) = result?;

        let resolved = resolved.unwrap_or_else(|| ResolvedLibrary {
            outcome,
            archives: Vec::new(),
            public_include: PathBuf::new(),
        });
        if !outcome.is_failed() {
            for archive in &resolved.archives {
                parent.add_library(archive);
            }
            parent.add_include(&resolved.public_include);
        }
        self.libraries.insert(id.name.clone(), resolved);
        Ok(outcome)
    }

    /// Dependencies, sources, link. Returns the library record for libraries
    /// that got as far as having a package directory.
    fn build_package(
        &mut self,
        id: &PackageId,
    ) -> Result<(BuildOutcome, Option<ResolvedLibrary>)> {
        let _t = Timer::start(id.to_string());

        let Some(package) = Package::open(self.layout, id)? else {
            eprintln!(
                "error: {id} not found at {}",
                self.layout.package_dir(id).display()
            );
            return Ok((BuildOutcome::Failed, None));
        };

        // 1. Dependencies.
        let mut own = LinkInputs::default();
        let mut force_relink = false;
        for dependency in package.dependencies() {
            match self.resolve_into(&PackageId::library(dependency.as_str()), &mut own)? {
                BuildOutcome::Failed => {
                    report(&BuildError::DependencyFailed {
                        package: id.to_string(),
                        dependency: dependency.clone(),
                    });
                    return Ok((BuildOutcome::Failed, None));
                }
                BuildOutcome::Recompiled => force_relink = true,
                BuildOutcome::AlreadyUpToDate => {}
            }
        }

        // 2. Sources.
        let include_dirs = match id.ty {
            PackageType::Kernel => vec![package.source_dir()],
            PackageType::Library | PackageType::Application => {
                let mut dirs = vec![package.public_dir()];
                dirs.extend(own.public_includes.iter().cloned());
                dirs
            }
        };
        let summary = compile::compile_package(
            &package,
            self.toolchain,
            &include_dirs,
            &mut self.timestamps,
            self.options,
        )?;

        // 3. Failures.
        if summary.failed > 0 {
            eprintln!("There were errors compiling {id}.");
            return Ok((BuildOutcome::Failed, None));
        }
        if summary.objects.is_empty() {
            report(&BuildError::NoBuildableSources {
                package: id.to_string(),
            });
            return Ok((BuildOutcome::Failed, None));
        }

        // 4. Link.
        let output = package.output_path();
        let changed = summary.anything_changed();
        let outcome = match id.ty {
            PackageType::Library => {
                if !changed && output.exists() {
                    vprintln!("  {id}: archive up to date");
                    if force_relink {
                        BuildOutcome::Recompiled
                    } else {
                        BuildOutcome::AlreadyUpToDate
                    }
                } else {
                    dprintln!("Building library {}", id.name);
                    self.link(id.ty, &output, &summary.objects, &[])
                }
            }
            PackageType::Application => {
                if !changed && output.exists() && !force_relink {
                    vprintln!("  {id}: binary up to date");
                    BuildOutcome::AlreadyUpToDate
                } else {
                    dprintln!("Building application {}", id.name);
                    self.link(id.ty, &output, &summary.objects, &own.libraries)
                }
            }
            PackageType::Kernel => {
                if !changed && output.exists() {
                    vprintln!("  kernel: binary up to date");
                    BuildOutcome::AlreadyUpToDate
                } else {
                    dprintln!("Building kernel");
                    self.link(id.ty, &output, &summary.objects, &own.libraries)
                }
            }
        };

        let mut archives = own.libraries;
        archives.push(output);
        Ok((
            outcome,
            Some(ResolvedLibrary {
                outcome,
                archives,
                public_include: package.public_dir(),
            }),
        ))
    }

    fn link(
        &self,
        ty: PackageType,
        output: &Path,
        objects: &[PathBuf],
        libraries: &[PathBuf],
    ) -> BuildOutcome {
        match toolchain::link(self.toolchain.linker_for(ty), output, objects, libraries) {
            Ok(()) => BuildOutcome::Recompiled,
            Err(e) => {
                report(&e);
                BuildOutcome::Failed
            }
        }
    }
}

fn report(err: &BuildError) {
    eprintln!("error: {err}");
}
