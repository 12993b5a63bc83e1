//! Source compilation for one package.
//!
//! Walks the package's `source/` tree, decides per file whether its object
//! file is stale, compiles the stale ones (optionally on a small worker
//! pool), and folds fresh dependency records back into the package's
//! dependency cache.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};

use anyhow::Result;

use crate::cache::{self, DependencyCache, Freshness, Timestamps};
use crate::package::Package;
use crate::toolchain::{self, CommandTemplate, CompileUnit, SourceKind, Toolchain};
use crate::verbose::{dprintln, vprintln};

/// Knobs that apply to every package in one invocation.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Treat every source file as stale.
    pub force: bool,
    /// Maximum concurrent compilations within one package.
    pub jobs: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { force: false, jobs: 1 }
    }
}

/// What happened to a package's sources.
#[derive(Debug, Default)]
pub struct CompileSummary {
    /// Object files of every buildable source, fresh or rebuilt.
    pub objects: Vec<PathBuf>,
    /// Number of files a compilation was attempted for.
    pub attempted: usize,
    /// Number of those compilations that failed.
    pub failed: usize,
}

impl CompileSummary {
    /// Returns `true` if any file was (re)compiled or attempted.
    pub fn anything_changed(&self) -> bool {
        self.attempted > 0
    }
}

/// A stale file and the tool that builds it.
struct Job<'a> {
    unit: CompileUnit,
    template: &'a CommandTemplate,
}

/// Compile every stale source of `package`.
///
/// Compilation failures are reported and counted but do not stop sibling
/// files. The dependency cache is rewritten only if some file was attempted
/// or a record for a removed source was dropped.
pub fn compile_package(
    package: &Package,
    toolchain: &Toolchain,
    include_dirs: &[PathBuf],
    stamps: &mut Timestamps,
    options: BuildOptions,
) -> Result<CompileSummary> {
    let cache_path = package.cache_path();
    let mut cache = DependencyCache::load(&cache_path)?;

    let mut summary = CompileSummary::default();
    let mut jobs: Vec<Job<'_>> = Vec::new();

    let mut walked = HashSet::new();
    for entry in crate::walk::walk(&package.source_dir(), &package.build_dir()) {
        let entry = entry?;
        let kind = SourceKind::of(&entry.source);
        if !kind.is_buildable() {
            if kind == SourceKind::Unknown {
                dprintln!("Don't know how to build {}", entry.source.display());
            } else {
                vprintln!("  skipping {}", entry.source.display());
            }
            continue;
        }
        let Some(template) = toolchain.compiler_for(package.id.ty, kind) else {
            continue;
        };

        let object = object_path(&entry.mirror);
        summary.objects.push(object.clone());
        walked.insert(entry.source.clone());

        let freshness = if options.force {
            Freshness::Stale("forced rebuild".into())
        } else {
            cache::check(&entry.source, cache.get(&entry.source), &object, stamps)
        };
        if freshness.is_fresh() {
            vprintln!("  up to date: {}", entry.source.display());
            continue;
        }
        if let Freshness::Stale(reason) = freshness {
            vprintln!("  stale: {reason}");
        }
        jobs.push(Job {
            unit: CompileUnit {
                source: entry.source,
                object,
                kind,
            },
            template,
        });
    }

    // Sources deleted since the last build.
    let dropped = cache.retain_sources(&walked);
    if dropped > 0 {
        vprintln!("  dropped {dropped} records for removed sources");
    }

    summary.attempted = jobs.len();
    let mut failed = 0;
    run_jobs(
        &jobs,
        options.jobs,
        |job| {
            dprintln!("Compiling {}", job.unit.source.display());
            toolchain::compile(job.template, &job.unit, include_dirs)
        },
        |job, result| match result {
            Ok(deps) => {
                cache.record(job.unit.source.clone(), deps);
                Ok(())
            }
            Err(e) if e.is_package_fatal() => {
                eprintln!("error: {e}");
                failed += 1;
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
    )?;
    summary.failed = failed;

    if summary.anything_changed() || dropped > 0 {
        cache.save(&cache_path)?;
    }

    Ok(summary)
}

/// Object file for a mirrored source path: the same path plus `.obj`.
pub fn object_path(mirror: &Path) -> PathBuf {
    let mut name = mirror.as_os_str().to_owned();
    name.push(".obj");
    PathBuf::from(name)
}

/// Run `work` over `items` on up to `workers` threads, folding each result
/// on the calling thread as it arrives.
///
/// With one worker (or one item) everything runs inline in order. The first
/// error from `fold` stops workers from picking up new items; items already
/// running finish, and the error is returned.
fn run_jobs<T, R, W, F>(items: &[T], workers: usize, work: W, mut fold: F) -> Result<()>
where
    T: Sync,
    R: Send,
    W: Fn(&T) -> R + Sync,
    F: FnMut(&T, R) -> Result<()>,
{
    if workers <= 1 || items.len() <= 1 {
        for item in items {
            let result = work(item);
            fold(item, result)?;
        }
        return Ok(());
    }

    let (job_tx, job_rx) = mpsc::channel::<usize>();
    let (result_tx, result_rx) = mpsc::channel::<(usize, R)>();
    for idx in 0..items.len() {
        // The receiver is alive until the scope below ends.
        let _ = job_tx.send(idx);
    }
    drop(job_tx);

    let job_rx = Mutex::new(job_rx);
    let cancelled = AtomicBool::new(false);
    let work = &work;
    let job_rx = &job_rx;
    let cancelled_ref = &cancelled;

    std::thread::scope(|s| {
        for _ in 0..workers.min(items.len()) {
            let tx = result_tx.clone();
            s.spawn(move || {
                loop {
                    if cancelled_ref.load(Ordering::Relaxed) {
                        break;
                    }
                    let next = match job_rx.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => break,
                    };
                    let Ok(idx) = next else { break };
                    if tx.send((idx, work(&items[idx]))).is_err() {
                        break;
                    }
                }
            });
        }

        // Drop the original sender so the channel closes when workers finish.
        drop(result_tx);

        let mut outcome = Ok(());
        for (idx, result) in result_rx {
            if outcome.is_ok() {
                outcome = fold(&items[idx], result);
                if outcome.is_err() {
                    cancelled.store(true, Ordering::Relaxed);
                }
            }
        }
        outcome
    })
}
