//! Perception build tool.
//!
//! Builds the kernel, libraries and applications incrementally from their
//! `source/` trees, recompiling only files whose recorded dependencies
//! changed, and assembles the boot image.
//!
//! Pipeline: resolve project root → load tools.json and quark.toml →
//!           resolve library dependencies → compile stale sources → link →
//!           stage binaries → grub-mkrescue.

mod cache;
mod clean;
mod cli;
mod compile;
mod config;
mod depinfo;
mod error;
mod image;
mod orchestrate;
mod package;
mod resolver;
mod toolchain;
mod verbose;
mod walk;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};
use compile::BuildOptions;
use config::ResolvedConfig;
use package::PackageId;
use resolver::{BuildContext, BuildOutcome};
use toolchain::Toolchain;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    verbose::set(verbose::Verbosity::from_flags(cli.quiet, cli.verbose));

    let root = config::find_project_root(cli.root.as_deref())?;
    verbose::vprintln!("  project root: {}", root.display());

    let default = Command::All;
    let command = cli.command.as_ref().unwrap_or(&default);
    let outcome = match command {
        Command::Clean => return cmd_clean(&root).map(|()| ExitCode::SUCCESS),
        Command::Application { name } => cmd_build(&cli, &root, &PackageId::application(name.as_str()))?,
        Command::Library { name } => cmd_build(&cli, &root, &PackageId::library(name.as_str()))?,
        Command::Kernel => cmd_build(&cli, &root, &PackageId::kernel())?,
        Command::All => cmd_all(&cli, &root, false)?,
        Command::Run => cmd_all(&cli, &root, true)?,
    };

    if outcome.is_failed() {
        println!("failed!");
        Ok(ExitCode::FAILURE)
    } else {
        println!("done!");
        Ok(ExitCode::SUCCESS)
    }
}

fn build_options(cli: &Cli) -> BuildOptions {
    BuildOptions {
        force: cli.force,
        jobs: usize::from(cli.jobs),
    }
}

/// Build a single package and the libraries below it.
fn cmd_build(cli: &Cli, root: &Path, id: &PackageId) -> Result<BuildOutcome> {
    let config = ResolvedConfig::load(root)?;
    let toolchain = Toolchain::from_config(&config)?;
    let mut ctx = BuildContext::new(&config.layout, &toolchain, build_options(cli));
    ctx.resolve(id)
}

/// Build the whole system, optionally booting it afterwards.
fn cmd_all(cli: &Cli, root: &Path, boot: bool) -> Result<BuildOutcome> {
    let config = ResolvedConfig::load(root)?;
    let toolchain = Toolchain::from_config(&config)?;
    let mut ctx = BuildContext::new(&config.layout, &toolchain, build_options(cli));
    let _t = verbose::Timer::start(config.project_name.clone());

    let outcome = orchestrate::build_everything(&mut ctx, &config)?;
    if boot && !outcome.is_failed() {
        image::run_emulator(&config)?;
    }
    Ok(outcome)
}

/// Remove build products. Does not need tools.json.
fn cmd_clean(root: &Path) -> Result<()> {
    let project = config::load_project_file(root)?;
    let layout = config::Layout::new(root, &project.layout, &project.project.name);
    clean::clean(&layout)?;
    Ok(())
}
