//! Command-line interface definitions for quark.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Incremental build tool for the kernel, libraries and applications.
#[derive(Parser)]
#[command(name = "quark", version, about)]
pub struct Cli {
    /// Subcommand to execute. Builds everything when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Project root (defaults to the nearest directory with quark.toml or tools.json).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Recompile every source file, ignoring dependency caches.
    #[arg(long, short = 'f', global = true)]
    pub force: bool,

    /// Show only errors and the final result.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Show staleness reasons, skipped files and timings.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Maximum concurrent compilations within one package.
    #[arg(long, short = 'j', global = true, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: u16,
}

/// Available subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Build one application and the libraries it depends on.
    Application {
        /// Directory name under the applications root.
        name: String,
    },
    /// Build one library and the libraries it depends on.
    Library {
        /// Directory name under the libraries root.
        name: String,
    },
    /// Build the kernel.
    Kernel,
    /// Build the kernel and every application, then assemble the disk image.
    All,
    /// Build everything, then boot the disk image in the emulator.
    Run,
    /// Remove build products.
    Clean,
}
