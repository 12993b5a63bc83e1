//! Typed build failures.
//!
//! Package-fatal errors stop the package they occur in and surface as a
//! [`BuildOutcome::Failed`](crate::resolver::BuildOutcome::Failed) result.
//! Everything else aborts the whole invocation.

use std::path::PathBuf;

/// A failure raised while building a package.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The tool-path configuration file does not exist.
    #[error("{} does not exist. Please read ../building.md.", path.display())]
    ConfigMissing { path: PathBuf },

    /// A compiler or assembler exited with a non-zero status.
    #[error("failed to compile {}:\n{stderr}", source_path.display())]
    CompileFailed { source_path: PathBuf, stderr: String },

    /// The linker exited with a non-zero status.
    #[error("failed to link {}:\n{stderr}", output.display())]
    LinkFailed { output: PathBuf, stderr: String },

    /// A subprocess could not be started at all.
    #[error("failed to run `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The package has no compilable or assemblable sources.
    #[error("nothing was compiled for {package}")]
    NoBuildableSources { package: String },

    /// A declared library dependency failed to build.
    #[error("dependency {dependency} of {package} failed to build")]
    DependencyFailed { package: String, dependency: String },

    /// The compiler's dependency report has no `target:` separator.
    #[error("error parsing dependencies in {}", path.display())]
    UnparseableDependencyReport { path: PathBuf },

    /// A library depends on itself, directly or transitively.
    #[error("dependency cycle detected: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },
}

impl BuildError {
    /// Returns `true` if this error dooms only the package it occurred in.
    ///
    /// A failed subprocess spawn counts as the step failing, the same as a
    /// non-zero exit.
    pub fn is_package_fatal(&self) -> bool {
        match self {
            Self::CompileFailed { .. }
            | Self::LinkFailed { .. }
            | Self::Spawn { .. }
            | Self::NoBuildableSources { .. }
            | Self::DependencyFailed { .. } => true,
            Self::ConfigMissing { .. }
            | Self::UnparseableDependencyReport { .. }
            | Self::DependencyCycle { .. } => false,
        }
    }
}
