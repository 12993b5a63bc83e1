//! Compiler, assembler and linker invocation.
//!
//! A [`CommandTemplate`] is a tool executable plus its fixed flags; quark
//! appends include directories, the dependency report, the output, and the
//! inputs per invocation through [`ToolCommand`].

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output};

use anyhow::Result;

use crate::config::ResolvedConfig;
use crate::depinfo;
use crate::error::BuildError;
use crate::package::PackageType;

/// How a file under `source/` is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// C or C++, compiled with the C compiler.
    Compilable,
    /// Assembled with the assembler.
    Assembly,
    /// Headers, linker scripts, text and metadata: silently skipped.
    Ignored,
    /// No known way to build it: skipped with a diagnostic.
    Unknown,
}

impl SourceKind {
    /// Classify a file by its name.
    pub fn of(path: &Path) -> Self {
        if path.file_name() == Some(OsStr::new(".DS_Store")) {
            return Self::Ignored;
        }
        match path.extension().and_then(OsStr::to_str) {
            Some("c" | "cc") => Self::Compilable,
            Some("asm") => Self::Assembly,
            Some("h" | "inl" | "ld" | "txt" | "json") => Self::Ignored,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` if files of this kind produce an object file.
    pub fn is_buildable(self) -> bool {
        matches!(self, Self::Compilable | Self::Assembly)
    }
}

/// An executable and the flags that always precede per-file arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Start a command from this template.
    pub fn command(&self) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Every command template needed to build packages.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub cc: CommandTemplate,
    pub kernel_cc: CommandTemplate,
    pub asm: CommandTemplate,
    pub library_ld: CommandTemplate,
    pub application_ld: CommandTemplate,
    pub kernel_ld: CommandTemplate,
}

impl Toolchain {
    /// Assemble templates from `tools.json` paths and `[flags]`.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let gcc = config.tools.get("gcc")?;
        let ld = config.tools.get("ld")?;
        let nasm = config.tools.get_or("nasm", "nasm");
        let flags = &config.flags;

        Ok(Self {
            cc: CommandTemplate::new(gcc, flags.cc.clone()),
            kernel_cc: CommandTemplate::new(gcc, flags.kernel_cc.clone()),
            asm: CommandTemplate::new(nasm, flags.asm.clone()),
            library_ld: CommandTemplate::new(ld, flags.library_ld.clone()),
            application_ld: CommandTemplate::new(ld, flags.application_ld.clone()),
            kernel_ld: CommandTemplate::new(ld, flags.kernel_ld.clone()),
        })
    }

    /// The template that builds `kind` files for a package of type `ty`.
    pub fn compiler_for(&self, ty: PackageType, kind: SourceKind) -> Option<&CommandTemplate> {
        match kind {
            SourceKind::Compilable if ty == PackageType::Kernel => Some(&self.kernel_cc),
            SourceKind::Compilable => Some(&self.cc),
            SourceKind::Assembly => Some(&self.asm),
            SourceKind::Ignored | SourceKind::Unknown => None,
        }
    }

    /// The template that links a package of type `ty`.
    pub fn linker_for(&self, ty: PackageType) -> &CommandTemplate {
        match ty {
            PackageType::Kernel => &self.kernel_ld,
            PackageType::Library => &self.library_ld,
            PackageType::Application => &self.application_ld,
        }
    }
}

/// A typed builder for one tool invocation.
pub struct ToolCommand {
    cmd: Command,
    program: String,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            cmd: Command::new(program),
            program: program.to_string(),
        }
    }

    /// Add a system include directory (`-isystem <dir>`).
    pub fn include_dir(&mut self, dir: &Path) -> &mut Self {
        self.cmd.arg("-isystem").arg(dir);
        self
    }

    /// Write a Makefile-style dependency report (`-MD -MF <file>`).
    pub fn dep_file(&mut self, file: &Path) -> &mut Self {
        self.cmd.arg("-MD").arg("-MF").arg(file);
        self
    }

    /// Set the output file (`-o <file>`).
    pub fn output(&mut self, file: &Path) -> &mut Self {
        self.cmd.arg("-o").arg(file);
        self
    }

    /// Add an input file.
    pub fn input(&mut self, file: &Path) -> &mut Self {
        self.cmd.arg(file);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.cmd.args(args);
        self
    }

    /// Execute the command and capture its output.
    pub fn run(&mut self) -> Result<Output, BuildError> {
        self.cmd.output().map_err(|source| self.spawn_error(source))
    }

    /// Execute the command with inherited stdio and wait for it.
    pub fn status(&mut self) -> Result<ExitStatus, BuildError> {
        self.cmd.status().map_err(|source| self.spawn_error(source))
    }

    fn spawn_error(&self, source: std::io::Error) -> BuildError {
        BuildError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

/// One file to compile.
#[derive(Debug, Clone)]
pub struct CompileUnit {
    pub source: PathBuf,
    pub object: PathBuf,
    pub kind: SourceKind,
}

impl CompileUnit {
    /// Where the compiler writes this unit's dependency report.
    pub fn dep_report_path(&self) -> PathBuf {
        let mut name = OsString::from(self.object.as_os_str());
        name.push(".d");
        PathBuf::from(name)
    }
}

/// Compile one unit and return the files it depends on.
///
/// Assembly units depend only on themselves. On failure any object file the
/// tool left behind is deleted so it can never be mistaken for fresh.
pub fn compile(
    template: &CommandTemplate,
    unit: &CompileUnit,
    include_dirs: &[PathBuf],
) -> Result<Vec<PathBuf>, BuildError> {
    let dep_report = unit.dep_report_path();
    let mut cmd = template.command();

    if unit.kind == SourceKind::Compilable {
        for dir in include_dirs {
            cmd.include_dir(dir);
        }
        cmd.dep_file(&dep_report);
    }
    cmd.output(&unit.object).input(&unit.source);

    match cmd.run() {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            discard(&unit.object);
            return Err(BuildError::CompileFailed {
                source_path: unit.source.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Err(e) => {
            discard(&unit.object);
            return Err(e);
        }
    }

    match unit.kind {
        SourceKind::Assembly => Ok(vec![unit.source.clone()]),
        _ => depinfo::read(&dep_report),
    }
}

/// Link `objects` and `libraries` into `output`.
///
/// Any previous output is removed first, so a failed link never leaves a
/// stale binary behind.
pub fn link(
    template: &CommandTemplate,
    output: &Path,
    objects: &[PathBuf],
    libraries: &[PathBuf],
) -> Result<(), BuildError> {
    if output.exists() {
        std::fs::remove_file(output).map_err(|e| BuildError::LinkFailed {
            output: output.to_path_buf(),
            stderr: format!("could not remove previous output: {e}"),
        })?;
    }

    let mut cmd = template.command();
    cmd.output(output).args(objects).args(libraries);

    let result = cmd.run()?;
    if !result.status.success() {
        return Err(BuildError::LinkFailed {
            output: output.to_path_buf(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        });
    }
    Ok(())
}

fn discard(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}
