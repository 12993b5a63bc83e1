//! Console diagnostics.
//!
//! Every message quark prints belongs to a level, and the level chosen on the
//! command line decides which of them reach the terminal:
//!
//! | level     | flag | prints                                                  |
//! |-----------|------|---------------------------------------------------------|
//! | `Quiet`   | `-q` | errors, warnings, `done!`/`failed!`                     |
//! | `Default` |      | plus "Compiling", "Building", "Copying", "Removing"     |
//! | `Verbose` | `-v` | plus staleness reasons, skipped files, cache, timings   |
//!
//! Errors and warnings go to stderr and are never suppressed.

use std::sync::OnceLock;
use std::time::Instant;

/// Output verbosity level. Ordered from least to most output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    #[default]
    Default,
    Verbose,
}

impl Verbosity {
    /// The level selected by `-q` / `-v`. The CLI rejects both at once.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, true) => Self::Verbose,
            (false, false) => Self::Default,
        }
    }

    /// Whether a message at level `message` is shown at this level.
    pub fn shows(self, message: Verbosity) -> bool {
        message <= self
    }
}

static LEVEL: OnceLock<Verbosity> = OnceLock::new();

/// Fix the level for the rest of the process. Later calls are ignored.
pub fn set(level: Verbosity) {
    let _ = LEVEL.set(level);
}

/// Whether messages at `message` level are currently shown.
pub fn enabled(message: Verbosity) -> bool {
    LEVEL.get().copied().unwrap_or_default().shows(message)
}

/// Print at `-v` only.
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::enabled($crate::verbose::Verbosity::Verbose) {
            println!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// Print unless `-q`.
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::enabled($crate::verbose::Verbosity::Default) {
            println!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Print a `warning:` line to stderr at every level.
macro_rules! wprintln {
    ($($arg:tt)*) => {
        eprintln!("warning: {}", format_args!($($arg)*))
    };
}

pub(crate) use wprintln;

/// Reports how long a package or phase took, at `-v`, when dropped.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        vprintln!("  {} took {:.1?}", self.label, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_select_level() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Default);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Quiet);
    }

    #[test]
    fn quiet_shows_only_quiet_messages() {
        assert!(Verbosity::Quiet.shows(Verbosity::Quiet));
        assert!(!Verbosity::Quiet.shows(Verbosity::Default));
        assert!(!Verbosity::Quiet.shows(Verbosity::Verbose));
    }

    #[test]
    fn verbose_shows_everything() {
        assert!(Verbosity::Verbose.shows(Verbosity::Default));
        assert!(Verbosity::Verbose.shows(Verbosity::Verbose));
        assert!(!Verbosity::Default.shows(Verbosity::Verbose));
    }

    #[test]
    fn unset_level_is_default() {
        // Tests never call `set`, so output follows the default level.
        assert!(enabled(Verbosity::Default));
        assert!(!enabled(Verbosity::Verbose));
    }
}
