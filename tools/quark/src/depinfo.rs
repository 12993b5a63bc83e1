//! Parser for Makefile-style dependency reports (`gcc -MD -MF <file>`).
//!
//! The format is `target: dep1 dep2 ...` with backslash-newline
//! continuations. Additional rules (e.g. phony header targets from `-MP`)
//! contribute the paths after their own `:`.

use std::path::{Path, PathBuf};

use crate::error::BuildError;

/// Read and parse the dependency report at `path`.
pub fn read(path: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| BuildError::UnparseableDependencyReport { path: path.to_path_buf() })?;
    parse(&content, path)
}

/// Parse a dependency report. `path` is only used for error messages.
///
/// Tokens of one character or less are discarded. The first line must
/// contain a `target:` separator.
pub fn parse(content: &str, path: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let joined = content.replace("\\\r\n", " ").replace("\\\n", " ");

    let mut lines = joined.lines().map(str::trim).filter(|line| !line.is_empty());
    let first = lines.next().unwrap_or_default();
    let Some(deps) = after_separator(first) else {
        return Err(BuildError::UnparseableDependencyReport {
            path: path.to_path_buf(),
        });
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for part in std::iter::once(deps).chain(lines.filter_map(after_separator)) {
        for token in split_dep_tokens(part) {
            if token.chars().count() <= 1 {
                continue;
            }
            let p = PathBuf::from(token);
            if !paths.contains(&p) {
                paths.push(p);
            }
        }
    }

    Ok(paths)
}

/// Everything after the first `:` of a rule line.
fn after_separator(line: &str) -> Option<&str> {
    line.find(':').map(|idx| &line[idx + 1..])
}

/// Split a dependency string on whitespace, handling backslash-escaped spaces.
fn split_dep_tokens(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                if next == ' ' {
                    current.push(' ');
                    chars.next();
                    continue;
                }
            }
            current.push(ch);
        } else if ch.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(content: &str) -> Vec<PathBuf> {
        parse(content, Path::new("main.cc.obj.d")).unwrap()
    }

    #[test]
    fn single_line() {
        assert_eq!(
            parse_ok("build/main.cc.obj: source/main.cc public/window.h\n"),
            vec![PathBuf::from("source/main.cc"), PathBuf::from("public/window.h")]
        );
    }

    #[test]
    fn continuation_lines() {
        let report = "build/a.c.obj: source/a.c \\\n  source/a.h \\\n  ../Libraries/libc/public/stdio.h\n";
        assert_eq!(
            parse_ok(report),
            vec![
                PathBuf::from("source/a.c"),
                PathBuf::from("source/a.h"),
                PathBuf::from("../Libraries/libc/public/stdio.h"),
            ]
        );
    }

    #[test]
    fn degenerate_tokens_are_dropped() {
        assert_eq!(
            parse_ok("x.obj: a.c b \\\r\n  c.h\n"),
            vec![PathBuf::from("a.c"), PathBuf::from("c.h")]
        );
    }

    #[test]
    fn escaped_spaces_stay_in_one_path() {
        assert_eq!(
            parse_ok("x.obj: Window\\ Manager/main.cc\n"),
            vec![PathBuf::from("Window Manager/main.cc")]
        );
    }

    #[test]
    fn phony_targets_do_not_add_paths() {
        let report = "x.obj: x.c x.h\n\nx.h:\n";
        assert_eq!(parse_ok(report), vec![PathBuf::from("x.c"), PathBuf::from("x.h")]);
    }

    #[test]
    fn missing_separator_is_an_error() {
        let err = parse("just some words\n", Path::new("x.d")).unwrap_err();
        assert!(matches!(err, BuildError::UnparseableDependencyReport { .. }));

        let err = parse("", Path::new("x.d")).unwrap_err();
        assert!(matches!(err, BuildError::UnparseableDependencyReport { .. }));
    }

    #[test]
    fn unreadable_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(&dir.path().join("missing.d")).unwrap_err();
        assert!(matches!(err, BuildError::UnparseableDependencyReport { .. }));
    }
}
