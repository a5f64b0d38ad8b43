//! Architectural Enforcement Integration Tests
//!
//! Source-scanning helpers shared by the integration tests in `tests/`.
//! They keep the production crates free of:
//! - sleeping outside the reconnect scheduler
//! - blocking I/O inside async functions
//! - panicking shortcuts (`unwrap()` / `expect()`)
//!
//! The scan is line based. Everything after a `#[cfg(test)]` line is treated
//! as test code, which matches how the crates place their unit tests at the
//! bottom of each file.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Source directories of the production crates, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["logstream/core/src", "logstream/tail/src"];

/// Workspace root, derived from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// One scanned Rust source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    lines: Vec<String>,
}

impl SourceFile {
    /// Build from in-memory content
    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Self {
        Self {
            path: path.into(),
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Read a file from disk, recording `path` relative to `root`
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be read.
    pub fn load(root: &Path, path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let relative = path.strip_prefix(root).unwrap_or(path);
        Ok(Self::parse(relative, &content))
    }

    /// Production lines as `(line number, code)`, comments stripped
    ///
    /// Doc and line comments are skipped; scanning stops at `#[cfg(test)]`.
    pub fn code_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
            .filter(|(_, line)| !line.trim_start().starts_with("//"))
            .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
    }

    /// Whether the function enclosing line `line_number` (1-based) is async
    #[must_use]
    pub fn in_async_fn(&self, line_number: usize) -> bool {
        self.lines[..line_number.min(self.lines.len())]
            .iter()
            .rev()
            .map(|line| line.trim())
            .filter(|line| !line.starts_with("//"))
            .find(|line| declares_fn(line))
            .is_some_and(|line| line.contains("async fn "))
    }

    /// Whether the file path ends with `suffix` (e.g. `core/src/scheduler.rs`)
    #[must_use]
    pub fn is(&self, suffix: &str) -> bool {
        self.path.ends_with(suffix)
    }

    /// Record a violation at `line_number`
    #[must_use]
    pub fn violation(&self, line_number: usize, reason: &'static str) -> Violation {
        Violation {
            path: self.path.clone(),
            line: line_number,
            text: self
                .lines
                .get(line_number - 1)
                .map(|l| l.trim().to_string())
                .unwrap_or_default(),
            reason,
        }
    }
}

/// Whether a trimmed line starts a function declaration
fn declares_fn(line: &str) -> bool {
    line.starts_with("fn ") || line.contains(" fn ")
}

/// All `.rs` files under the production directories
///
/// # Panics
///
/// Panics if a production directory is missing or a file cannot be read.
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut sources = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.is_dir(), "missing production directory {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                let file = SourceFile::load(&root, entry.path())
                    .unwrap_or_else(|e| panic!("cannot read {}: {e}", entry.path().display()));
                sources.push(file);
            }
        }
    }

    sources
}

/// A rule violation at one source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File path relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
    /// What rule was broken
    pub reason: &'static str,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.reason,
            self.text
        )
    }
}

/// Fail the calling test if there are violations
///
/// # Panics
///
/// Panics with a listing when `violations` is not empty.
pub fn assert_no_violations(policy: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {policy}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"//! Module docs mention thread::sleep(
use std::time::Duration;

pub fn load() -> String {
    std::fs::read_to_string("a.toml").unwrap_or_default() // .unwrap()
}

impl Thing {
    pub async fn run(&self) {
        let x = compute();
        self.tx.send(x).await;
    }
}

#[cfg(test)]
mod tests {
    fn helper() { value.unwrap(); }
}
"#;

    #[test]
    fn test_code_lines_skip_comments_and_tests() {
        let file = SourceFile::parse("core/src/thing.rs", SAMPLE);
        let lines: Vec<(usize, &str)> = file.code_lines().collect();

        assert!(lines.iter().all(|(_, code)| !code.contains("thread::sleep")));
        assert!(lines.iter().all(|(_, code)| !code.contains(".unwrap()")));
        assert!(lines.iter().all(|(n, _)| *n < 15));
        assert!(lines.iter().any(|(n, _)| *n == 5));
    }

    #[test]
    fn test_async_fn_detection() {
        let file = SourceFile::parse("core/src/thing.rs", SAMPLE);
        assert!(!file.in_async_fn(5));
        assert!(file.in_async_fn(10));
        assert!(file.in_async_fn(11));
    }

    #[test]
    fn test_violation_display() {
        let file = SourceFile::parse("core/src/thing.rs", SAMPLE);
        let violation = file.violation(5, "Blocking file I/O");
        assert_eq!(violation.line, 5);
        assert!(violation
            .to_string()
            .starts_with("core/src/thing.rs:5 - Blocking file I/O: std::fs::read_to_string"));
        assert!(file.is("src/thing.rs"));
    }
}
