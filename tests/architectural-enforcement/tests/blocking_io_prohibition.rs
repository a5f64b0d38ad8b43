//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in the production crates MUST NOT use
//! blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::io`, not `std::fs`,
//! `std::net`, `std::io::stdout()`.
//!
//! Non-async functions (configuration loading, logging setup) may block.
//! Async code calls the blocking config loaders through `spawn_blocking`.

use architectural_enforcement::{
    assert_no_violations, production_sources, SourceFile, Violation,
};

/// Blocking APIs and the reason reported for each
const BLOCKING: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("std::io::stdin()", "Blocking stdin in async"),
    ("std::io::stdout()", "Blocking stdout in async"),
    ("std::thread::spawn", "OS thread in async"),
    ("tungstenite::connect(", "Blocking WebSocket handshake"),
    ("load_config(", "Blocking config load in async"),
    ("load_config_from_path(", "Blocking config load in async"),
    ("load_config_with_env(", "Blocking config load in async"),
];

fn blocking_calls(file: &SourceFile) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (line, code) in file.code_lines() {
        let Some((_, reason)) = BLOCKING.iter().find(|(api, _)| code.contains(api)) else {
            continue;
        };
        if file.in_async_fn(line) && !code.contains("spawn_blocking(") {
            violations.push(file.violation(line, *reason));
        }
    }
    violations
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations: Vec<Violation> = production_sources().iter().flat_map(blocking_calls).collect();

    assert_no_violations("Blocking I/O calls found in async code", &violations);
}

#[test]
fn test_config_load_in_async_main_is_flagged() {
    let direct = SourceFile::parse(
        "tail/src/main.rs",
        "async fn main() -> Result<()> {\n    let loaded = load_config_from_path(path)?;\n}\n",
    );
    let violations = blocking_calls(&direct);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].line, 2);

    let offloaded = SourceFile::parse(
        "tail/src/main.rs",
        "async fn main() -> Result<()> {\n    let loaded = tokio::task::spawn_blocking(move || load_config_from_path(path))\n}\n",
    );
    assert!(blocking_calls(&offloaded).is_empty());

    let sync = SourceFile::parse(
        "core/src/config.rs",
        "pub fn load_config() -> Result<LoadedConfig, ConfigError> {\n    load_config_from_path(default_config_path())\n}\n",
    );
    assert!(blocking_calls(&sync).is_empty());
}
