//! Integration Test: Panicking Shortcut Prohibition
//!
//! **Policy**: production code propagates errors with `?` or handles them.
//! `unwrap()`, `expect()`, `todo!()` and `unimplemented!()` are for tests.

use architectural_enforcement::{assert_no_violations, production_sources, Violation};

const SHORTCUTS: &[&str] = &[".unwrap()", ".expect(", "todo!(", "unimplemented!("];

#[test]
fn test_no_panicking_shortcuts_in_production_code() {
    let mut violations: Vec<Violation> = Vec::new();

    for file in production_sources() {
        for (line, code) in file.code_lines() {
            if SHORTCUTS.iter().any(|shortcut| code.contains(shortcut)) {
                violations.push(file.violation(line, "Panicking shortcut"));
            }
        }
    }

    assert_no_violations("unwrap/expect found in production code", &violations);
}
