//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code waits on I/O, channels and deadlines. It does
//! not sleep.
//! **Exceptions**: the reconnect scheduler (`scheduler.rs`) and the simulated
//! open delay of the in-process transport.
//!
//! `sleep_until` on a computed deadline is a timer, not a sleep, and is
//! allowed everywhere.

use architectural_enforcement::{assert_no_violations, production_sources, Violation};

/// Files allowed to call `tokio::time::sleep`
const SLEEP_ALLOWED: &[&str] = &["core/src/scheduler.rs", "core/src/transport/in_process.rs"];

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations: Vec<Violation> = Vec::new();

    for file in production_sources() {
        let allowed = SLEEP_ALLOWED.iter().any(|suffix| file.is(suffix));

        for (line, code) in file.code_lines() {
            if code.contains("thread::sleep(") {
                violations.push(file.violation(line, "Thread sleep"));
            } else if (code.contains("::sleep(") || code.contains(".sleep(")) && !allowed {
                violations.push(file.violation(line, "Sleep outside the scheduler"));
            }
        }
    }

    assert_no_violations("Sleep calls found in production code", &violations);
}

#[test]
fn test_scheduler_is_the_only_retry_timer() {
    let manager = production_sources()
        .into_iter()
        .find(|file| file.is("core/src/manager.rs"))
        .expect("manager.rs is scanned");

    let schedules_retries = manager
        .code_lines()
        .any(|(_, code)| code.contains("ScheduledTask::schedule("));
    assert!(schedules_retries, "retries must go through ScheduledTask");
}
