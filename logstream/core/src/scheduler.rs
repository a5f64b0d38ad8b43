//! Scheduled Tasks
//!
//! A [`ScheduledTask`] runs a future once after a delay and can be cancelled
//! deterministically: after [`ScheduledTask::cancel`] returns (or the task is
//! dropped) the future will not start. The connection manager uses it for
//! reconnect timers so that `disconnect()` can revoke a pending retry.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A future scheduled to run once after a delay
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
    due: Instant,
}

impl ScheduledTask {
    /// Schedule `task` to run after `delay` on the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn schedule<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let due = Instant::now() + delay;
        let handle = tokio::spawn(async move {
            // Retry backoff delay
            tokio::time::sleep(delay).await;
            task.await;
        });
        Self { handle, due }
    }

    /// Time left until the task runs (zero once due)
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.due.saturating_duration_since(Instant::now())
    }

    /// Whether the task has run to completion or was cancelled
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
