//! Cancellable Executions
//!
//! Every run owns a [`CancellableExecution`]. `cancel` atomically moves
//! Running to Cancelled, wakes the executor loop, and is idempotent - a
//! second cancel, or a cancel after completion, is a no-op.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Terminal and in-flight states of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    TimedOut,
    Failed(String),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Shared cancellation cell for one pipeline run
pub struct CancellableExecution {
    pub execution_id: Uuid,
    status: Mutex<RunStatus>,
    notify: Notify,
}

impl CancellableExecution {
    pub fn new(execution_id: Uuid) -> Arc<Self> {
        Arc::new(CancellableExecution {
            execution_id,
            status: Mutex::new(RunStatus::Running),
            notify: Notify::new(),
        })
    }

    pub fn status(&self) -> RunStatus {
        self.status.lock().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            *self.status.lock(),
            RunStatus::Cancelled | RunStatus::TimedOut
        )
    }

    /// Request cancellation. Returns true when this call performed the
    /// transition; false when the run already reached a terminal state.
    pub fn cancel(&self) -> bool {
        let mut status = self.status.lock();
        if *status == RunStatus::Running {
            *status = RunStatus::Cancelled;
            drop(status);
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Run-level timeout uses the same mechanism with a distinct status
    pub fn time_out(&self) -> bool {
        let mut status = self.status.lock();
        if *status == RunStatus::Running {
            *status = RunStatus::TimedOut;
            drop(status);
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Mark completion; a no-op if the run was cancelled first
    pub fn complete(&self, outcome: RunStatus) -> bool {
        let mut status = self.status.lock();
        if *status == RunStatus::Running {
            *status = outcome;
            true
        } else {
            false
        }
    }

    /// Resolve when cancellation or timeout is requested
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_is_idempotent() {
        let execution = CancellableExecution::new(Uuid::new_v4());
        assert!(execution.cancel());
        assert!(!execution.cancel());
        assert_eq!(execution.status(), RunStatus::Cancelled);
    }

    #[test]
    fn cancel_after_completion_is_a_no_op() {
        let execution = CancellableExecution::new(Uuid::new_v4());
        assert!(execution.complete(RunStatus::Completed));
        assert!(!execution.cancel());
        assert_eq!(execution.status(), RunStatus::Completed);
    }

    #[test]
    fn completion_does_not_overwrite_cancellation() {
        let execution = CancellableExecution::new(Uuid::new_v4());
        execution.cancel();
        assert!(!execution.complete(RunStatus::Completed));
        assert_eq!(execution.status(), RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_future_wakes_on_cancel() {
        let execution = CancellableExecution::new(Uuid::new_v4());
        let waiter = {
            let execution = Arc::clone(&execution);
            tokio::spawn(async move {
                execution.cancelled().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        execution.cancel();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should wake")
            .expect("join");
    }

    #[test]
    fn timeout_marks_timed_out() {
        let execution = CancellableExecution::new(Uuid::new_v4());
        assert!(execution.time_out());
        assert_eq!(execution.status(), RunStatus::TimedOut);
        assert!(execution.is_cancelled());
    }
}
