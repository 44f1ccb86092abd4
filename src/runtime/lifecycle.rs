//! Process Lifecycle
//!
//! Tracks in-flight runs and coordinates graceful shutdown: transition to
//! Draining (new runs rejected), wait up to the drain timeout for existing
//! runs to finish, cancel the stragglers, and stop.

use crate::runtime::cancellation::CancellableExecution;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

/// Process-wide runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Draining => write!(f, "draining"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Registry of in-flight executions plus the shutdown state machine
pub struct ConstellationLifecycle {
    state: Mutex<LifecycleState>,
    in_flight: DashMap<Uuid, Arc<CancellableExecution>>,
    drained: Notify,
}

impl ConstellationLifecycle {
    pub fn new() -> Self {
        ConstellationLifecycle {
            state: Mutex::new(LifecycleState::Running),
            in_flight: DashMap::new(),
            drained: Notify::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Track a new run. Returns false (and does not track) unless the
    /// lifecycle is Running.
    pub fn register_execution(&self, execution: Arc<CancellableExecution>) -> bool {
        let state = self.state.lock();
        if *state != LifecycleState::Running {
            return false;
        }
        self.in_flight.insert(execution.execution_id, execution);
        true
    }

    /// Stop tracking a completed run
    pub fn deregister_execution(&self, execution_id: Uuid) {
        self.in_flight.remove(&execution_id);
        if self.in_flight.is_empty() {
            self.drained.notify_waiters();
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Graceful shutdown: drain, then cancel stragglers, then stop
    pub async fn shutdown(&self, drain_timeout: Duration) {
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Stopped {
                return;
            }
            *state = LifecycleState::Draining;
        }
        info!(
            in_flight = self.in_flight.len(),
            "draining before shutdown"
        );

        let deadline = tokio::time::Instant::now() + drain_timeout;
        while !self.in_flight.is_empty() {
            let wait = self.drained.notified();
            if tokio::time::timeout_at(deadline, wait).await.is_err() {
                break;
            }
        }

        if !self.in_flight.is_empty() {
            warn!(
                stragglers = self.in_flight.len(),
                "drain timeout reached, cancelling remaining runs"
            );
            for entry in self.in_flight.iter() {
                entry.value().cancel();
            }
        }

        *self.state.lock() = LifecycleState::Stopped;
        info!("lifecycle stopped");
    }
}

impl Default for ConstellationLifecycle {
    fn default() -> Self {
        ConstellationLifecycle::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_requires_running_state() {
        let lifecycle = ConstellationLifecycle::new();
        let execution = CancellableExecution::new(Uuid::new_v4());
        assert!(lifecycle.register_execution(Arc::clone(&execution)));
        assert_eq!(lifecycle.in_flight_count(), 1);
        lifecycle.deregister_execution(execution.execution_id);
        assert_eq!(lifecycle.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_drain() {
        let lifecycle = Arc::new(ConstellationLifecycle::new());
        let execution = CancellableExecution::new(Uuid::new_v4());
        lifecycle.register_execution(Arc::clone(&execution));

        let finisher = {
            let lifecycle = Arc::clone(&lifecycle);
            let id = execution.execution_id;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                lifecycle.deregister_execution(id);
            })
        };

        lifecycle.shutdown(Duration::from_secs(1)).await;
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        // Drained, not cancelled
        assert!(!execution.is_cancelled());
        finisher.await.expect("join");
    }

    #[tokio::test]
    async fn shutdown_cancels_stragglers_after_timeout() {
        let lifecycle = ConstellationLifecycle::new();
        let execution = CancellableExecution::new(Uuid::new_v4());
        lifecycle.register_execution(Arc::clone(&execution));

        lifecycle.shutdown(Duration::from_millis(20)).await;
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert!(execution.is_cancelled());
    }

    #[tokio::test]
    async fn draining_rejects_new_registrations() {
        let lifecycle = Arc::new(ConstellationLifecycle::new());
        let held = CancellableExecution::new(Uuid::new_v4());
        lifecycle.register_execution(Arc::clone(&held));

        let shutdown = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                lifecycle.shutdown(Duration::from_millis(100)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let late = CancellableExecution::new(Uuid::new_v4());
        assert!(!lifecycle.register_execution(late));

        lifecycle.deregister_execution(held.execution_id);
        shutdown.await.expect("join");
    }
}
