//! Lazy Value Cell
//!
//! A three-state memoization cell: `Pending` (never computed), `Computing`
//! (a computation is in flight and can be joined), `Computed` (the value is
//! memoized). Concurrent forces share the in-flight computation; a failed
//! computation returns the cell to `Pending` so later forces may retry.

use crate::runtime::error::ExecutionError;
use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::watch;

type Settled<T> = Option<Result<T, ExecutionError>>;

enum CellState<T> {
    Pending,
    Computing(watch::Receiver<Settled<T>>),
    Computed(T),
}

/// Memoized one-shot async computation
pub struct LazyValue<T: Clone + Send + Sync + 'static> {
    state: Mutex<CellState<T>>,
}

impl<T: Clone + Send + Sync + 'static> LazyValue<T> {
    pub fn new() -> Self {
        LazyValue {
            state: Mutex::new(CellState::Pending),
        }
    }

    /// Whether the value has been computed
    pub fn is_computed(&self) -> bool {
        matches!(&*self.state.lock(), CellState::Computed(_))
    }

    /// Return the memoized value, computing it on first use. Concurrent
    /// callers share one in-flight computation.
    pub async fn force<F, Fut>(&self, compute: F) -> Result<T, ExecutionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        enum Action<T> {
            Return(T),
            Join(watch::Receiver<Settled<T>>),
            Compute(watch::Sender<Settled<T>>),
        }

        let action = {
            let mut state = self.state.lock();
            match &*state {
                CellState::Computed(value) => Action::Return(value.clone()),
                CellState::Computing(rx) => Action::Join(rx.clone()),
                CellState::Pending => {
                    let (tx, rx) = watch::channel(None);
                    *state = CellState::Computing(rx);
                    Action::Compute(tx)
                }
            }
        };

        let tx = match action {
            Action::Return(value) => return Ok(value),
            Action::Join(rx) => return Self::join(rx).await,
            Action::Compute(tx) => tx,
        };

        let result = compute().await;
        {
            let mut state = self.state.lock();
            match &result {
                Ok(value) => *state = CellState::Computed(value.clone()),
                // Failure returns the cell to Pending so a later force can
                // retry
                Err(_) => *state = CellState::Pending,
            }
        }
        let _ = tx.send(Some(result.clone()));
        result
    }

    async fn join(mut rx: watch::Receiver<Settled<T>>) -> Result<T, ExecutionError> {
        loop {
            let settled = rx.borrow().clone();
            if let Some(result) = settled {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(ExecutionError::Internal(
                    "lazy computation abandoned".to_string(),
                ));
            }
        }
    }

    /// Wait for any in-flight computation, then clear the cell
    pub async fn reset(&self) {
        loop {
            let rx = {
                let mut state = self.state.lock();
                match &*state {
                    CellState::Computing(rx) => rx.clone(),
                    _ => {
                        *state = CellState::Pending;
                        return;
                    }
                }
            };
            let _ = Self::join(rx).await;
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for LazyValue<T> {
    fn default() -> Self {
        LazyValue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn force_memoizes_the_value() {
        let cell = LazyValue::new();
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let value = cell
                .force(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .expect("value");
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cell.is_computed());
    }

    #[tokio::test]
    async fn concurrent_forces_share_one_computation() {
        let cell = Arc::new(LazyValue::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cell = Arc::clone(&cell);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                cell.force(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(7)
                })
                .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.expect("join").expect("value"), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_allows_retry() {
        let cell = LazyValue::new();
        let first: Result<i32, _> = cell
            .force(|| async {
                Err(ExecutionError::ModuleFailed {
                    module_name: "m".into(),
                    message: "boom".into(),
                })
            })
            .await;
        assert!(first.is_err());
        assert!(!cell.is_computed());

        let second = cell.force(|| async { Ok(9) }).await.expect("retry");
        assert_eq!(second, 9);
    }

    #[tokio::test]
    async fn reset_clears_a_computed_cell() {
        let cell = LazyValue::new();
        cell.force(|| async { Ok(1) }).await.expect("first");
        cell.reset().await;
        assert!(!cell.is_computed());
        let value = cell.force(|| async { Ok(2) }).await.expect("second");
        assert_eq!(value, 2);
    }
}
