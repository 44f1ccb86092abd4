//! # Priority / Global Scheduler
//!
//! Caps how much module work the whole process runs at once and orders the
//! overflow by priority.
//!
//! ## Modes
//!
//! - *Unbounded* - tasks pass through unchanged; stats stay zero.
//! - *Bounded* - a counting semaphore caps concurrency; waiting tasks queue
//!   ordered by descending effective priority with FIFO tie-breaking
//!   (ascending submission id).
//!
//! ## Starvation prevention
//!
//! A background aging task periodically boosts the effective priority of
//! waiting entries: `effective = min(100, priority + floor(wait_secs / 5) *
//! boost_per_interval)`. A priority-0 task eventually outranks a steady
//! stream of priority-50 arrivals.

use crate::policy::PriorityLevel;
use crate::runtime::error::ExecutionError;
use parking_lot::Mutex;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// Scheduler observability counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub submitted: u64,
    pub completed: u64,
    pub rejected: u64,
}

/// Bounded-mode tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedSchedulerConfig {
    pub max_concurrency: usize,
    pub max_queue_size: usize,
    pub aging_interval: Duration,
    /// Priority points added per 5 seconds of waiting
    pub boost_per_interval: u8,
}

impl Default for BoundedSchedulerConfig {
    fn default() -> Self {
        BoundedSchedulerConfig {
            max_concurrency: 64,
            max_queue_size: 4096,
            aging_interval: Duration::from_secs(1),
            boost_per_interval: 5,
        }
    }
}

struct QueueEntry {
    id: u64,
    priority: u8,
    submitted_at: Instant,
    effective_priority: u8,
    gate: oneshot::Sender<OwnedSemaphorePermit>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher effective priority first, then older submission
        self.effective_priority
            .cmp(&other.effective_priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct BoundedState {
    config: BoundedSchedulerConfig,
    semaphore: Arc<Semaphore>,
    queue: Arc<Mutex<BinaryHeap<QueueEntry>>>,
    next_id: AtomicU64,
    running: AtomicU64,
    aging_task: Mutex<Option<JoinHandle<()>>>,
}

enum Mode {
    Unbounded,
    Bounded(BoundedState),
}

/// Process-wide priority scheduler
pub struct PriorityScheduler {
    mode: Mode,
    shutdown: AtomicBool,
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
}

impl PriorityScheduler {
    /// Pass-through scheduler: no cap, no queue
    pub fn unbounded() -> Self {
        PriorityScheduler {
            mode: Mode::Unbounded,
            shutdown: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Bounded scheduler with a background aging task
    pub fn bounded(config: BoundedSchedulerConfig) -> Self {
        let queue: Arc<Mutex<BinaryHeap<QueueEntry>>> = Arc::new(Mutex::new(BinaryHeap::new()));
        let aging_queue = Arc::clone(&queue);
        let interval = config.aging_interval;
        let boost = config.boost_per_interval;
        let aging_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut heap = aging_queue.lock();
                if heap.is_empty() {
                    continue;
                }
                let entries: Vec<QueueEntry> = heap.drain().collect();
                *heap = entries
                    .into_iter()
                    .map(|mut entry| {
                        let waited = entry.submitted_at.elapsed().as_secs();
                        let boosted =
                            u64::from(entry.priority) + (waited / 5) * u64::from(boost);
                        entry.effective_priority = boosted.min(100) as u8;
                        entry
                    })
                    .collect();
            }
        });

        PriorityScheduler {
            mode: Mode::Bounded(BoundedState {
                semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
                queue,
                next_id: AtomicU64::new(0),
                running: AtomicU64::new(0),
                aging_task: Mutex::new(Some(aging_task)),
                config,
            }),
            shutdown: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Run a task at the given priority, waiting for a slot in bounded mode
    pub async fn submit<F, Fut, T>(
        &self,
        priority: PriorityLevel,
        op: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(ExecutionError::SchedulerShutdown);
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);

        let state = match &self.mode {
            Mode::Unbounded => {
                let value = op().await;
                self.completed.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
            Mode::Bounded(state) => state,
        };

        // Fast path: a slot is free right now
        let permit = match Arc::clone(&state.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let rx = {
                    let mut queue = state.queue.lock();
                    if queue.len() >= state.config.max_queue_size {
                        self.rejected.fetch_add(1, Ordering::Relaxed);
                        return Err(ExecutionError::QueueFull {
                            current_size: queue.len(),
                            max_size: state.config.max_queue_size,
                        });
                    }
                    let (gate, rx) = oneshot::channel();
                    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
                    queue.push(QueueEntry {
                        id,
                        priority: priority.0,
                        submitted_at: Instant::now(),
                        effective_priority: priority.0,
                        gate,
                    });
                    debug!(id, priority = priority.0, "queued task");
                    rx
                };
                // A slot may have freed between the failed try and the
                // enqueue; hand it to the top waiter (possibly ourselves)
                // so nobody waits on a permit no task will release
                if let Ok(permit) = Arc::clone(&state.semaphore).try_acquire_owned() {
                    Self::dispatch_next(state, permit);
                }
                match rx.await {
                    Ok(permit) => permit,
                    Err(_) => return Err(ExecutionError::SchedulerShutdown),
                }
            }
        };

        state.running.fetch_add(1, Ordering::Relaxed);
        let value = op().await;
        state.running.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);

        // Hand the slot to the highest-priority waiter, if any
        Self::dispatch_next(state, permit);
        Ok(value)
    }

    fn dispatch_next(state: &BoundedState, permit: OwnedSemaphorePermit) {
        let mut current = permit;
        loop {
            let entry = state.queue.lock().pop();
            match entry {
                // No waiters: return the slot to the semaphore
                None => {
                    drop(current);
                    return;
                }
                Some(entry) => match entry.gate.send(current) {
                    Ok(()) => return,
                    // The waiter was dropped (caller cancelled); pass the
                    // slot to the next one
                    Err(returned) => current = returned,
                },
            }
        }
    }

    /// Reject further submissions and stop the aging task
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Mode::Bounded(state) = &self.mode {
            if let Some(task) = state.aging_task.lock().take() {
                task.abort();
            }
            // Dropping gates wakes queued submitters with SchedulerShutdown
            state.queue.lock().clear();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        match &self.mode {
            Mode::Unbounded => SchedulerStats::default(),
            Mode::Bounded(state) => SchedulerStats {
                queued: state.queue.lock().len(),
                running: state.running.load(Ordering::Relaxed) as usize,
                submitted: self.submitted.load(Ordering::Relaxed),
                completed: self.completed.load(Ordering::Relaxed),
                rejected: self.rejected.load(Ordering::Relaxed),
            },
        }
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        if let Mode::Bounded(state) = &self.mode {
            if let Some(task) = state.aging_task.lock().take() {
                task.abort();
            }
        }
    }
}
