//! Retry scheduler - delays failed items and feeds them back to the workers
//!
//! A worker that decides to retry an item hands it to the
//! [`RetryScheduler`] and immediately goes back to the work queue. A single
//! background task owns a [`DelayQueue`]; when an item's backoff expires it
//! is pushed onto the same work channel the workers read from.
//!
//! ## Flow
//!
//! ```text
//! worker ──schedule()──→ unbounded mpsc ──→ scheduler task
//!                                               │
//!                                          DelayQueue
//!                                               │ expired
//!                                               ▼
//!                        work channel ◄──── send(item)
//! ```
//!
//! The number of items waiting on a timer is capped; [`RetryScheduler::schedule`]
//! hands the item back when the cap is reached.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use upsync_core::domain::WorkItem;

// ============================================================================
// RetryScheduler handle
// ============================================================================

/// Cloneable handle onto the scheduler task
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    tx: mpsc::UnboundedSender<(WorkItem, Duration)>,
    pending: Arc<AtomicUsize>,
    capacity: usize,
}

impl RetryScheduler {
    /// Starts the scheduler task
    ///
    /// # Arguments
    /// * `work_tx` - The work channel expired items are sent back on
    /// * `capacity` - Maximum number of items waiting on a timer at once;
    ///   zero refuses every retry
    /// * `shutdown` - Stops the task; items still waiting are dropped
    pub fn spawn(
        work_tx: mpsc::Sender<WorkItem>,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(run(rx, work_tx, pending.clone(), shutdown));
        let scheduler = Self {
            tx,
            pending,
            capacity,
        };
        (scheduler, handle)
    }

    /// Queues `item` to re-enter the work channel after `delay`
    ///
    /// Never waits. Returns the item if the scheduler is full or gone.
    pub fn schedule(&self, item: WorkItem, delay: Duration) -> Result<(), WorkItem> {
        let reserved = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            warn!(
                path = %item.path(),
                capacity = self.capacity,
                "Retry scheduler full"
            );
            return Err(item);
        }

        self.tx.send((item, delay)).map_err(|err| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            (err.0).0
        })
    }

    /// Number of items currently waiting on a timer
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

// ============================================================================
// Scheduler task
// ============================================================================

async fn run(
    mut rx: mpsc::UnboundedReceiver<(WorkItem, Duration)>,
    work_tx: mpsc::Sender<WorkItem>,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    debug!("Retry scheduler starting");
    let mut queue: DelayQueue<WorkItem> = DelayQueue::new();
    let mut closed = false;

    loop {
        if closed && queue.is_empty() {
            break;
        }

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            msg = rx.recv(), if !closed => match msg {
                Some((item, delay)) => {
                    debug!(
                        path = %item.path(),
                        delay_ms = delay.as_millis() as u64,
                        "Retry scheduled"
                    );
                    queue.insert(item, delay);
                }
                None => closed = true,
            },

            Some(expired) = queue.next(), if !queue.is_empty() => {
                let mut item = expired.into_inner();
                pending.fetch_sub(1, Ordering::AcqRel);
                if let Err(e) = item.requeue() {
                    warn!(path = %item.path(), error = %e, "Unexpected state on requeue");
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sent = work_tx.send(item) => {
                        if sent.is_err() {
                            debug!("Work channel closed, stopping retry scheduler");
                            break;
                        }
                    }
                }
            }
        }
    }

    if !queue.is_empty() {
        info!(dropped = queue.len(), "Retry scheduler stopped with items still waiting");
    }
}
