//! Single-lane, rate-limited dispatch queue.
//!
//! One worker task owns the execution slot. Submissions are admitted in FIFO
//! order, at most one per interval, and each runs to completion before the
//! next is admitted. An idle queue admits immediately.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

type Job = BoxFuture<'static, ()>;

/// Dispatch queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The worker has stopped and accepts no more work.
    #[error("dispatch queue is closed")]
    Closed,

    /// The task panicked before producing a result.
    #[error("dispatched task aborted")]
    Aborted,
}

/// Handle to the dispatch lane. Cloning shares the same lane.
///
/// The worker stops once every handle is dropped and the backlog is drained.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    interval: Duration,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("interval", &self.interval)
            .field("pending", &self.pending())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl DispatchQueue {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_worker(rx, interval, Arc::clone(&pending)));
        Self {
            tx,
            pending,
            interval,
        }
    }

    /// Minimum spacing between admissions.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Submissions waiting for admission.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Queue `task` and wait for its result.
    ///
    /// The task runs on the worker. Dropping the returned future does not
    /// cancel it; its result is then discarded.
    ///
    /// # Errors
    /// Returns [`DispatchError::Closed`] if the worker is gone and
    /// [`DispatchError::Aborted`] if the task panicked.
    pub async fn submit<F, T>(&self, task: F) -> Result<T, DispatchError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job = async move {
            let output = task.await;
            // Submitter may have given up.
            let _ = result_tx.send(output);
        }
        .boxed();

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(DispatchError::Closed);
        }

        result_rx.await.map_err(|_| {
            if self.tx.is_closed() {
                DispatchError::Closed
            } else {
                DispatchError::Aborted
            }
        })
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Job>,
    interval: Duration,
    pending: Arc<AtomicUsize>,
) {
    let mut next_admission = Instant::now();
    let mut admitted: u64 = 0;

    while let Some(job) = rx.recv().await {
        tokio::time::sleep_until(next_admission).await;
        let now = Instant::now();
        next_admission = now + interval;
        admitted += 1;
        pending.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(
            admission = admitted,
            pending = pending.load(Ordering::Acquire),
            "dispatch slot granted"
        );

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            tracing::error!(admission = admitted, "dispatched task panicked");
        }
    }

    tracing::debug!(admitted, "dispatch queue stopped");
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const INTERVAL: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn idle_queue_admits_immediately() {
        let queue = DispatchQueue::spawn(INTERVAL);
        let start = Instant::now();
        let value = queue.submit(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn admissions_are_spaced_by_interval_in_fifo_order() {
        let queue = DispatchQueue::spawn(INTERVAL);
        let log = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let queue = queue.clone();
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                queue
                    .submit(async move {
                        log.lock().unwrap().push((i, Instant::now()));
                    })
                    .await
                    .unwrap();
            }));
            // Fix submission order.
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let log = log.lock().unwrap();
        let order: Vec<u32> = log.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        let first = log[0].1;
        for (n, (_, at)) in log.iter().enumerate() {
            let n = u32::try_from(n).unwrap();
            assert!(at.duration_since(first) >= INTERVAL * n);
        }
        assert!(log[0].1.duration_since(start) < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_never_overlap() {
        let queue = DispatchQueue::spawn(Duration::from_millis(10));
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let queue = queue.clone();
            let running = Arc::clone(&running);
            let overlap = Arc::clone(&overlap);
            handles.push(tokio::spawn(async move {
                queue
                    .submit(async move {
                        if running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        // Overruns the interval.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_submitter_does_not_cancel_task() {
        let queue = DispatchQueue::spawn(INTERVAL);
        // Occupy the first slot so the next submission waits.
        queue.submit(async {}).await.unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let submitted = {
            let ran = Arc::clone(&ran);
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .submit(async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(queue.pending(), 1);
        submitted.abort();

        tokio::time::sleep(INTERVAL * 2).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_does_not_stop_the_lane() {
        let queue = DispatchQueue::spawn(Duration::from_millis(1));
        let result = queue
            .submit(async {
                panic!("boom");
            })
            .await;
        assert_eq!(result, Err::<(), _>(DispatchError::Aborted));

        assert_eq!(queue.submit(async { 1 }).await, Ok(1));
    }
}
