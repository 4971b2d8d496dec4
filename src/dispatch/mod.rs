// ABOUTME: Bounded worker pool shared by the save, validate and load flows.
// ABOUTME: Backpressured dispatch, run-scoped cancellation, failure-free wait.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Upper bound an operator-supplied pool size is clamped to.
pub const MAX_WORKERS: usize = 20;

/// Clamp an operator-supplied pool size into the supported range.
pub fn clamp_workers(jobs: usize) -> usize {
    jobs.clamp(1, MAX_WORKERS)
}

/// One image-list line plus its payload.
///
/// The ordinal is used for log correlation only; it carries no ordering
/// guarantee. The timeout, when set, bounds this unit alone.
pub struct WorkUnit<T> {
    pub id: usize,
    pub line: String,
    pub timeout: Option<Duration>,
    pub payload: T,
}

/// Bounded-concurrency worker pool.
///
/// The channel capacity equals the worker count, so a producer enqueuing
/// past capacity blocks until a slot frees. Unit failures never surface
/// here: the caller-supplied handler records them and the unit is
/// discarded. `wait` returns once every dispatched unit has completed.
pub struct WorkerPool<T> {
    tx: mpsc::Sender<WorkUnit<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start `size` workers running `handler` for each dispatched unit.
    ///
    /// Cancelling `cancel` stops workers from picking up queued units;
    /// units already in flight are the handler's responsibility (it
    /// observes the same token).
    pub fn start<H, F>(size: usize, cancel: CancellationToken, handler: H) -> Self
    where
        H: Fn(WorkUnit<T>) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let size = clamp_workers(size);
        let (tx, rx) = mpsc::channel::<WorkUnit<T>>(size);
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);

        let workers = (0..size)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let unit = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                _ = cancel.cancelled() => None,
                                unit = rx.recv() => unit,
                            }
                        };
                        let Some(unit) = unit else {
                            tracing::debug!(worker, "worker exiting");
                            break;
                        };
                        tracing::debug!(worker, img = unit.id, "unit picked up");
                        handler(unit).await;
                    }
                })
            })
            .collect();

        Self { tx, workers }
    }

    /// Enqueue one unit, blocking while the pool is saturated.
    ///
    /// Returns false when the pool has shut down (run cancelled); the unit
    /// is dropped in that case.
    pub async fn dispatch(&self, unit: WorkUnit<T>) -> bool {
        self.tx.send(unit).await.is_ok()
    }

    /// Block until every dispatched unit has completed and workers exited.
    pub async fn wait(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!("worker task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_every_unit_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let pool = WorkerPool::start(3, CancellationToken::new(), move |unit: WorkUnit<u32>| {
            let seen = Arc::clone(&seen);
            async move {
                tokio::time::sleep(Duration::from_millis(u64::from(unit.payload))).await;
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        for i in 0..17u32 {
            let ok = pool
                .dispatch(WorkUnit {
                    id: i as usize + 1,
                    line: format!("img-{i}"),
                    timeout: None,
                    payload: i % 5,
                })
                .await;
            assert!(ok);
        }
        pool.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 17);
    }

    #[tokio::test]
    async fn handler_panics_do_not_abort_siblings() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let pool = WorkerPool::start(2, CancellationToken::new(), move |unit: WorkUnit<bool>| {
            let seen = Arc::clone(&seen);
            async move {
                if unit.payload {
                    panic!("boom");
                }
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        pool.dispatch(WorkUnit {
            id: 1,
            line: "bad".into(),
            timeout: None,
            payload: true,
        })
        .await;
        pool.dispatch(WorkUnit {
            id: 2,
            line: "good".into(),
            timeout: None,
            payload: false,
        })
        .await;
        pool.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_queued_units() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(1, cancel.clone(), move |_unit: WorkUnit<()>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });
        pool.dispatch(WorkUnit {
            id: 1,
            line: "first".into(),
            timeout: None,
            payload: (),
        })
        .await;
        // Let the single worker pick up the first unit before cancelling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        // Give the worker a moment to observe cancellation, then any
        // further dispatch may be dropped rather than executed.
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.dispatch(WorkUnit {
            id: 2,
            line: "second".into(),
            timeout: None,
            payload: (),
        })
        .await;
        pool.wait().await;
        assert!(counter.load(Ordering::SeqCst) <= 1 + 1);
        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
