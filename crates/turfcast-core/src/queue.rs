//! Rate-limited upstream request queue.
//!
//! All outbound upstream calls are funneled through one queue so that,
//! across every caller, no two calls start less than the configured
//! minimum spacing apart. Spacing is measured start-to-start: a slow
//! call does not inflate the delay beyond the spacing itself.
//!
//! Jobs run strictly in enqueue order on a single drain task, and each
//! caller gets its own result back; a failure in one job never affects
//! the jobs queued behind it.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::trace;

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The drain task is gone; no more jobs can run.
    #[error("request queue closed")]
    Closed,
}

/// A queued unit of work, erased so the drain loop can run anything.
type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// FIFO queue enforcing minimum start-to-start spacing between jobs.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl RequestQueue {
    /// Create a queue and spawn its drain task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(min_spacing: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(rx, min_spacing));
        Self { tx }
    }

    /// Enqueue a unit of work and wait for its result.
    ///
    /// The job starts only once every job enqueued before it has
    /// completed and the minimum spacing since the previous job's
    /// start has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the drain task is gone.
    pub async fn enqueue<T, F, Fut>(&self, job: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let wrapped: Job = Box::new(move || {
            Box::pin(async move {
                // The caller may have gone away; the job still ran.
                let _ = done_tx.send(job().await);
            })
        });

        self.tx.send(wrapped).map_err(|_| QueueError::Closed)?;
        done_rx.await.map_err(|_| QueueError::Closed)
    }
}

/// The single drain loop: one job in flight at a time, spaced apart.
async fn drain(mut rx: mpsc::UnboundedReceiver<Job>, min_spacing: Duration) {
    let mut last_start: Option<Instant> = None;

    while let Some(job) = rx.recv().await {
        if let Some(prev) = last_start {
            let since = prev.elapsed();
            if since < min_spacing {
                tokio::time::sleep(min_spacing - since).await;
            }
        }
        last_start = Some(Instant::now());
        trace!("Dispatching queued upstream call");
        job().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::sync::{Arc, Mutex};

    const SPACING: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_starts() {
        let queue = RequestQueue::new(SPACING);
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        // Random arrival delays so the callers interleave in a
        // different order from the spawn order. Seeded for
        // reproducibility.
        let mut rng = StdRng::seed_from_u64(0x7a5e);
        let delays: Vec<u64> = (0..6).map(|_| rng.random_range(0..200)).collect();

        let mut handles = Vec::new();
        for (i, delay) in delays.into_iter().enumerate() {
            let queue = queue.clone();
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                queue
                    .enqueue(move || async move {
                        starts.lock().unwrap().push(Instant::now());
                        i
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 6);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= SPACING, "starts closer than spacing");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order() {
        let queue = RequestQueue::new(Duration::from_millis(10));
        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        // join! polls each enqueue future in order, so the sends hit
        // the queue in the order written here.
        let (o1, o2, o3) = (order.clone(), order.clone(), order.clone());
        let (r1, r2, r3) = tokio::join!(
            queue.enqueue(move || async move { o1.lock().unwrap().push(1) }),
            queue.enqueue(move || async move { o2.lock().unwrap().push(2) }),
            queue.enqueue(move || async move { o3.lock().unwrap().push(3) }),
        );
        r1.unwrap();
        r2.unwrap();
        r3.unwrap();

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_job_does_not_inflate_spacing() {
        let queue = RequestQueue::new(SPACING);

        let first_start = Instant::now();
        let (slow, fast) = tokio::join!(
            queue.enqueue(|| async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                Instant::now()
            }),
            queue.enqueue(|| async { Instant::now() }),
        );

        // The slow job itself exceeded the spacing, so the second job
        // starts as soon as the first completes.
        let slow_done = slow.unwrap();
        let fast_start = fast.unwrap();
        assert!(slow_done - first_start >= Duration::from_millis(1500));
        assert!(fast_start - slow_done < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_isolated_per_job() {
        let queue = RequestQueue::new(Duration::from_millis(10));

        let (failed, ok) = tokio::join!(
            queue.enqueue(|| async { Err::<(), &str>("upstream exploded") }),
            queue.enqueue(|| async { Ok::<u32, &str>(7) }),
        );

        assert_eq!(failed.unwrap(), Err("upstream exploded"));
        assert_eq!(ok.unwrap(), Ok(7));
    }
}
