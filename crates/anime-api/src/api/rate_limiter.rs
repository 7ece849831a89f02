//! Rate-limited FIFO dispatch queue.
//!
//! Units of work are sent over a channel to a single drain task, which spaces
//! dispatches at least `min_interval` apart (and, optionally, caps dispatches per
//! trailing minute) and runs each unit to completion before taking the next.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Default spacing between dispatches (stays under 3 req/s)
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(350);

const MINUTE: Duration = Duration::from_secs(60);

/// A queued unit of work. Settles its own caller's future when polled to completion.
type QueuedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The drain task is gone, so queued work can never run
#[derive(Debug, Clone, Copy, Error)]
#[error("dispatch queue closed")]
pub struct QueueClosed;

/// Spacing state owned by the drain task
#[derive(Debug)]
struct LimiterState {
    min_interval: Duration,
    max_per_minute: Option<u32>,
    last_dispatch: Option<Instant>,
    recent_dispatches: VecDeque<Instant>,
}

impl LimiterState {
    /// Wait until the next dispatch is allowed, then record it
    async fn acquire(&mut self) {
        if let Some(max_per_minute) = self.max_per_minute {
            let now = Instant::now();
            while let Some(&oldest) = self.recent_dispatches.front() {
                if now.duration_since(oldest) >= MINUTE {
                    self.recent_dispatches.pop_front();
                } else {
                    break;
                }
            }

            if self.recent_dispatches.len() >= max_per_minute as usize {
                if let Some(&oldest) = self.recent_dispatches.front() {
                    let wait_time = MINUTE.saturating_sub(now.duration_since(oldest));
                    debug!(
                        wait_ms = wait_time.as_millis(),
                        "Rate limit: waiting for per-minute window"
                    );
                    sleep(wait_time).await;
                    self.recent_dispatches.pop_front();
                }
            }
        }

        if let Some(last) = self.last_dispatch {
            let elapsed = Instant::now().duration_since(last);
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!(
                    wait_ms = wait_time.as_millis(),
                    "Rate limit: spacing dispatch"
                );
                sleep(wait_time).await;
            }
        }

        // Recorded at dispatch, not at completion
        let dispatched_at = Instant::now();
        self.last_dispatch = Some(dispatched_at);
        if self.max_per_minute.is_some() {
            self.recent_dispatches.push_back(dispatched_at);
        }
    }
}

/// FIFO dispatch queue enforcing a minimum spacing between units of work
#[derive(Debug)]
pub struct RateLimiter {
    sender: mpsc::UnboundedSender<QueuedTask>,
    /// Receiver waiting for its drain task; `None` once the drain is running
    pending_drain: Mutex<Option<(mpsc::UnboundedReceiver<QueuedTask>, LimiterState)>>,
    dispatched: Arc<AtomicU64>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL, None)
    }
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// No task is spawned until the first `enqueue`, so this can be called
    /// outside a Tokio runtime.
    pub fn new(min_interval: Duration, max_per_minute: Option<u32>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = LimiterState {
            min_interval,
            max_per_minute,
            last_dispatch: None,
            recent_dispatches: VecDeque::new(),
        };

        Self {
            sender,
            pending_drain: Mutex::new(Some((receiver, state))),
            dispatched: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a unit of work and return a future for its outcome.
    ///
    /// The unit joins the queue when this is called, not when the returned future
    /// is first polled, so queue order is call order. The work itself does not
    /// start until the drain task dispatches it. A failing unit settles only its
    /// own caller; the queue moves on to the next unit.
    pub fn enqueue<F>(&self, work: F) -> impl Future<Output = Result<F::Output, QueueClosed>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: QueuedTask = Box::pin(async move {
            // The caller may have stopped waiting; the outcome is then dropped
            let _ = tx.send(work.await);
        });

        self.ensure_draining();
        let queued = self.sender.send(task).map_err(|_| QueueClosed);

        async move {
            queued?;
            rx.await.map_err(|_| QueueClosed)
        }
    }

    /// Number of units dispatched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    fn ensure_draining(&self) {
        let pending = self
            .pending_drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some((receiver, state)) = pending {
            debug!("Starting dispatch queue drain task");
            tokio::spawn(drain(receiver, state, Arc::clone(&self.dispatched)));
        }
    }
}

/// Process queued units strictly in order until every sender is dropped
async fn drain(
    mut receiver: mpsc::UnboundedReceiver<QueuedTask>,
    mut state: LimiterState,
    dispatched: Arc<AtomicU64>,
) {
    while let Some(task) = receiver.recv().await {
        state.acquire().await;
        dispatched.fetch_add(1, Ordering::Relaxed);
        task.await;
    }
    debug!("Dispatch queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<(usize, Instant)>>>;

    fn record(log: &Log, id: usize) -> impl Future<Output = usize> + Send + 'static {
        let log = Arc::clone(log);
        async move {
            log.lock().unwrap().push((id, Instant::now()));
            id
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_are_spaced() {
        let limiter = Arc::new(RateLimiter::default());
        let log: Log = Arc::default();

        let handles: Vec<_> = (0..5)
            .map(|id| {
                let limiter = Arc::clone(&limiter);
                let work = record(&log, id);
                tokio::spawn(async move { limiter.enqueue(work).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 5);
        for pair in log.windows(2) {
            assert!(pair[1].1 >= pair[0].1);
            assert!(pair[1].1 - pair[0].1 >= DEFAULT_MIN_INTERVAL);
        }
        assert_eq!(limiter.dispatched(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order() {
        let limiter = RateLimiter::new(Duration::from_millis(10), None);
        let log: Log = Arc::default();

        // All four are queued before any of them is awaited
        let pending: Vec<_> = (0..4).map(|id| limiter.enqueue(record(&log, id))).collect();

        // Await in reverse: settlement is independent, dispatch order is not
        let mut results = Vec::new();
        for p in pending.into_iter().rev() {
            results.push(p.await.unwrap());
        }

        assert_eq!(results, vec![3, 2, 1, 0]);
        let order: Vec<usize> = log.lock().unwrap().iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_dispatch_is_immediate() {
        let limiter = RateLimiter::default();
        let start = Instant::now();

        limiter.enqueue(async { 1 }).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_measured_from_dispatch_not_completion() {
        let limiter = RateLimiter::default();
        let start = Instant::now();

        // First unit takes longer than the spacing interval to complete
        limiter
            .enqueue(sleep(Duration::from_millis(500)))
            .await
            .unwrap();
        limiter.enqueue(async {}).await.unwrap();

        // Second dispatch needs no extra wait: 500ms already passed since the first
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_halt_queue() {
        let limiter = RateLimiter::default();

        let failed: Result<u32, String> = limiter
            .enqueue(async { Err("boom".to_string()) })
            .await
            .unwrap();
        let ok: Result<u32, String> = limiter.enqueue(async { Ok(7) }).await.unwrap();

        assert_eq!(failed, Err("boom".to_string()));
        assert_eq!(ok, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_minute_window() {
        let limiter = RateLimiter::new(Duration::from_millis(10), Some(3));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.enqueue(async {}).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(1));

        // Fourth dispatch waits for the first to leave the trailing minute
        limiter.enqueue(async {}).await.unwrap();
        assert!(start.elapsed() >= MINUTE);
    }

    #[test]
    fn test_construct_outside_runtime() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.dispatched(), 0);
    }
}
