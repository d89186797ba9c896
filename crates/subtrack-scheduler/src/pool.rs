//! Worker pool plumbing shared by the reminder and rollover sweeps.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;

/// Consumer side of a bounded job queue, shareable across workers.
///
/// The queue closes when every sender is dropped; workers then drain what
/// is left and `next` returns `None`.
pub struct JobQueue<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for JobQueue<T> {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

impl<T: Send> JobQueue<T> {
    /// Create a queue holding at most `capacity` pending jobs.
    pub fn bounded(capacity: usize) -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx: Arc::new(Mutex::new(rx)) })
    }

    /// Next job, or `None` once the queue is closed and drained or
    /// `shutdown` fires.
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            job = async { self.rx.lock().await.recv().await } => job,
        }
    }
}

/// Countdown latch: sized up front, counted down by workers, awaited once.
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

#[derive(Default)]
struct WaitGroupInner {
    count: AtomicUsize,
    zero: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.inner.count.fetch_add(n, Ordering::AcqRel);
    }

    pub fn done(&self) {
        let previous = self
            .inner
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
        match previous {
            Ok(1) => self.inner.zero.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::warn!("⚠️ WaitGroup::done called more times than add"),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Resolve once the count reaches zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.zero.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitGroup").field("count", &self.count()).finish()
    }
}
