//! Background task supervisor.
//!
//! Every detached unit of work goes through [`Background::run`]: it is
//! counted by a `TaskTracker` before it starts and wrapped in a panic
//! barrier, so a crashing sweep is logged and reported instead of taking
//! the scheduler or the process with it. Shutdown cancels the shared token
//! and waits for the outstanding count to drain.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use subtrack_core::error::{Result, TrackerError};

#[derive(Debug, Clone, Default)]
pub struct Background {
    tracker: TaskTracker,
    shutdown: CancellationToken,
    // Held across close/wait/reopen in `wait`.
    waiting: Arc<Mutex<()>>,
}

impl Background {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing shutdown token (e.g. one owned by the host process).
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown,
            waiting: Arc::default(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Launch `fut` as a tracked task. The handle resolves to
    /// `Err(TrackerError::Panic)` if the task panicked.
    pub fn run<F>(&self, name: &str, fut: F) -> JoinHandle<Result<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.to_string();
        tracing::debug!("🧵 Background task '{}' started ({} running)", name, self.tracker.len() + 1);
        self.tracker.spawn(async move {
            let result = catch_panic(async move {
                fut.await;
                Ok(())
            })
            .await;
            if let Err(e) = &result {
                tracing::error!("💥 Background task '{}' failed: {}", name, e);
            }
            result
        })
    }

    /// Number of tasks launched through `run` that have not finished.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Block until the outstanding count reaches zero.
    ///
    /// Concurrent callers take turns, so one cannot reopen the tracker
    /// while another is still waiting on it.
    pub async fn wait(&self) {
        let _turn = self.waiting.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel in-flight work and wait for it to drain.
    pub async fn shutdown(&self) {
        tracing::info!("🛑 Shutting down background tasks ({} running)", self.outstanding());
        self.shutdown.cancel();
        self.wait().await;
    }
}

/// Run `fut`, turning a panic into `TrackerError::Panic`.
pub(crate) async fn catch_panic<F>(fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(TrackerError::Panic(panic_message(&*payload))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
