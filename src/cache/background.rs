//! Detached cache work that runs after a response has been returned.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use tokio::sync::Notify;
use tracing::warn;

const METRIC_BACKGROUND_FAILURE: &str = "offgrid_background_failure_total";

/// Tracks fire-and-forget tasks such as revalidation writes and trims.
///
/// Failures are logged and counted, never reported to the request that
/// spawned the task. [`BackgroundTasks::wait_idle`] lets shutdown and tests
/// wait for outstanding work.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    pending: AtomicUsize,
    idle: Notify,
}

struct PendingGuard(Arc<Inner>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` on the runtime without linking it to the caller.
    pub fn spawn<F, E>(&self, task: &'static str, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(self.inner.clone());
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = future.await {
                warn!(task, error = %err, "Background cache task failed");
                counter!(METRIC_BACKGROUND_FAILURE, "task" => task).increment(1);
            }
        });
    }

    /// Number of tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until every spawned task has finished, including tasks spawned
    /// while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}
