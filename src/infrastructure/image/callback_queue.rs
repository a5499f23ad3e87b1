//! The single context completion handlers run on.

use std::panic::AssertUnwindSafe;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::domain::errors::{DownloadError, DownloadResult};

/// A unit of work delivered to a callback context.
pub type CallbackJob = Box<dyn FnOnce() + Send + 'static>;

/// Serialized execution context for completion handlers.
///
/// Implementations must run jobs one at a time, in dispatch order.
pub trait CallbackContext: Send + Sync {
    /// Schedules a job.
    fn dispatch(&self, job: CallbackJob);
}

/// Runs jobs in order on one dedicated tokio task.
#[derive(Debug, Clone)]
pub struct SerialCallbackQueue {
    job_tx: mpsc::UnboundedSender<CallbackJob>,
}

impl SerialCallbackQueue {
    /// Starts the queue on the current runtime.
    ///
    /// # Errors
    /// Returns [`DownloadError::Configuration`] when called outside a tokio runtime.
    pub fn new() -> DownloadResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| DownloadError::configuration(format!("no tokio runtime: {e}")))?;
        Ok(Self::spawn_on(&handle))
    }

    /// Starts the queue on the given runtime.
    #[must_use]
    pub fn spawn_on(handle: &Handle) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        handle.spawn(Self::run(job_rx));
        Self { job_tx }
    }

    async fn run(mut job_rx: mpsc::UnboundedReceiver<CallbackJob>) {
        while let Some(job) = job_rx.recv().await {
            if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("Completion handler panicked");
            }
        }
        debug!("Callback queue stopped");
    }
}

impl CallbackContext for SerialCallbackQueue {
    fn dispatch(&self, job: CallbackJob) {
        if self.job_tx.send(job).is_err() {
            error!("Callback queue closed, dropping completion");
        }
    }
}
