use super::{DeliveryWorker, WorkerError, WorkerState};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Owns a running [`DeliveryWorker`] task and its stop signal.
///
/// `stop` only requests the stop; the worker finishes any unit of work it
/// has started and exits at its next wait for entries.
pub struct WorkerHandle {
    cancel: CancellationToken,
    state: watch::Receiver<WorkerState>,
    task: Mutex<Option<JoinHandle<Result<(), WorkerError>>>>,
}

impl WorkerHandle {
    pub fn spawn(worker: DeliveryWorker) -> Self {
        let cancel = CancellationToken::new();
        let state = worker.subscribe();
        let task = tokio::spawn(worker.run(cancel.clone()));

        Self {
            cancel,
            state,
            task: Mutex::new(Some(task)),
        }
    }

    /// Request the worker to stop. Safe to call any number of times.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            info!("Worker stop already requested");
            return;
        }
        self.cancel.cancel();
        info!("Worker stop requested");
    }

    /// The stop signal has fired; the worker may still be finishing a unit of work.
    pub fn stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The worker task has reached `Stopped`.
    pub fn is_stopped(&self) -> bool {
        self.state() == WorkerState::Stopped
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Wait until the consumer group exists and the worker is consuming.
    ///
    /// Returns the startup error if the worker exited before that point.
    pub async fn ready(&self) -> Result<(), WorkerError> {
        let mut rx = self.state.clone();
        let reached = rx
            .wait_for(|s| *s != WorkerState::Starting)
            .await
            .map(|s| *s)
            .unwrap_or(WorkerState::Stopped);

        if reached != WorkerState::Stopped {
            return Ok(());
        }

        self.join().await
    }

    /// Wait until the worker task has reached `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.state.clone();
        // A closed channel means the task is gone, which is also stopped.
        let _ = rx.wait_for(|s| *s == WorkerState::Stopped).await;
    }

    /// Stop the worker and wait for the task to exit.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        self.stop();
        let result = self.join().await;
        match &result {
            Ok(()) => info!("Delivery worker shut down"),
            Err(e) => error!(error = %e, "Delivery worker exited with error"),
        }
        result
    }

    async fn join(&self) -> Result<(), WorkerError> {
        let task = self.task.lock().await.take();
        match task {
            Some(task) => task
                .await
                .map_err(|e| WorkerError::Join(e.to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
