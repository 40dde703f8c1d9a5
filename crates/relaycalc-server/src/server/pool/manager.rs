//! Worker pool for CPU-bound evaluation.
//!
//! [`WorkerPool`] owns a fixed set of worker threads fed from one bounded
//! FIFO queue. Connection handlers call [`WorkerPool::submit`] and wait on a
//! oneshot channel for exactly one result per submission. Shutdown is
//! coordinated through a shared [`CancellationToken`].

use super::{request::WorkRequest, worker::worker_loop};
use core::time::Duration;
use parking_lot::Mutex;
use relaycalc_core::{
    Error, Result,
    message::{Operation, Outcome},
};
use std::{sync::Arc, thread};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// A fixed pool of worker threads that evaluate [`Operation`]s.
///
/// Submission is safe from any number of concurrent handlers. Requests are
/// admitted in FIFO order; there is no batching or prioritization.
pub struct WorkerPool {
    queue: mpsc::Sender<WorkRequest>,
    num_workers: usize,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `num_workers` worker threads sharing a queue of `queue_depth`
    /// pending requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a worker thread cannot be spawned.
    ///
    /// # Panics
    ///
    /// Panics if `queue_depth` is zero.
    pub fn spawn(num_workers: usize, queue_depth: usize, shutdown_timeout: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel(queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..num_workers {
            let rx = Arc::clone(&rx);
            thread::Builder::new()
                .name(format!("compute-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, &rx))
                .map_err(|e| Error::Io {
                    context: format!("failed to spawn worker {worker_id}: {e}"),
                })?;
        }

        Ok(Self {
            queue: tx,
            num_workers,
            shutdown_token: CancellationToken::new(),
            shutdown_timeout,
        })
    }

    #[must_use]
    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Queues `operation` and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - [`Error::ServiceShutdown`] if the pool is shutting down.
    /// - [`Error::ChannelError`] if the queue or the result channel closed.
    /// - Whatever error the computation itself produced.
    pub async fn submit(&self, operation: Operation) -> Result<Outcome> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let (response, result) = oneshot::channel();
        self.queue
            .send(WorkRequest::Compute {
                operation,
                response,
            })
            .await
            .map_err(|_| Error::ChannelError {
                context: "worker queue closed".to_owned(),
            })?;

        result.await.map_err(|_| Error::ChannelError {
            context: "worker dropped the result".to_owned(),
        })?
    }

    /// Gracefully shuts down all workers.
    ///
    /// - Cancels the shared [`CancellationToken`] so new submissions fail.
    /// - Queues one [`WorkRequest::Shutdown`] per worker behind any work
    ///   already queued, so that work still completes.
    /// - Waits (up to `shutdown_timeout` per worker) for acknowledgements.
    pub async fn shutdown(&self) {
        // === Phase 1: Refuse new submissions ===
        tracing::info!("Refusing new computations");
        self.shutdown_token.cancel();

        // === Phase 2: Notify workers to shut down ===
        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.num_workers);

        for i in 0..self.num_workers {
            let (tx, rx) = oneshot::channel();
            if let Err(e) = self.queue.send(WorkRequest::Shutdown { response: tx }).await {
                tracing::error!("Failed to send shutdown to worker {i}: {e}");
                break;
            }
            shutdown_handles.push((i, rx));
        }

        // === Phase 3: Wait for acknowledgements ===
        let limit = self.shutdown_timeout;
        let acknowledgements = shutdown_handles.into_iter().map(|(i, rx)| async move {
            match timeout(limit, rx).await {
                Ok(Ok(())) => tracing::trace!("Worker {i} shutdown acknowledged"),
                Ok(Err(e)) => tracing::error!("Worker {i} returned error: {e}"),
                Err(_) => tracing::warn!("Worker {i} shutdown timed out"),
            }
        });

        futures::future::join_all(acknowledgements).await;

        tracing::info!("Worker pool shutdown complete");
    }
}
