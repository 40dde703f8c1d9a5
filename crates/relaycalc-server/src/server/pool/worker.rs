use super::request::WorkRequest;
use parking_lot::Mutex;
use relaycalc_core::{
    Error, Result, compute,
    message::{Operation, Outcome},
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio::sync::mpsc;

/// Worker thread body: processes [`WorkRequest`]s from the shared queue
/// until it receives [`WorkRequest::Shutdown`] or the queue closes.
///
/// Workers take turns holding the receiver lock while they wait, so each
/// request goes to exactly one worker in FIFO order.
///
/// # Arguments
///
/// - `worker_id`: Index of this worker (used for logs).
/// - `queue`: Receiver shared by every worker in the pool.
pub fn worker_loop(worker_id: usize, queue: &Mutex<mpsc::Receiver<WorkRequest>>) {
    tracing::trace!("Worker {worker_id} started");

    loop {
        // The guard is released as soon as a request is taken.
        let Some(work) = queue.lock().blocking_recv() else {
            tracing::debug!("Worker {worker_id} queue closed");
            break;
        };

        match work {
            WorkRequest::Compute {
                operation,
                response,
            } => {
                let result = evaluate_isolated(&operation);
                if response.send(result).is_err() {
                    tracing::debug!("Worker {worker_id} result dropped: submitter went away");
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}

/// Evaluates `operation`, turning a panic into [`Error::WorkerPanic`] so the
/// worker keeps serving.
fn evaluate_isolated(operation: &Operation) -> Result<Outcome> {
    catch_unwind(AssertUnwindSafe(|| compute::evaluate(operation))).unwrap_or_else(|_| {
        tracing::error!(operation = operation.tag(), "computation panicked");
        Err(Error::WorkerPanic)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};
    use tokio::sync::oneshot;

    #[test]
    fn answers_each_request_then_stops_on_shutdown() {
        let (tx, rx) = mpsc::channel(4);
        let queue = Arc::new(Mutex::new(rx));
        let handle = thread::spawn({
            let queue = Arc::clone(&queue);
            move || worker_loop(0, &queue)
        });

        let (response, result) = oneshot::channel();
        tx.blocking_send(WorkRequest::Compute {
            operation: Operation::Fibonacci { n: 10 },
            response,
        })
        .unwrap();
        assert_eq!(result.blocking_recv().unwrap(), Ok(Outcome::Integer(55)));

        let (response, result) = oneshot::channel();
        tx.blocking_send(WorkRequest::Compute {
            operation: Operation::Fibonacci { n: -1 },
            response,
        })
        .unwrap();
        assert!(matches!(
            result.blocking_recv().unwrap(),
            Err(Error::InvalidArgument { .. })
        ));

        let (response, ack) = oneshot::channel();
        tx.blocking_send(WorkRequest::Shutdown { response }).unwrap();
        ack.blocking_recv().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn exits_when_the_queue_closes() {
        let (tx, rx) = mpsc::channel::<WorkRequest>(1);
        let queue = Arc::new(Mutex::new(rx));
        let handle = thread::spawn({
            let queue = Arc::clone(&queue);
            move || worker_loop(0, &queue)
        });
        drop(tx);
        handle.join().unwrap();
    }
}
