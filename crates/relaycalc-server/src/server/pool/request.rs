use relaycalc_core::{
    Result,
    message::{Operation, Outcome},
};
use tokio::sync::oneshot;

/// A message sent from the worker pool to a worker thread.
///
/// [`WorkRequest`]s travel over the pool's shared bounded queue and are
/// consumed by whichever worker is free first.
#[derive(Debug)]
pub enum WorkRequest {
    /// Evaluate `operation` and send exactly one result back.
    ///
    /// - `operation`: The validated operation to evaluate.
    /// - `response`: One-shot channel for the result or the error.
    Compute {
        operation: Operation,
        response: oneshot::Sender<Result<Outcome>>,
    },

    /// Request the worker to stop after acknowledging.
    ///
    /// - `response`: One-shot channel for acknowledging that the worker has
    ///   left its loop.
    Shutdown { response: oneshot::Sender<()> },
}
