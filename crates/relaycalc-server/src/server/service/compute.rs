use crate::server::{
    config::ComputeConfig,
    elapsed_ms,
    exchange_log::ExchangeLog,
    listener::ConnectionHandler,
    pool::manager::WorkerPool,
    service::deliver,
    telemetry::{increment_request_errors, record_request_duration},
};
use relaycalc_core::{
    Error, Result,
    codec::{Connection, framed, read_message, write_message},
    message::{
        ComputeRequest, INVALID_OPERATION, Message, Operation, Outcome, RequestId, Response,
    },
};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::net::TcpStream;

/// Compute node connection handler.
///
/// Decodes one request, dispatches it to the [`WorkerPool`], and answers
/// with `{request_id, resultado, elapsed_ms}` or `{request_id, erro}`.
#[derive(Clone)]
pub struct ComputeService {
    pool: Arc<WorkerPool>,
    log: ExchangeLog,
    max_line_bytes: usize,
}

impl ComputeService {
    /// Starts the worker pool described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(config: &ComputeConfig, log: ExchangeLog) -> Result<Self> {
        let pool = WorkerPool::spawn(
            config.num_workers,
            config.queue_depth,
            config.listener.shutdown_timeout,
        )?;
        tracing::info!(workers = pool.num_workers(), "worker pool started");

        Ok(Self {
            pool: Arc::new(pool),
            log,
            max_line_bytes: config.listener.max_line_bytes,
        })
    }

    /// Stops the worker pool. Requests arriving afterwards are answered with
    /// a shutdown error.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Evaluates `request`. Unrecognized operations are answered here and
    /// never reach a worker.
    async fn dispatch(&self, request: ComputeRequest) -> Result<Outcome> {
        match request.operation {
            Operation::Unrecognized { tag } => {
                tracing::debug!(request_id = %request.request_id, tag = %tag, "unrecognized operation");
                Ok(Outcome::Text(INVALID_OPERATION.to_owned()))
            }
            operation => self.pool.submit(operation).await,
        }
    }

    async fn serve_one(&self, conn: &mut Connection<TcpStream>, peer: SocketAddr) {
        let mut request = match read_message(conn).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!(%peer, "peer closed without sending a request");
                return;
            }
            Err(err) => {
                self.reply_failure(conn, peer, None, &err).await;
                return;
            }
        };

        let request_id = match RequestId::resolve(&mut request) {
            Ok(id) => id,
            Err(err) => {
                self.reply_failure(conn, peer, None, &err).await;
                return;
            }
        };

        let start = Instant::now();
        let outcome = match ComputeRequest::from_message(&request) {
            Ok(typed) => self.dispatch(typed).await,
            Err(err) => Err(err),
        };
        let elapsed = elapsed_ms(start);
        record_request_duration(start.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok(resultado) => {
                let reply = Response::success(request_id.clone(), resultado, elapsed);
                deliver(conn, &self.log, peer, &request_id, &request, &reply).await;
            }
            Err(err) => self.reply_failure(conn, peer, Some(request_id), &err).await,
        }
    }

    async fn reply_failure(
        &self,
        conn: &mut Connection<TcpStream>,
        peer: SocketAddr,
        request_id: Option<RequestId>,
        err: &Error,
    ) {
        increment_request_errors();
        self.log.failure(peer, request_id.as_ref(), err);

        let reply = Response::failure(request_id, err);
        if let Err(e) = write_message(conn, &reply).await {
            tracing::debug!(%peer, error = %e, "failed to send error reply");
        }
    }
}

impl ConnectionHandler for ComputeService {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let mut conn = framed(stream, self.max_line_bytes);
        self.serve_one(&mut conn, peer).await;
    }
}

/// Evaluates a decoded message directly, bypassing the network. Used by the
/// benches and tests to isolate dispatch cost.
///
/// # Errors
///
/// Any decoding or computation error.
pub async fn evaluate_message(service: &ComputeService, message: &Message) -> Result<Outcome> {
    service.dispatch(ComputeRequest::from_message(message)?).await
}
