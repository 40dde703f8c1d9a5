use crate::server::{
    client,
    config::GatewayConfig,
    elapsed_ms,
    exchange_log::ExchangeLog,
    listener::ConnectionHandler,
    service::deliver,
    telemetry::{increment_access_denied, increment_request_errors},
};
use relaycalc_core::{
    Error, Result,
    codec::{Connection, framed, read_message, write_message},
    message::{Message, RequestId, Response, VIA_GATEWAY, fields},
};
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::net::TcpStream;

/// Authenticating relay in front of the compute node.
///
/// Each connection carries exactly one request. Requests with the wrong
/// `chave` are answered with `access denied` and never forwarded; everything
/// else is stamped with a `request_id` and `via = "gateway"`, sent to the
/// compute node over a fresh connection, and the reply is returned with
/// `middleware_elapsed_ms` added.
#[derive(Clone)]
pub struct GatewayService {
    config: Arc<GatewayConfig>,
    log: ExchangeLog,
}

impl GatewayService {
    #[must_use]
    pub fn new(config: GatewayConfig, log: ExchangeLog) -> Self {
        Self {
            config: Arc::new(config),
            log,
        }
    }

    fn is_authorized(&self, request: &Message) -> bool {
        request
            .get(fields::CHAVE)
            .and_then(Value::as_str)
            .is_some_and(|chave| chave == self.config.shared_secret)
    }

    async fn serve_one(&self, conn: &mut Connection<TcpStream>, peer: SocketAddr) {
        let request = match read_message(conn).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!(%peer, "caller closed without sending a request");
                return;
            }
            Err(err) => {
                self.reply_failure(conn, peer, None, &err).await;
                return;
            }
        };

        if !self.is_authorized(&request) {
            increment_access_denied();
            self.log.denied(peer, &request);
            let reply = Response::failure(None, &Error::AccessDenied);
            if let Err(e) = write_message(conn, &reply).await {
                tracing::debug!(%peer, error = %e, "failed to send denial");
            }
            return;
        }

        let mut request = request;
        let request_id = match RequestId::resolve(&mut request) {
            Ok(id) => id,
            Err(err) => {
                self.reply_failure(conn, peer, None, &err).await;
                return;
            }
        };
        request.insert(fields::VIA.to_owned(), Value::from(VIA_GATEWAY));

        match self.relay(&request, &request_id).await {
            Ok(reply) => deliver(conn, &self.log, peer, &request_id, &request, &reply).await,
            Err(err) => self.reply_failure(conn, peer, Some(request_id), &err).await,
        }
    }

    /// Forwards `request` to the compute node and returns the reply to send
    /// on to the caller.
    async fn relay(&self, request: &Message, request_id: &RequestId) -> Result<Message> {
        let start = Instant::now();
        let mut reply = client::exchange(
            &self.config.upstream_addr,
            request,
            self.config.listener.max_line_bytes,
        )
        .await?;

        reply.insert(
            fields::MIDDLEWARE_ELAPSED_MS.to_owned(),
            Value::from(elapsed_ms(start)),
        );
        reply.insert(fields::REQUEST_ID.to_owned(), request_id.clone().into());
        Ok(reply)
    }

    /// Sends `{request_id, erro}` if the caller is still there, then records
    /// the failure.
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

impl ConnectionHandler for GatewayService {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let mut conn = framed(stream, self.config.listener.max_line_bytes);
        self.serve_one(&mut conn, peer).await;
    }
}
