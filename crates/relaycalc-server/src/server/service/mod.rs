//! Connection handlers for the two server tiers.
//!
//! Both implement [`ConnectionHandler`](crate::server::listener::ConnectionHandler)
//! and follow the same discipline: read one line, answer with one line
//! (best-effort on the error path), record the exchange, and let the stream
//! drop.
//!
//! - [`gateway`] - [`GatewayService`](gateway::GatewayService): credential
//!   check and relay.
//! - [`compute`] - [`ComputeService`](compute::ComputeService): dispatch to
//!   the worker pool.

pub mod compute;
pub mod gateway;

use crate::server::exchange_log::ExchangeLog;
use relaycalc_core::{
    codec::{Connection, write_message},
    message::{Message, RequestId},
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Sends the final reply of a completed exchange and records it.
///
/// The exchange is logged whether or not the peer is still there to read
/// the reply; a failed send is only a debug event.
pub(crate) async fn deliver<T, R>(
    conn: &mut Connection<T>,
    log: &ExchangeLog,
    peer: SocketAddr,
    request_id: &RequestId,
    request: &Message,
    reply: &R,
) where
    T: AsyncRead + AsyncWrite + Unpin,
    R: Serialize + ?Sized,
{
    log.exchange(peer, request_id, request, reply);
    if let Err(e) = write_message(conn, reply).await {
        tracing::debug!(%peer, %request_id, error = %e, "failed to send reply");
    }
}
