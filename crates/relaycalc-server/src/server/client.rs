//! Outbound side of a hop: connect, send one message, read one reply.
//!
//! Used by the gateway to reach the compute node and by the caller to reach
//! the gateway. There is exactly one attempt per call; failures are returned
//! to the caller, never retried.

use relaycalc_core::{
    Error, Result,
    codec::{framed, read_message, write_message},
    message::Message,
};
use serde::Serialize;
use tokio::net::TcpStream;

/// Opens a fresh connection to `addr`, sends `message` as one line, and waits
/// for the single reply line.
///
/// # Errors
///
/// - [`Error::UpstreamUnavailable`] if the connection cannot be established.
/// - [`Error::UpstreamClosed`] if the peer closes without replying.
/// - [`Error::MalformedMessage`] if the reply is not a JSON object.
/// - [`Error::Io`] if the exchange fails mid-way.
pub async fn exchange<M>(addr: &str, message: &M, max_line_bytes: usize) -> Result<Message>
where
    M: Serialize + ?Sized,
{
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::UpstreamUnavailable {
            addr: addr.to_owned(),
            reason: e.to_string(),
        })?;
    let mut conn = framed(stream, max_line_bytes);

    write_message(&mut conn, message).await?;
    read_message(&mut conn).await?.ok_or(Error::UpstreamClosed)
}
