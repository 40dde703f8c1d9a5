//! Line-delimited JSON framing.
//!
//! [`JsonLines`] wraps `tokio-util`'s [`LinesCodec`]: each frame is a compact
//! JSON document followed by exactly one `\n`. `serde_json` escapes control
//! characters inside strings, so an encoded value can never contain a raw
//! line terminator.
//!
//! The protocol is single-shot: a connection carries one request and one
//! response, so callers use [`read_message`] and [`write_message`] once per
//! direction on a [`Connection`].

use crate::{Error, Result, message::Message};
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec};

/// Default upper bound on a single frame, terminator excluded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// A TCP (or any byte stream) connection framed with [`JsonLines`].
pub type Connection<T> = Framed<T, JsonLines>;

/// Codec for one JSON object per line.
///
/// Decoding yields a [`Message`]; any line that is not a JSON object is a
/// [`Error::MalformedMessage`]. Encoding accepts anything `Serialize`.
#[derive(Clone, Debug)]
pub struct JsonLines {
    lines: LinesCodec,
}

impl JsonLines {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_BYTES)
    }

    /// Rejects frames longer than `max_length` bytes instead of buffering
    /// them without bound.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.lines.max_length()
    }
}

impl Default for JsonLines {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line(line: &str) -> Result<Message> {
    Ok(serde_json::from_str(line)?)
}

impl Decoder for JsonLines {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match self.lines.decode(src)? {
            Some(line) => parse_line(&line).map(Some),
            None => Ok(None),
        }
    }

    // An unterminated final line is still a message; an empty buffer at EOF
    // is a clean end-of-stream.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match self.lines.decode_eof(src)? {
            Some(line) => parse_line(&line).map(Some),
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonLines {
    type Error = Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let line = serde_json::to_string(&item)?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}

/// Frames `io` with a [`JsonLines`] codec limited to `max_line_bytes`.
pub fn framed<T>(io: T, max_line_bytes: usize) -> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(io, JsonLines::with_max_length(max_line_bytes))
}

/// Reads the single message a peer is expected to send.
///
/// Returns `Ok(None)` when the peer closed the connection before sending
/// anything.
///
/// # Errors
///
/// Returns [`Error::MalformedMessage`] if the line is not a JSON object or is
/// too long, and [`Error::Io`] on socket failures.
pub async fn read_message<T>(conn: &mut Connection<T>) -> Result<Option<Message>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    conn.next().await.transpose()
}

/// Encodes `message` as one line and flushes it to the peer.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write fails.
pub async fn write_message<T, M>(conn: &mut Connection<T>, message: &M) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: Serialize + ?Sized,
{
    conn.send(message).await
}
