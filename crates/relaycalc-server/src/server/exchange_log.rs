//! Append-only exchange log, one file per tier.
//!
//! Handlers never touch the file directly. They hold a cloned
//! [`ExchangeLog`] handle and push formatted entries into a bounded channel;
//! a single writer task owns the file and appends whole lines, so concurrent
//! entries can never interleave mid-line. Logging never blocks a connection:
//! when the writer falls behind and the channel is full, entries are dropped
//! and counted (see [`ExchangeLog::dropped`]).
//!
//! Every entry is mirrored to `tracing` at the matching level.
//!
//! Line format: `<RFC 3339 timestamp> [<TIER>] <LEVEL> <message>`.

use crate::server::telemetry::increment_log_entries_dropped;
use chrono::{Local, SecondsFormat};
use core::fmt;
use relaycalc_core::{Error, message::RequestId};
use serde::Serialize;
use std::{
    net::SocketAddr,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    fs::OpenOptions,
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
};

/// Entries that may wait for the writer before new ones are dropped.
pub const DEFAULT_LOG_CAPACITY: usize = 4096;

/// The tier an exchange log belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Gateway,
    Compute,
}

impl Tier {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Gateway => "GATEWAY",
            Self::Compute => "COMPUTE",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

enum LogCommand {
    Entry(String),
    Flush { response: oneshot::Sender<()> },
}

/// Cloneable handle to a tier's exchange log.
#[derive(Clone, Debug)]
pub struct ExchangeLog {
    tier: Tier,
    tx: mpsc::Sender<LogCommand>,
    dropped: Arc<AtomicU64>,
}

impl fmt::Debug for LogCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry(line) => f.debug_tuple("Entry").field(line).finish(),
            Self::Flush { .. } => f.write_str("Flush"),
        }
    }
}

impl ExchangeLog {
    /// Opens (creating if needed) `path` in append mode and spawns the
    /// writer task.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>, tier: Tier) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        Ok(Self::with_writer(file, tier))
    }

    /// Spawns the writer task over an arbitrary sink.
    pub fn with_writer<W>(writer: W, tier: Tier) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_capacity(writer, tier, DEFAULT_LOG_CAPACITY)
    }

    /// Like [`ExchangeLog::with_writer`], holding at most `capacity` pending
    /// entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity<W>(writer: W, tier: Tier, capacity: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(writer_loop(BufWriter::new(writer), rx));
        Self {
            tier,
            tx,
            dropped: Arc::default(),
        }
    }

    #[must_use]
    pub const fn tier(&self) -> Tier {
        self.tier
    }

    /// Entries dropped so far because the writer could not keep up.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Appends one entry. Never blocks.
    pub fn record(&self, severity: Severity, message: &str) {
        let tier = self.tier.label();
        match severity {
            Severity::Info => tracing::info!(tier, "{message}"),
            Severity::Warn => tracing::warn!(tier, "{message}"),
            Severity::Error => tracing::error!(tier, "{message}"),
        }

        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Millis, false);
        let line = format!("{timestamp} [{tier}] {severity} {message}\n");
        match self.tx.try_send(LogCommand::Entry(line)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                increment_log_entries_dropped();
                tracing::warn!(tier, dropped, "exchange log is backed up; entry dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(tier, "exchange log writer has stopped; entry dropped");
            }
        }
    }

    pub fn started(&self, addr: SocketAddr) {
        let name = match self.tier {
            Tier::Gateway => "gateway",
            Tier::Compute => "compute node",
        };
        self.record(Severity::Info, &format!("{name} started on {addr}"));
    }

    /// A completed request/response exchange.
    pub fn exchange<Req, Resp>(
        &self,
        peer: SocketAddr,
        request_id: &RequestId,
        request: &Req,
        response: &Resp,
    ) where
        Req: Serialize + ?Sized,
        Resp: Serialize + ?Sized,
    {
        self.record(
            Severity::Info,
            &format!(
                "{peer} req_id={request_id} {} -> {}",
                render(request),
                render(response)
            ),
        );
    }

    /// A request rejected at the credential check.
    pub fn denied<Req>(&self, peer: SocketAddr, request: &Req)
    where
        Req: Serialize + ?Sized,
    {
        self.record(
            Severity::Warn,
            &format!("{peer} access denied: {}", render(request)),
        );
    }

    /// A request that ended in an error.
    pub fn failure(&self, peer: SocketAddr, request_id: Option<&RequestId>, err: &Error) {
        let message = match request_id {
            Some(id) => format!("{peer} req_id={id} {err}"),
            None => format!("{peer} {err}"),
        };
        self.record(Severity::Error, &message);
    }

    /// Waits until every entry queued so far has reached the sink.
    ///
    /// Waits for room in the queue if the writer is behind.
    pub async fn flush(&self) {
        let (response, done) = oneshot::channel();
        if self.tx.send(LogCommand::Flush { response }).await.is_ok() {
            let _ = done.await;
        }
    }
}

fn render<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

async fn writer_loop<W>(mut writer: BufWriter<W>, mut rx: mpsc::Receiver<LogCommand>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            LogCommand::Entry(line) => {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    tracing::error!(error = %e, "failed to append to exchange log");
                }
                // Flush once the queue is drained so bursts share one write.
                if rx.is_empty() {
                    if let Err(e) = writer.flush().await {
                        tracing::error!(error = %e, "failed to flush exchange log");
                    }
                }
            }
            LogCommand::Flush { response } => {
                if let Err(e) = writer.flush().await {
                    tracing::error!(error = %e, "failed to flush exchange log");
                }
                let _ = response.send(());
            }
        }
    }

    if let Err(e) = writer.flush().await {
        tracing::error!(error = %e, "failed to flush exchange log on close");
    }
}
