//! Accept loop shared by the gateway and the compute node.
//!
//! Each accepted connection is handed to its own Tokio task, so a slow peer
//! only ever stalls its own task. A semaphore caps how many connections are
//! served at once: the loop takes a permit *before* calling `accept`, so
//! excess connections wait in the kernel backlog instead of piling up as
//! tasks.

use crate::server::{
    config::ListenerConfig,
    telemetry::{
        decrement_connections_inflight, increment_connections, increment_connections_inflight,
    },
};
use core::{future::Future, time::Duration};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    signal,
    sync::Semaphore,
    time::{sleep, timeout},
};
use tokio_util::task::TaskTracker;

/// Per-connection behavior of a tier.
///
/// Implementations own everything the connection needs (configuration, log
/// sink, worker pool) and are cloned into each connection task.
pub trait ConnectionHandler: Clone + Send + Sync + 'static {
    /// Serves one connection to completion. The stream is closed when it is
    /// dropped, whichever way the handler returns.
    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> impl Future<Output = ()> + Send;
}

/// Runs the accept loop until `shutdown` resolves, then waits up to
/// `config.shutdown_timeout` for in-flight connections to finish.
///
/// Accept errors are logged and never end the loop.
pub async fn serve<H, F>(listener: TcpListener, handler: H, config: &ListenerConfig, shutdown: F)
where
    H: ConnectionHandler,
    F: Future<Output = ()>,
{
    let permits = Arc::new(Semaphore::new(config.max_connections));
    let tracker = TaskTracker::new();
    tokio::pin!(shutdown);

    loop {
        let permit = tokio::select! {
            () = &mut shutdown => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept connection");
                    // Typically fd exhaustion; give in-flight connections a
                    // moment to release descriptors.
                    sleep(Duration::from_millis(50)).await;
                    continue;
                }
            },
        };

        increment_connections();
        increment_connections_inflight();
        tracing::debug!(%peer, "accepted connection");

        let handler = handler.clone();
        tracker.spawn(async move {
            handler.handle(stream, peer).await;
            decrement_connections_inflight();
            drop(permit);
        });
    }

    tracker.close();
    tracing::info!(
        inflight = tracker.len(),
        "Stopped accepting connections, draining in-flight requests"
    );

    match timeout(config.shutdown_timeout, tracker.wait()).await {
        Ok(()) => tracing::debug!("All in-flight connections drained"),
        Err(_) => tracing::warn!(
            inflight = tracker.len(),
            "Graceful drain timed out"
        ),
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
