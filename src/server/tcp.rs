use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{serve, Dispatcher};
use crate::shutdown::ShutdownSignal;

/// Pause after an accept error that is not tied to a single connection,
/// such as running out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Binds `addr` and serves each accepted connection with its own request loop.
pub async fn run(
    addr: &str,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {addr}"))?;
    info!("Listening on {}", listener.local_addr()?);
    accept_loop(listener, dispatcher, shutdown).await;
    Ok(())
}

/// How long to wait before accepting again after `e`.
fn accept_backoff(e: &io::Error) -> Option<Duration> {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => None,
        _ => Some(ACCEPT_ERROR_BACKOFF),
    }
}

/// Accepts until `shutdown` fires, then waits for open connections to drain.
async fn accept_loop(listener: TcpListener, dispatcher: Arc<Dispatcher>, shutdown: ShutdownSignal) {
    let mut connections = JoinSet::new();
    let mut stop = shutdown.clone();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop.fired() => break,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                if let Some(pause) = accept_backoff(&e) {
                    tokio::time::sleep(pause).await;
                }
                continue;
            }
        };

        debug!("Connection from {peer}");
        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown.clone();
        connections.spawn(async move {
            let (reader, writer) = stream.into_split();
            match serve(reader, writer, dispatcher, shutdown).await {
                Ok(()) => debug!("Connection from {peer} closed"),
                Err(e) => warn!("Connection from {peer} failed: {e}"),
            }
        });
        while connections.try_join_next().is_some() {}
    }

    info!("Stopped accepting, draining {} connection(s)", connections.len());
    while connections.join_next().await.is_some() {}
}
