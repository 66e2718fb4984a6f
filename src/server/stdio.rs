use std::sync::Arc;

use tracing::info;

use super::{serve, Dispatcher};
use crate::shutdown::ShutdownSignal;

/// Serves requests on stdin/stdout until stdin closes or `shutdown` fires.
///
/// Logging must stay on stderr while this runs; stdout carries only frames.
pub async fn run(dispatcher: Arc<Dispatcher>, shutdown: ShutdownSignal) -> anyhow::Result<()> {
    info!("Serving on stdio");
    serve(tokio::io::stdin(), tokio::io::stdout(), dispatcher, shutdown).await?;
    info!("Request loop finished");
    Ok(())
}
