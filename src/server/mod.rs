//! Newline-delimited JSON request loop over any byte stream.
//!
//! Every request line is handled in its own task, so a slow `run_python`
//! never blocks a concurrent `list_tools`. Responses are funneled through a
//! single writer task and correlated by `id`.

pub mod stdio;
pub mod tcp;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::shutdown::ShutdownSignal;
use crate::tools::ToolRegistry;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    #[serde(flatten)]
    call: Call,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
enum Call {
    ListTools,
    CallTool {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Outcome {
    Result(Value),
    Error { message: String },
}

/// One response frame.
#[derive(Debug, Serialize)]
pub struct Response {
    id: Value,
    #[serde(flatten)]
    outcome: Outcome,
}

impl Response {
    fn result(id: Value, value: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(value),
        }
    }

    fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Error {
                message: message.into(),
            },
        }
    }

    /// Serializes the frame without its trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Only reachable if a tool produced a non-string map key.
            format!(r#"{{"id":null,"error":{{"message":"Failed to encode response: {e}"}}}}"#)
        })
    }
}

/// Routes decoded requests to the tool registry.
pub struct Dispatcher {
    registry: ToolRegistry,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub async fn handle_line(&self, line: &str) -> Response {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request: {e}");
                return Response::error(Value::Null, format!("Invalid request: {e}"));
            }
        };

        match request.call {
            Call::ListTools => Response::result(
                request.id,
                json!({ "tools": self.registry.definitions() }),
            ),
            Call::CallTool { name, arguments } => {
                debug!("call_tool {name} (id {})", request.id);
                match self.registry.execute(&name, arguments).await {
                    Ok(value) => Response::result(request.id, value),
                    Err(e) => {
                        warn!("Tool {name} failed: {e:#}");
                        Response::error(request.id, format!("{e:#}"))
                    }
                }
            }
        }
    }
}

/// Best-effort request id for a line whose handler never produced a response.
fn request_id(line: &str) -> Value {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|value| value.get("id").cloned())
        .unwrap_or(Value::Null)
}

/// Handles one line in its own task so a panicking tool still yields a frame.
async fn respond(dispatcher: Arc<Dispatcher>, line: String) -> Response {
    let id = request_id(&line);
    let handled = tokio::spawn(async move { dispatcher.handle_line(&line).await }).await;
    match handled {
        Ok(response) => response,
        Err(e) => {
            error!("Request handler for id {id} aborted: {e}");
            Response::error(id, "Internal error while handling request")
        }
    }
}

/// Serves requests read from `reader` until EOF or until `shutdown` fires,
/// writing responses to `writer`.
///
/// Either way, requests already in flight are allowed to finish and their
/// responses are written before this returns.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: ShutdownSignal,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(100);

    let write_handle = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                error!("Write error: {e}");
                break;
            }
            if let Err(e) = writer.flush().await {
                error!("Flush error: {e}");
                break;
            }
        }
    });

    let mut in_flight = JoinSet::new();
    let mut lines = BufReader::new(reader).lines();
    let read_result = loop {
        let next = tokio::select! {
            next = lines.next_line() => next,
            _ = shutdown.fired() => {
                debug!("Shutdown requested, no longer reading requests");
                break Ok(());
            }
        };
        match next {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let dispatcher = Arc::clone(&dispatcher);
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let response = respond(dispatcher, line).await;
                    let _ = tx.send(response.to_line()).await;
                });
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
        // Reap finished handlers so the set does not grow with the session.
        while in_flight.try_join_next().is_some() {}
    };

    while in_flight.join_next().await.is_some() {}
    drop(tx);
    let _ = write_handle.await;

    read_result.map_err(|e| anyhow::anyhow!("Read error: {e}"))
}
