pub mod builtin;
pub mod registry;
pub mod report;
pub mod toolbox;

use async_trait::async_trait;
use serde_json::Value;

/// A tool the orchestrator can invoke by name.
///
/// All builtin tools implement this trait. The dispatch layer calls
/// `execute()` with the request's `arguments` object and serializes the
/// returned value back to the caller.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique identifier used in requests.
    /// Lowercase alphanumeric + underscores (e.g. "run_python").
    fn name(&self) -> &str;

    /// Human-readable description shown to the orchestrator so it knows
    /// when to invoke this tool.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters this tool accepts.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters.
    ///
    /// An `Err` is a protocol-level fault (bad parameters, session could not
    /// be created). Sub-tool failures, timeouts and malformed output are
    /// reported inside the returned value instead.
    async fn execute(&self, params: Value) -> anyhow::Result<Value>;
}

pub use registry::ToolRegistry;
pub use toolbox::{CodeRequest, Toolbox};

/// Extracts `code` and the optional `filename` shared by the code tools.
pub(crate) fn code_request(params: &Value) -> anyhow::Result<CodeRequest> {
    let code = params["code"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: code"))?;

    let request = CodeRequest::new(code);
    match &params["filename"] {
        Value::Null => Ok(request),
        Value::String(name) => Ok(request.with_filename(crate::sandbox::SourceFilename::parse(name)?)),
        _ => Err(anyhow::anyhow!("Parameter 'filename' must be a string")),
    }
}

/// JSON Schema properties for `code` + `filename`.
pub(crate) fn code_properties() -> serde_json::Map<String, Value> {
    let schema = serde_json::json!({
        "code": {
            "type": "string",
            "description": "The Python source code"
        },
        "filename": {
            "type": "string",
            "description": "Name of the file the code is written to (single path segment, default: script.py)"
        }
    });
    match schema {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
