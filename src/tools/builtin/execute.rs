//! Builtin tool: execute Python code in a fresh session directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tools::{code_properties, code_request, Tool, Toolbox};

/// Runs submitted code with the configured interpreter and execution policy.
///
/// The result always carries stdout, stderr, the exit status and the session
/// path. A deadline overrun is reported with `timed_out: true` and the
/// sentinel exit status rather than as an error.
pub struct RunPythonTool {
    toolbox: Arc<Toolbox>,
}

impl RunPythonTool {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }
}

/// Reads the optional `timeout_secs` override.
fn timeout_param(params: &Value) -> anyhow::Result<Option<Duration>> {
    match &params["timeout_secs"] {
        Value::Null => Ok(None),
        value => {
            let invalid = || anyhow::anyhow!("Parameter 'timeout_secs' must be a positive number");
            let secs = value.as_f64().filter(|s| *s > 0.0).ok_or_else(invalid)?;
            // Values beyond Duration's range are rejected rather than clamped.
            let timeout = Duration::try_from_secs_f64(secs).map_err(|_| invalid())?;
            Ok(Some(timeout))
        }
    }
}

#[async_trait]
impl Tool for RunPythonTool {
    fn name(&self) -> &str {
        "run_python"
    }

    fn description(&self) -> &str {
        "Execute Python code in an isolated session directory. Returns stdout, stderr, \
         the exit status and the session path. Execution is bounded by a timeout; a \
         program that exceeds it is killed and reported with timed_out = true."
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = code_properties();
        properties.insert(
            "timeout_secs".to_string(),
            json!({
                "type": "number",
                "description": "Optional execution timeout in seconds (overrides the server default)"
            }),
        );
        json!({
            "type": "object",
            "properties": properties,
            "required": ["code"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let request = code_request(&params)?;
        let timeout = timeout_param(&params)?;

        debug!(
            "run_python: {} bytes as {} (policy: {})",
            request.code.len(),
            request.filename,
            self.toolbox.policy_name()
        );

        let result = self.toolbox.run(&request, timeout).await?;
        Ok(serde_json::to_value(result)?)
    }
}
