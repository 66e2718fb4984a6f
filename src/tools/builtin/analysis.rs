//! Builtin tools backed by external analysis programs: lint + type check,
//! auto-fix, and security scan.
//!
//! The programs themselves are opaque; their structured output is parsed
//! when possible and replaced by an empty container when not.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{code_properties, code_request, Tool, Toolbox};

fn code_schema() -> Value {
    json!({
        "type": "object",
        "properties": code_properties(),
        "required": ["code"]
    })
}

/// Lints and type-checks code.
pub struct CheckPythonTool {
    toolbox: Arc<Toolbox>,
}

impl CheckPythonTool {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for CheckPythonTool {
    fn name(&self) -> &str {
        "check_python"
    }

    fn description(&self) -> &str {
        "Run linting and type checking on Python code. Returns the linter's findings as \
         structured JSON together with the type checker's output and exit status."
    }

    fn parameters_schema(&self) -> Value {
        code_schema()
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let request = code_request(&params)?;
        let result = self.toolbox.check(&request).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Applies automatic lint fixes and returns the rewritten code.
pub struct FixPythonTool {
    toolbox: Arc<Toolbox>,
}

impl FixPythonTool {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for FixPythonTool {
    fn name(&self) -> &str {
        "fix_python"
    }

    fn description(&self) -> &str {
        "Auto-fix Python code issues with the linter's fixer. Returns the fixed code \
         along with the fixer's output and exit status."
    }

    fn parameters_schema(&self) -> Value {
        code_schema()
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let request = code_request(&params)?;
        let result = self.toolbox.fix(&request).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Runs a static security scanner over code.
pub struct SecurityScanTool {
    toolbox: Arc<Toolbox>,
}

impl SecurityScanTool {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for SecurityScanTool {
    fn name(&self) -> &str {
        "security_scan"
    }

    fn description(&self) -> &str {
        "Run a static security scan on Python code. Returns the scanner's report as \
         structured JSON (empty object if the report could not be parsed)."
    }

    fn parameters_schema(&self) -> Value {
        code_schema()
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let request = code_request(&params)?;
        let result = self.toolbox.security_scan(&request).await?;
        Ok(serde_json::to_value(result)?)
    }
}
