use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{Tool, Toolbox};

/// Lists the packages installed in the host's Python environment.
///
/// Takes no parameters and never fails: an unparseable listing comes back as
/// an empty map with a diagnostic in `stderr`.
pub struct ListInstalledPackagesTool {
    toolbox: Arc<Toolbox>,
}

impl ListInstalledPackagesTool {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for ListInstalledPackagesTool {
    fn name(&self) -> &str {
        "list_installed_packages"
    }

    fn description(&self) -> &str {
        "List all Python packages installed in the execution environment, as a \
         name → version map sorted by name."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _params: Value) -> anyhow::Result<Value> {
        let listing = self.toolbox.list_installed_packages().await;
        Ok(serde_json::to_value(listing)?)
    }
}
