pub mod analysis;
pub mod execute;
pub mod packages;

use std::sync::Arc;

pub use analysis::{CheckPythonTool, FixPythonTool, SecurityScanTool};
pub use execute::RunPythonTool;
pub use packages::ListInstalledPackagesTool;

use super::{ToolRegistry, Toolbox};

/// Registers every builtin tool against one shared toolbox.
pub fn register_all(registry: &mut ToolRegistry, toolbox: Arc<Toolbox>) {
    registry.register(Box::new(RunPythonTool::new(Arc::clone(&toolbox))));
    registry.register(Box::new(CheckPythonTool::new(Arc::clone(&toolbox))));
    registry.register(Box::new(FixPythonTool::new(Arc::clone(&toolbox))));
    registry.register(Box::new(SecurityScanTool::new(Arc::clone(&toolbox))));
    registry.register(Box::new(ListInstalledPackagesTool::new(toolbox)));
}
