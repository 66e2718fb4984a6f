use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::sandbox::policy::DEFAULT_BLOCKED_MODULES;
use crate::sandbox::{DenylistGuard, Passthrough, SourcePolicy};

/// Service configuration. Every field has a default, so an empty file
/// (or no file at all) yields a working setup.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub server: ServerConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory the session root is created in (default: system temp dir).
    pub root_parent: Option<PathBuf>,
    pub root_prefix: String,
    /// Interpreter used by `run_python`.
    pub interpreter: String,
    /// Prepend the import denylist guard to executed code.
    pub restricted: bool,
    pub blocked_modules: Vec<String>,
    /// Default `run_python` deadline; 0 disables it.
    pub run_timeout_secs: u64,
    /// Deadline for analysis sub-tools; 0 disables it.
    pub tool_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root_parent: None,
            root_prefix: "python_toolbox_root_".to_string(),
            interpreter: "python3".to_string(),
            restricted: true,
            blocked_modules: DEFAULT_BLOCKED_MODULES.iter().map(|m| m.to_string()).collect(),
            run_timeout_secs: 30,
            tool_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Transport used when neither `--transport` nor the env var is set.
    pub transport: String,
    /// Bind address for the `tcp` transport.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            listen: "127.0.0.1:8765".to_string(),
        }
    }
}

/// An external sub-tool. The target file path is appended after `args`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SubtoolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl SubtoolCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_lint")]
    pub lint: SubtoolCommand,
    #[serde(default = "default_type_check")]
    pub type_check: SubtoolCommand,
    #[serde(default = "default_fix")]
    pub fix: SubtoolCommand,
    #[serde(default = "default_security")]
    pub security: SubtoolCommand,
    #[serde(default = "default_packages")]
    pub packages: SubtoolCommand,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            lint: default_lint(),
            type_check: default_type_check(),
            fix: default_fix(),
            security: default_security(),
            packages: default_packages(),
        }
    }
}

fn default_lint() -> SubtoolCommand {
    SubtoolCommand::new("ruff", &["check", "--output-format", "json"])
}

fn default_type_check() -> SubtoolCommand {
    SubtoolCommand::new("ty", &["check"])
}

fn default_fix() -> SubtoolCommand {
    SubtoolCommand::new("ruff", &["check", "--fix", "--extend-select", "COM812"])
}

fn default_security() -> SubtoolCommand {
    SubtoolCommand::new("bandit", &["-f", "json", "-r"])
}

fn default_packages() -> SubtoolCommand {
    SubtoolCommand::new("pip", &["list", "--format", "json"])
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

impl SandboxConfig {
    pub fn root_parent(&self) -> PathBuf {
        self.root_parent.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        secs(self.run_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        secs(self.tool_timeout_secs)
    }

    /// Builds the source policy selected by `restricted`.
    pub fn source_policy(&self) -> Box<dyn SourcePolicy> {
        if self.restricted {
            Box::new(DenylistGuard::new(self.blocked_modules.iter().cloned()))
        } else {
            Box::new(Passthrough)
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses TOML after expanding `${ENV_VAR}` references.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.sandbox.interpreter.trim().is_empty() {
            anyhow::bail!("sandbox.interpreter must not be empty");
        }
        let tools = [
            ("lint", &self.tools.lint),
            ("type_check", &self.tools.type_check),
            ("fix", &self.tools.fix),
            ("security", &self.tools.security),
            ("packages", &self.tools.packages),
        ];
        for (name, command) in tools {
            if command.program.trim().is_empty() {
                anyhow::bail!("tools.{name}.program must not be empty");
            }
        }
        Ok(())
    }
}
