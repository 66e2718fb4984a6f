//! The tool operations behind the dispatch surface.
//!
//! Each operation owns one session for its whole duration and runs strictly
//! in order: write file → launch → drain/await → format. Operations share
//! nothing but the session root.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{Config, SubtoolCommand};
use crate::sandbox::error::Result;
use crate::sandbox::{
    CommandSpec, ProcessSupervisor, Session, SessionRoot, SourceFilename, SourcePolicy,
};
use crate::shutdown::ShutdownSignal;

use super::report::{
    AnalysisReport, CheckResult, EmptyFindings, ExecutionResult, FixResult, PackageListing,
    ProcessReport, ScanResult,
};

/// Code submitted by the caller.
#[derive(Debug, Clone)]
pub struct CodeRequest {
    pub code: String,
    pub filename: SourceFilename,
}

impl CodeRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            filename: SourceFilename::default(),
        }
    }

    pub fn with_filename(mut self, filename: SourceFilename) -> Self {
        self.filename = filename;
        self
    }
}

/// Runs, checks, fixes and scans submitted code.
pub struct Toolbox {
    root: Arc<SessionRoot>,
    supervisor: ProcessSupervisor,
    policy: Box<dyn SourcePolicy>,
    config: Config,
}

impl Toolbox {
    /// Children still running when `shutdown` fires are killed and reaped,
    /// and their calls complete with a cancelled record.
    pub fn new(config: Config, root: Arc<SessionRoot>, shutdown: ShutdownSignal) -> Self {
        let policy = config.sandbox.source_policy();
        info!("Execution policy: {}", policy.name());
        Self {
            root,
            supervisor: ProcessSupervisor::with_shutdown(shutdown),
            policy,
            config,
        }
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Executes the code with the configured interpreter.
    ///
    /// `timeout` overrides the configured default deadline.
    pub async fn run(
        &self,
        request: &CodeRequest,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let session = self.root.create_session().await?;
        let program = self.policy.prepare(&request.code);
        let file = session.write_source(&request.filename, &program).await?;

        debug!("Running python file: {}", file.display());
        let spec = CommandSpec::new(&self.config.sandbox.interpreter)
            .arg(path_arg(&file))
            .working_dir(session.path())
            .timeout(timeout.or_else(|| self.config.sandbox.run_timeout()));

        let process = ProcessReport::from_result(self.supervisor.run(&spec).await)?;
        Ok(ExecutionResult {
            process,
            session_path: session.path().to_path_buf(),
        })
    }

    /// Lints and type-checks the code. A failure of one sub-tool never hides
    /// the other's output.
    pub async fn check(&self, request: &CodeRequest) -> Result<CheckResult> {
        let (session, file) = self.prepare_session(request).await?;

        let lint = self.run_subtool(&self.config.tools.lint, &session, &file).await?;
        let type_check = self
            .run_subtool(&self.config.tools.type_check, &session, &file)
            .await?;

        Ok(CheckResult {
            lint: AnalysisReport::from_process(lint, EmptyFindings::List),
            type_check,
            session_path: session.path().to_path_buf(),
        })
    }

    /// Applies automatic lint fixes and returns the rewritten file.
    pub async fn fix(&self, request: &CodeRequest) -> Result<FixResult> {
        let (session, file) = self.prepare_session(request).await?;

        // run_subtool returns only after the fixer has been reaped, so the
        // re-read below cannot observe pre-fix content.
        let process = self.run_subtool(&self.config.tools.fix, &session, &file).await?;
        let fixed_code = session.read_source(&request.filename).await?;

        Ok(FixResult {
            fixed_code,
            execution: ExecutionResult {
                process,
                session_path: session.path().to_path_buf(),
            },
        })
    }

    /// Runs the static security scanner.
    pub async fn security_scan(&self, request: &CodeRequest) -> Result<ScanResult> {
        let (session, file) = self.prepare_session(request).await?;
        let process = self
            .run_subtool(&self.config.tools.security, &session, &file)
            .await?;

        Ok(ScanResult {
            analysis: AnalysisReport::from_process(process, EmptyFindings::Object),
            session_path: session.path().to_path_buf(),
        })
    }

    /// Lists the host's installed packages. Never fails: launch errors and
    /// malformed output are reported inside the listing.
    pub async fn list_installed_packages(&self) -> PackageListing {
        let command = &self.config.tools.packages;
        let spec = CommandSpec::new(&command.program)
            .args(command.args.iter().cloned())
            .working_dir(self.root.path())
            .timeout(self.config.sandbox.tool_timeout());

        let process = match self.supervisor.run(&spec).await {
            Ok(output) => ProcessReport::from_output(&output),
            Err(e) => ProcessReport::launch_failure(&e),
        };
        PackageListing::from_process(process, self.root.path().to_path_buf())
    }

    async fn prepare_session(&self, request: &CodeRequest) -> Result<(Session, String)> {
        let session = self.root.create_session().await?;
        let file = session.write_source(&request.filename, &request.code).await?;
        let file = path_arg(&file);
        Ok((session, file))
    }

    async fn run_subtool(
        &self,
        command: &SubtoolCommand,
        session: &Session,
        file: &str,
    ) -> Result<ProcessReport> {
        let spec = CommandSpec::new(&command.program)
            .args(command.args.iter().cloned())
            .arg(file)
            .working_dir(session.path())
            .timeout(self.config.sandbox.tool_timeout());

        debug!("Running {} on {file}", command.program);
        let report = ProcessReport::from_result(self.supervisor.run(&spec).await)?;
        if !report.success() {
            debug!("{} exited with status {}", command.program, report.exit_status);
        }
        Ok(report)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
