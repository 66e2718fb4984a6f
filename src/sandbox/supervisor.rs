//! Process supervision: launch, drain, deadline, kill, reap.
//!
//! Every spawned program is wrapped in a [`SupervisedChild`] whose state only
//! moves forward:
//!
//! ```text
//! Running ──wait()──────────────────────────────▶ Exited(status)
//!    │
//!    └──start_kill()──▶ KilledPendingReap ──wait()──▶ Reaped(status)
//! ```
//!
//! A timed-out result is only produced once the child is `Reaped`, so callers
//! never observe a timeout while the process is still alive.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{Result, SandboxError};
use crate::shutdown::ShutdownSignal;

/// How long drain tasks may keep reading after the child is gone.
///
/// A grandchild that inherited a pipe can hold it open past the child's exit;
/// after this grace the drain is aborted and the captured bytes are kept.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Read buffer size for each output pipe.
const READ_CHUNK: usize = 8 * 1024;

/// What to launch and how long it may run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with this code.
    Exited(i32),
    /// Terminated by this signal (not by the supervisor).
    Signaled(i32),
    /// Killed and reaped after exceeding this limit.
    TimedOut(Duration),
    /// Killed and reaped because the service is shutting down, or never
    /// launched because shutdown had already begun.
    Cancelled,
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signaled(signal);
            }
        }
        ExitOutcome::Signaled(0)
    }
}

/// Captured result of a supervised run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub outcome: ExitOutcome,
    /// OS process id, while it was known.
    pub pid: Option<u32>,
}

impl ProcessOutput {
    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, ExitOutcome::TimedOut(_))
    }
}

/// Lifecycle of a spawned child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(ExitStatus),
    KilledPendingReap,
    Reaped(ExitStatus),
}

/// An owned child process whose transitions go through the supervisor only.
struct SupervisedChild {
    child: Child,
    program: String,
    state: ProcessState,
}

impl SupervisedChild {
    fn new(child: Child, program: String) -> Self {
        Self {
            child,
            program,
            state: ProcessState::Running,
        }
    }

    /// Waits for a natural exit. Cancel-safe: dropping the future leaves the
    /// child `Running`.
    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await.map_err(|source| SandboxError::Supervision {
            program: self.program.clone(),
            source,
        })?;
        self.state = ProcessState::Exited(status);
        Ok(status)
    }

    /// Sends SIGKILL and blocks until the OS confirms the exit.
    async fn kill_and_reap(&mut self) -> Result<ExitStatus> {
        if let Err(e) = self.child.start_kill() {
            // Already exited between the deadline and the kill; wait() still reaps.
            debug!("start_kill on '{}' failed: {e}", self.program);
        }
        self.state = ProcessState::KilledPendingReap;

        let status = self.child.wait().await.map_err(|source| SandboxError::Supervision {
            program: self.program.clone(),
            source,
        })?;
        self.state = ProcessState::Reaped(status);
        Ok(status)
    }
}

impl Drop for SupervisedChild {
    fn drop(&mut self) {
        if matches!(self.state, ProcessState::Running | ProcessState::KilledPendingReap) {
            warn!(
                "Supervised process '{}' dropped in state {:?}, killing",
                self.program, self.state
            );
            let _ = self.child.start_kill();
        }
    }
}

/// Bytes read from one pipe, shared with the task that reads them.
struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl StreamCapture {
    fn spawn<R>(reader: Option<R>, label: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let Some(mut reader) = reader else { return };
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => lock(&sink).extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        warn!("Error reading {label}: {e}");
                        break;
                    }
                }
            }
        });
        Self { buffer, task }
    }

    /// Waits for EOF within `grace`, then returns whatever was captured.
    async fn finish(mut self, grace: Duration) -> Vec<u8> {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            debug!("Output pipe still open after {grace:?}, aborting drain");
            self.task.abort();
        }
        std::mem::take(&mut *lock(&self.buffer))
    }
}

fn lock(buffer: &Mutex<Vec<u8>>) -> std::sync::MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Launches external programs and supervises them to completion.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    shutdown: ShutdownSignal,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A supervisor whose running children are killed and reaped once
    /// `shutdown` fires.
    pub fn with_shutdown(shutdown: ShutdownSignal) -> Self {
        Self { shutdown }
    }

    /// Runs `spec` to completion, until its deadline, or until shutdown.
    ///
    /// stdout and stderr are drained concurrently, so neither pipe can fill
    /// up and stall the child. On deadline or shutdown the child is killed
    /// and reaped before returning; output captured up to that point is kept.
    pub async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        if self.shutdown.is_fired() {
            debug!("Shutting down, not launching '{}'", spec.program);
            return Ok(ProcessOutput {
                stdout: Vec::new(),
                stderr: Vec::new(),
                outcome: ExitOutcome::Cancelled,
                pid: None,
            });
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| SandboxError::Launch {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!("Spawned '{}' (pid {:?}) with args {:?}", spec.program, pid, spec.args);

        let stdout = StreamCapture::spawn(child.stdout.take(), "stdout");
        let stderr = StreamCapture::spawn(child.stderr.take(), "stderr");
        let mut child = SupervisedChild::new(child, spec.program.clone());
        let started = Instant::now();

        let limit = spec.timeout;
        let deadline = async move {
            match limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };
        let mut shutdown = self.shutdown.clone();

        let outcome = tokio::select! {
            status = child.wait() => ExitOutcome::from_status(status?),
            limit = deadline => {
                let status = child.kill_and_reap().await?;
                info!(
                    "'{}' (pid {:?}) exceeded {limit:?}, killed and reaped ({status})",
                    spec.program, pid
                );
                ExitOutcome::TimedOut(limit)
            }
            _ = shutdown.fired() => {
                let status = child.kill_and_reap().await?;
                info!(
                    "'{}' (pid {:?}) stopped for shutdown, killed and reaped ({status})",
                    spec.program, pid
                );
                ExitOutcome::Cancelled
            }
        };

        let stdout = stdout.finish(DRAIN_GRACE).await;
        let stderr = stderr.finish(DRAIN_GRACE).await;

        debug!(
            "'{}' finished in {:?}: {:?} ({} bytes stdout, {} bytes stderr)",
            spec.program,
            started.elapsed(),
            outcome,
            stdout.len(),
            stderr.len()
        );

        Ok(ProcessOutput {
            stdout,
            stderr,
            outcome,
            pid,
        })
    }
}
