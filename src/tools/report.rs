//! Result records returned by the tools, and the conversions that build them
//! from raw supervisor output.
//!
//! Nothing in here fails: malformed sub-tool output degrades to an empty
//! container, undecodable bytes to U+FFFD, and launch failures to a record
//! carrying the error text.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::sandbox::{ExitOutcome, ProcessOutput, SandboxError};

/// Reported when the supervisor killed the process at its deadline.
pub const TIMEOUT_EXIT_STATUS: i32 = -1;

/// Reported when the program could not be launched or supervised.
pub const LAUNCH_FAILURE_EXIT_STATUS: i32 = -2;

/// Reported when the service stopped the process while shutting down.
pub const CANCELLED_EXIT_STATUS: i32 = -3;

/// Appended to the lister's stderr when its output cannot be parsed.
pub const PACKAGE_PARSE_DIAGNOSTIC: &str = "Failed to parse pip output";

/// Shape substituted for unparseable structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyFindings {
    List,
    Object,
}

impl EmptyFindings {
    fn value(self) -> Value {
        match self {
            EmptyFindings::List => Value::Array(Vec::new()),
            EmptyFindings::Object => Value::Object(serde_json::Map::new()),
        }
    }
}

/// Wire encoding of an exit outcome.
///
/// Real exits pass through, signals map to `128 + n` (shell convention),
/// and supervisor kills use sentinels outside the 0–255 range. The signal
/// number itself is reported separately, see [`ProcessReport::signal`].
pub fn exit_status(outcome: &ExitOutcome) -> i32 {
    match outcome {
        ExitOutcome::Exited(code) => *code,
        ExitOutcome::Signaled(signal) => 128 + signal,
        ExitOutcome::TimedOut(_) => TIMEOUT_EXIT_STATUS,
        ExitOutcome::Cancelled => CANCELLED_EXIT_STATUS,
    }
}

fn terminating_signal(outcome: &ExitOutcome) -> Option<i32> {
    match outcome {
        ExitOutcome::Signaled(signal) => Some(*signal),
        _ => None,
    }
}

/// Captured streams and status of one sub-process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
    /// Signal that terminated the process on its own; `null` otherwise.
    /// Tells a signal death apart from an `exit(128 + n)`.
    #[serde(default)]
    pub signal: Option<i32>,
    pub timed_out: bool,
}

impl ProcessReport {
    /// Decodes captured bytes and records a timeout in stderr.
    pub fn from_output(output: &ProcessOutput) -> Self {
        let mut stderr = decode(&output.stderr);
        let notice = match output.outcome {
            ExitOutcome::TimedOut(limit) => Some(format!("Execution timeout ({limit:?} exceeded)")),
            ExitOutcome::Cancelled => Some("Execution cancelled (service shutting down)".to_string()),
            _ => None,
        };
        if let Some(notice) = notice {
            append_line(&mut stderr, &notice);
        }

        Self {
            stdout: decode(&output.stdout),
            stderr,
            exit_status: exit_status(&output.outcome),
            signal: terminating_signal(&output.outcome),
            timed_out: output.timed_out(),
        }
    }

    /// Record for a process that never ran to completion.
    pub fn launch_failure(error: &SandboxError) -> Self {
        Self {
            stdout: String::new(),
            stderr: error.to_string(),
            exit_status: LAUNCH_FAILURE_EXIT_STATUS,
            signal: None,
            timed_out: false,
        }
    }

    /// Converts a supervisor result into a report.
    ///
    /// Launch and supervision errors become records; filesystem-class errors
    /// propagate because no meaningful result exists without the session.
    pub fn from_result(result: Result<ProcessOutput, SandboxError>) -> Result<Self, SandboxError> {
        match result {
            Ok(output) => Ok(Self::from_output(&output)),
            Err(e) if !e.is_fatal() => {
                warn!("{e}");
                Ok(Self::launch_failure(&e))
            }
            Err(e) => Err(e),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0 && !self.timed_out
    }
}

/// Output of `run_python` and the fixer step of `fix_python`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(flatten)]
    pub process: ProcessReport,
    pub session_path: PathBuf,
}

/// Structured findings from a linter or scanner, plus its diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub findings: Value,
    pub stderr: String,
    pub exit_status: i32,
    #[serde(default)]
    pub signal: Option<i32>,
    pub timed_out: bool,
}

impl AnalysisReport {
    /// Parses the sub-tool's stdout as a single JSON document.
    pub fn from_process(process: ProcessReport, empty: EmptyFindings) -> Self {
        Self {
            findings: parse_findings(&process.stdout, empty),
            stderr: process.stderr,
            exit_status: process.exit_status,
            signal: process.signal,
            timed_out: process.timed_out,
        }
    }
}

/// Output of `check_python`: linter findings and type-checker output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub lint: AnalysisReport,
    pub type_check: ProcessReport,
    pub session_path: PathBuf,
}

/// Output of `security_scan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    #[serde(flatten)]
    pub analysis: AnalysisReport,
    pub session_path: PathBuf,
}

/// Output of `fix_python`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixResult {
    pub fixed_code: String,
    #[serde(flatten)]
    pub execution: ExecutionResult,
}

/// Output of `list_installed_packages`, sorted by package name, followed by
/// the lister's own execution record. The lister runs in the session root,
/// which is what `session_path` names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageListing {
    pub packages: BTreeMap<String, String>,
    pub count: usize,
    #[serde(flatten)]
    pub execution: ExecutionResult,
}

#[derive(Deserialize)]
struct PackageRecord {
    name: String,
    version: String,
}

impl PackageListing {
    /// Builds the name → version map from the lister's JSON array.
    ///
    /// Any malformed input (not JSON, not an array, a record without
    /// `name`/`version`) yields an empty map and a diagnostic line in stderr.
    pub fn from_process(mut process: ProcessReport, session_path: PathBuf) -> Self {
        let packages = if process.stdout.trim().is_empty() {
            BTreeMap::new()
        } else {
            match serde_json::from_str::<Vec<PackageRecord>>(&process.stdout) {
                Ok(records) => records.into_iter().map(|r| (r.name, r.version)).collect(),
                Err(e) => {
                    warn!("Package lister output is not a package list: {e}");
                    append_line(&mut process.stderr, PACKAGE_PARSE_DIAGNOSTIC);
                    BTreeMap::new()
                }
            }
        };

        Self {
            count: packages.len(),
            packages,
            execution: ExecutionResult {
                process,
                session_path,
            },
        }
    }
}

/// Appends `line` to `text`, starting a new line if `text` is non-empty.
fn append_line(text: &mut String, line: &str) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(line);
}

/// Lossy UTF-8 decoding: invalid sequences become U+FFFD.
pub fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parses one JSON document, substituting `empty` on any failure.
pub fn parse_findings(stdout: &str, empty: EmptyFindings) -> Value {
    if stdout.trim().is_empty() {
        return empty.value();
    }
    match serde_json::from_str(stdout) {
        Ok(value) => value,
        Err(e) => {
            warn!("Sub-tool emitted malformed JSON ({e}), substituting empty findings");
            empty.value()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn output(stdout: &[u8], stderr: &[u8], outcome: ExitOutcome) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
            outcome,
            pid: None,
        }
    }

    fn process(stdout: &str, stderr: &str, exit_status: i32) -> ProcessReport {
        ProcessReport {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_status,
            signal: None,
            timed_out: false,
        }
    }

    fn listing(process: ProcessReport) -> PackageListing {
        PackageListing::from_process(process, PathBuf::from("/tmp/root"))
    }

    // ── exit status encoding ────────────────────────────

    #[test]
    fn test_exit_status_encoding() {
        assert_eq!(exit_status(&ExitOutcome::Exited(0)), 0);
        assert_eq!(exit_status(&ExitOutcome::Exited(2)), 2);
        assert_eq!(exit_status(&ExitOutcome::Signaled(9)), 137);
        assert_eq!(
            exit_status(&ExitOutcome::TimedOut(Duration::from_secs(30))),
            TIMEOUT_EXIT_STATUS
        );
        assert!(!(0..=255).contains(&TIMEOUT_EXIT_STATUS));
        assert!(!(0..=255).contains(&LAUNCH_FAILURE_EXIT_STATUS));
        assert_eq!(exit_status(&ExitOutcome::Cancelled), CANCELLED_EXIT_STATUS);
        assert!(!(0..=255).contains(&CANCELLED_EXIT_STATUS));
        assert_ne!(TIMEOUT_EXIT_STATUS, LAUNCH_FAILURE_EXIT_STATUS);
        assert_ne!(CANCELLED_EXIT_STATUS, LAUNCH_FAILURE_EXIT_STATUS);
    }

    #[test]
    fn test_signal_is_reported_apart_from_exit_code() {
        let killed = ProcessReport::from_output(&output(b"", b"", ExitOutcome::Signaled(9)));
        assert_eq!(killed.exit_status, 137);
        assert_eq!(killed.signal, Some(9));

        let exited = ProcessReport::from_output(&output(b"", b"", ExitOutcome::Exited(137)));
        assert_eq!(exited.exit_status, 137);
        assert_eq!(exited.signal, None);

        let value = serde_json::to_value(&exited).unwrap();
        assert_eq!(value["signal"], Value::Null);
        let value = serde_json::to_value(&killed).unwrap();
        assert_eq!(value["signal"], 9);
    }

    #[test]
    fn test_timeout_is_not_a_signal() {
        let report = ProcessReport::from_output(&output(
            b"",
            b"",
            ExitOutcome::TimedOut(Duration::from_secs(1)),
        ));
        assert_eq!(report.signal, None);
    }

    #[test]
    fn test_report_cancelled_adds_message() {
        let report = ProcessReport::from_output(&output(b"partial", b"", ExitOutcome::Cancelled));
        assert_eq!(report.stdout, "partial");
        assert_eq!(report.stderr, "Execution cancelled (service shutting down)");
        assert_eq!(report.exit_status, CANCELLED_EXIT_STATUS);
        assert!(!report.timed_out);
    }

    // ── ProcessReport ───────────────────────────────────

    #[test]
    fn test_report_passes_output_through() {
        let report = ProcessReport::from_output(&output(b"hello\n", b"", ExitOutcome::Exited(0)));
        assert_eq!(report.stdout, "hello\n");
        assert_eq!(report.stderr, "");
        assert_eq!(report.exit_status, 0);
        assert!(!report.timed_out);
        assert!(report.success());
    }

    #[test]
    fn test_report_decodes_invalid_utf8_lossily() {
        let report =
            ProcessReport::from_output(&output(b"ok \xff\xfe end", b"", ExitOutcome::Exited(0)));
        assert_eq!(report.stdout, "ok \u{FFFD}\u{FFFD} end");
    }

    #[test]
    fn test_report_timeout_keeps_partial_output_and_adds_message() {
        let limit = Duration::from_secs(30);
        let report = ProcessReport::from_output(&output(
            b"partial",
            b"warming up",
            ExitOutcome::TimedOut(limit),
        ));
        assert_eq!(report.stdout, "partial");
        assert_eq!(report.stderr, "warming up\nExecution timeout (30s exceeded)");
        assert_eq!(report.exit_status, TIMEOUT_EXIT_STATUS);
        assert!(report.timed_out);
        assert!(!report.success());
    }

    #[test]
    fn test_report_timeout_message_alone() {
        let report = ProcessReport::from_output(&output(
            b"",
            b"",
            ExitOutcome::TimedOut(Duration::from_millis(500)),
        ));
        assert_eq!(report.stderr, "Execution timeout (500ms exceeded)");
    }

    #[test]
    fn test_launch_failure_becomes_record() {
        let err = SandboxError::Launch {
            program: "ruff".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let report = ProcessReport::from_result(Err(err)).unwrap();
        assert_eq!(report.exit_status, LAUNCH_FAILURE_EXIT_STATUS);
        assert!(report.stderr.contains("Failed to launch 'ruff'"));
        assert!(!report.timed_out);
    }

    #[test]
    fn test_filesystem_error_propagates() {
        let err = SandboxError::Filesystem {
            path: PathBuf::from("/tmp/x"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(ProcessReport::from_result(Err(err)).is_err());
    }

    // ── findings ────────────────────────────────────────

    #[test]
    fn test_findings_parse_valid_json() {
        let findings = parse_findings(r#"[{"code": "F401"}]"#, EmptyFindings::List);
        assert_eq!(findings, json!([{"code": "F401"}]));
    }

    #[test]
    fn test_findings_degrade_to_empty_shape() {
        assert_eq!(parse_findings("", EmptyFindings::List), json!([]));
        assert_eq!(parse_findings("  \n", EmptyFindings::Object), json!({}));
        assert_eq!(parse_findings("[{\"code\": ", EmptyFindings::List), json!([]));
        assert_eq!(parse_findings("not json", EmptyFindings::Object), json!({}));
    }

    #[test]
    fn test_analysis_report_keeps_diagnostics() {
        let report = AnalysisReport::from_process(
            process("garbage", "ruff: config error", 2),
            EmptyFindings::List,
        );
        assert_eq!(report.findings, json!([]));
        assert_eq!(report.stderr, "ruff: config error");
        assert_eq!(report.exit_status, 2);
    }

    // ── PackageListing ──────────────────────────────────

    #[test]
    fn test_packages_sorted_map() {
        let listing = listing(process(
            r#"[{"name": "requests", "version": "2.32.3"}, {"name": "attrs", "version": "24.2.0"}]"#,
            "",
            0,
        ));
        assert_eq!(listing.count, 2);
        let names: Vec<_> = listing.packages.keys().cloned().collect();
        assert_eq!(names, vec!["attrs", "requests"]);
        assert_eq!(listing.packages["requests"], "2.32.3");
        assert_eq!(listing.execution.process.stderr, "");
    }

    #[test]
    fn test_packages_non_json_adds_diagnostic() {
        let listing = listing(process("not json", "stderr error", 1));
        assert!(listing.packages.is_empty());
        assert_eq!(listing.count, 0);
        assert_eq!(
            listing.execution.process.stderr,
            "stderr error\nFailed to parse pip output"
        );
        assert_eq!(listing.execution.process.exit_status, 1);
        assert_eq!(listing.execution.process.stdout, "not json");
    }

    #[test]
    fn test_packages_record_without_version_is_malformed() {
        let listing = listing(process(r#"[{"name": "attrs"}]"#, "", 0));
        assert!(listing.packages.is_empty());
        assert!(listing.execution.process.stderr.contains(PACKAGE_PARSE_DIAGNOSTIC));
    }

    #[test]
    fn test_packages_empty_output_without_diagnostic() {
        let listing = listing(process("", "", 0));
        assert!(listing.packages.is_empty());
        assert_eq!(listing.execution.process.stderr, "");
    }

    #[test]
    fn test_package_listing_carries_execution_record() {
        let listing = listing(process(r#"[{"name": "attrs", "version": "24.2.0"}]"#, "", 0));
        let value = serde_json::to_value(&listing).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["packages"]["attrs"], "24.2.0");
        assert_eq!(value["stdout"], r#"[{"name": "attrs", "version": "24.2.0"}]"#);
        assert_eq!(value["exit_status"], 0);
        assert_eq!(value["signal"], Value::Null);
        assert_eq!(value["timed_out"], false);
        assert_eq!(value["session_path"], "/tmp/root");
    }

    // ── serialization ───────────────────────────────────

    #[test]
    fn test_fix_result_flattens_execution() {
        let result = FixResult {
            fixed_code: "x = 1\n".to_string(),
            execution: ExecutionResult {
                process: process("", "", 0),
                session_path: PathBuf::from("/tmp/root/session_1"),
            },
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["fixed_code"], "x = 1\n");
        assert_eq!(value["exit_status"], 0);
        assert_eq!(value["timed_out"], false);
        assert_eq!(value["session_path"], "/tmp/root/session_1");
    }
}
