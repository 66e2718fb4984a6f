//! Error types for the execution sandbox.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors raised while preparing or supervising an invocation.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Caller-supplied filename is not a single safe path segment.
    #[error("Invalid filename '{name}': {reason}")]
    InvalidFilename {
        /// The rejected filename.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Session directory or source file could not be created, written or read.
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        /// Path being operated on.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The external program could not be started.
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        /// Program name or path.
        program: String,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// Waiting for or killing a running process failed.
    #[error("Failed to supervise '{program}': {source}")]
    Supervision {
        /// Program name or path.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl SandboxError {
    /// Whether this error must abort the whole invocation.
    ///
    /// Process-level failures are reported inside the result record instead,
    /// so sibling sub-tool data survives.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SandboxError::InvalidFilename { .. } | SandboxError::Filesystem { .. }
        )
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SandboxError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let io = || std::io::Error::new(std::io::ErrorKind::NotFound, "missing");

        assert!(SandboxError::filesystem("/tmp/x", io()).is_fatal());
        assert!(SandboxError::InvalidFilename {
            name: "../x".to_string(),
            reason: "traversal",
        }
        .is_fatal());
        assert!(!SandboxError::Launch {
            program: "ruff".to_string(),
            source: io(),
        }
        .is_fatal());
        assert!(!SandboxError::Supervision {
            program: "ruff".to_string(),
            source: io(),
        }
        .is_fatal());
    }

    #[test]
    fn test_launch_message_names_program() {
        let err = SandboxError::Launch {
            program: "bandit".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        };
        assert_eq!(err.to_string(), "Failed to launch 'bandit': No such file");
    }
}
