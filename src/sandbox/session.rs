//! Per-invocation session directories.
//!
//! Layout:
//!   {parent}/{prefix}{uuid}/                  # process-wide root, created at startup
//!   {parent}/{prefix}{uuid}/session_{uuid}/   # one directory per invocation
//!   .../session_{uuid}/{filename}             # the single source file
//!
//! Uniqueness comes from exclusive `create_dir`: an existing name is an error,
//! never a shared directory. No lock is needed across concurrent invocations.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::error::{Result, SandboxError};

/// Filename used when the caller does not supply one.
pub const DEFAULT_FILENAME: &str = "script.py";

/// Prefix of every per-invocation directory.
const SESSION_PREFIX: &str = "session_";

/// Fresh names tried before giving up on a collision.
const MAX_CREATE_ATTEMPTS: u32 = 4;

/// Longest filename accepted (common filesystem limit).
const MAX_FILENAME_LEN: usize = 255;

/// A validated, single-segment source filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFilename(String);

impl SourceFilename {
    /// Validates a caller-supplied filename before it is joined to a session path.
    pub fn parse(name: &str) -> Result<Self> {
        let reject = |reason| {
            Err(SandboxError::InvalidFilename {
                name: name.to_string(),
                reason,
            })
        };

        if name.is_empty() {
            return reject("empty");
        }
        if name.len() > MAX_FILENAME_LEN {
            return reject("too long");
        }
        if name.contains('\0') {
            return reject("contains a null byte");
        }
        if name.contains('/') || name.contains('\\') {
            return reject("must not contain path separators");
        }
        if name == "." || name == ".." {
            return reject("must not be a relative directory reference");
        }
        let lower = name.to_lowercase();
        if lower.contains("%2e") || lower.contains("%2f") || lower.contains("%5c") {
            return reject("contains URL-encoded path characters");
        }

        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(_)), None) => Ok(Self(name.to_string())),
            _ => reject("must be a single path segment"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SourceFilename {
    fn default() -> Self {
        Self(DEFAULT_FILENAME.to_string())
    }
}

impl std::fmt::Display for SourceFilename {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The process-wide root that every session directory is nested under.
///
/// Owned by the service's top-level context and shared behind an `Arc`;
/// `teardown()` removes it recursively at shutdown.
#[derive(Debug)]
pub struct SessionRoot {
    path: PathBuf,
}

impl SessionRoot {
    /// Creates `{parent}/{prefix}{uuid}`. Called once at startup.
    pub fn create(parent: &Path, prefix: &str) -> Result<Self> {
        std::fs::create_dir_all(parent).map_err(|e| SandboxError::filesystem(parent, e))?;

        let path = parent.join(format!("{prefix}{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir(&path).map_err(|e| SandboxError::filesystem(&path, e))?;

        info!("Session root created at {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocates a fresh, empty session directory.
    pub async fn create_session(&self) -> Result<Session> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let path = self
                .path
                .join(format!("{SESSION_PREFIX}{}", uuid::Uuid::new_v4().simple()));

            match tokio::fs::create_dir(&path).await {
                Ok(()) => {
                    debug!("Session created: {}", path.display());
                    return Ok(Session { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < MAX_CREATE_ATTEMPTS => {
                    debug!("Session name collision at {}, retrying", path.display());
                }
                Err(e) => return Err(SandboxError::filesystem(path, e)),
            }
        }
    }

    /// Removes the root and every session below it.
    pub async fn teardown(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                info!("Session root removed: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::filesystem(&self.path, e)),
        }
    }
}

/// An isolated directory owned by one invocation.
#[derive(Debug)]
pub struct Session {
    path: PathBuf,
}

impl Session {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `filename` inside this session.
    pub fn file_path(&self, filename: &SourceFilename) -> PathBuf {
        self.path.join(filename.as_str())
    }

    /// Writes the source file and returns its path.
    pub async fn write_source(&self, filename: &SourceFilename, code: &str) -> Result<PathBuf> {
        let path = self.file_path(filename);
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| SandboxError::filesystem(&path, e))?;
        Ok(path)
    }

    /// Reads the source file back (lossy UTF-8).
    pub async fn read_source(&self, filename: &SourceFilename) -> Result<String> {
        let path = self.file_path(filename);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SandboxError::filesystem(&path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
