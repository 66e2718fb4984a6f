//! Execution sandbox: session directories, source policies, process supervision.
//!
//! The isolation model is small:
//!
//! 1. Private directory per invocation (`session`): nothing else is shared
//! 2. Optional denylist preamble (`policy`): blocks naming forbidden modules
//! 3. Supervised process (`supervisor`): wall-clock deadline, kill + reap
//!
//! There is no namespace, network or resource-quota isolation here.

pub mod error;
pub mod policy;
pub mod session;
pub mod supervisor;

pub use error::SandboxError;
pub use policy::{DenylistGuard, Passthrough, SourcePolicy};
pub use session::{Session, SessionRoot, SourceFilename};
pub use supervisor::{CommandSpec, ExitOutcome, ProcessOutput, ProcessSupervisor};
