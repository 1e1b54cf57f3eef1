//! Sandbox executor
//!
//! Runs one toolchain invocation (external process or embedded program) in
//! a fresh private scratch directory under CPU, memory, wall-time, output
//! and file-size limits, without network access.
//!
//! - [`executor`]: `ProcessSandbox`, the watchdog-driven implementation
//! - [`process`]: pre-exec controls, group termination, reaping, /proc sampling
//! - [`workspace`]: scoped scratch directories and stale sweeps
//! - [`output`]: bounded stdout/stderr collection
//! - [`inprocess`]: contract for embedded tools
//! - [`toolchain`]: executable lookup

pub mod executor;
pub mod inprocess;
pub mod output;
pub mod process;
pub mod toolchain;
pub mod types;
pub mod workspace;

use crate::config::types::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use executor::ProcessSandbox;
pub use inprocess::{Abort, EmbeddedContext, EmbeddedProgram};
pub use toolchain::ToolLocator;
pub use types::{
    Artifact, ExecutionStatus, InputFile, IsolationReport, OutputIntegrity, SandboxLimits,
    SandboxProgram, SandboxRequest, SandboxResult,
};

/// Shared cancellation flag checked by the watchdog
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Anything that can run a sandbox request.
///
/// Limit breaches, crashes and cancellation are reported inside the
/// `SandboxResult`; `Err` is reserved for faults of the executor itself
/// (scratch directory creation, spawn failures, missing toolchain).
pub trait SandboxExecutor: Send + Sync {
    fn execute(&self, request: &SandboxRequest, cancel: &CancelToken) -> Result<SandboxResult>;

    fn isolation_report(&self) -> IsolationReport {
        IsolationReport::default()
    }
}
