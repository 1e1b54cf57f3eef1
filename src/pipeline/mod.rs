//! Pipeline manager
//!
//! One worker thread per job drives the backend's stages strictly in order.
//! Jobs share nothing mutable except the result cache and the table of
//! running jobs.

pub mod job;
pub mod manager;
mod runner;

pub use job::{CompileRequest, JobHandle, JobSnapshot, Submission};
pub use manager::{Orchestrator, OrchestratorBuilder};
pub use runner::selected_stages;
