use crate::cache::CompletedJob;
use crate::config::types::{CompileOptions, HubError, Language, Result};
use crate::core::types::{CompileJob, Diagnostic, JobId, JobMode, JobStatus, StageRecord};
use crate::graph::VisualizationGraph;
use crate::sandbox::CancelToken;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A caller's request, validated before any job exists
#[derive(Clone, Debug)]
pub struct CompileRequest {
    pub language: Language,
    pub source: String,
    pub options: CompileOptions,
    pub mode: JobMode,
    /// Allow answering from an identical earlier or running submission
    pub use_cache: bool,
}

impl CompileRequest {
    pub fn new(language: Language, source: impl Into<String>) -> Self {
        Self {
            language,
            source: source.into(),
            options: CompileOptions::default(),
            mode: JobMode::Compile,
            use_cache: true,
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_mode(mut self, mode: JobMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn validate(&self, max_source_bytes: usize) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(HubError::Validation("source code is empty".to_string()));
        }
        if self.source.len() > max_source_bytes {
            return Err(HubError::Validation(format!(
                "source code is {} bytes, limit is {}",
                self.source.len(),
                max_source_bytes
            )));
        }
        if self.source.contains('\0') {
            return Err(HubError::Validation("source code contains NUL bytes".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    /// Answered by an identical earlier or in-flight job
    pub cached: bool,
}

/// Point-in-time view of a job
#[derive(Clone, Debug, Serialize)]
pub struct JobSnapshot {
    pub job: CompileJob,
    pub records: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    /// Present once the job is terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<VisualizationGraph>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.job.status.is_terminal()
    }

    pub fn status(&self) -> JobStatus {
        self.job.status
    }

    pub fn record(&self, stage: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.stage_name == stage)
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter().flat_map(|r| r.diagnostics.iter())
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics().any(Diagnostic::is_error)
    }
}

impl From<&CompletedJob> for JobSnapshot {
    fn from(done: &CompletedJob) -> Self {
        Self {
            job: done.job.clone(),
            records: done.records.clone(),
            current_stage: None,
            graph: Some(done.graph.clone()),
            fault: done.fault.clone(),
        }
    }
}

/// Mutable per-job state, owned by the job's worker
#[derive(Debug)]
pub(crate) struct JobState {
    pub job: CompileJob,
    pub records: Vec<StageRecord>,
    pub current_stage: Option<String>,
    pub graph: Option<VisualizationGraph>,
    pub fault: Option<String>,
}

/// Shared handle to a running job.
///
/// The worker holds the only sender of `done`; dropping it on exit wakes
/// every waiter at once.
#[derive(Debug)]
pub struct JobHandle {
    state: Mutex<JobState>,
    cancel: CancelToken,
    done: Receiver<()>,
}

impl JobHandle {
    pub(crate) fn new(job: CompileJob, done: Receiver<()>) -> Self {
        Self {
            state: Mutex::new(JobState {
                job,
                records: Vec::new(),
                current_stage: None,
                graph: None,
                fault: None,
            }),
            cancel: CancelToken::new(),
            done,
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, JobState>> {
        self.state
            .lock()
            .map_err(|_| HubError::Internal("job state lock poisoned".to_string()))
    }

    /// State of a worker that panicked; a poisoned lock still holds the
    /// last consistent records
    pub(crate) fn lock_after_panic(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn snapshot(&self) -> Result<JobSnapshot> {
        let state = self.lock()?;
        Ok(JobSnapshot {
            job: state.job.clone(),
            records: state.records.clone(),
            current_stage: state.current_stage.clone(),
            graph: state.graph.clone(),
            fault: state.fault.clone(),
        })
    }

    /// Block until the worker exits or `timeout` passes; true when finished
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(timeout) => matches!(
                self.done.recv_timeout(timeout),
                Err(RecvTimeoutError::Disconnected) | Ok(())
            ),
            None => {
                let _ = self.done.recv();
                true
            }
        }
    }
}
