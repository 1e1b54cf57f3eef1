use crate::adapter::AdapterRegistry;
use crate::cache::{Fingerprint, Lookup, ResultCache};
use crate::config::settings::EngineConfig;
use crate::config::types::{HubError, Result};
use crate::core::types::{CompileJob, JobId};
use crate::graph::{GraphBuilder, VisualizationGraph};
use crate::observability::audit::events;
use crate::observability::metrics::get_metrics;
use crate::pipeline::job::{CompileRequest, JobHandle, JobSnapshot, Submission};
use crate::pipeline::runner;
use crate::sandbox::{IsolationReport, ProcessSandbox, SandboxExecutor, ToolLocator};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Process-wide pieces every job reads; only the cache and the job table
/// are mutated after startup
pub(crate) struct Shared {
    pub config: EngineConfig,
    pub executor: Arc<dyn SandboxExecutor>,
    pub locator: ToolLocator,
    pub registry: AdapterRegistry,
    pub cache: ResultCache,
    pub graph: GraphBuilder,
    pub jobs: Mutex<HashMap<JobId, Arc<JobHandle>>>,
}

impl Shared {
    fn running(&self, job_id: &JobId) -> Result<Option<Arc<JobHandle>>> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| HubError::Internal("job table lock poisoned".to_string()))?;
        Ok(jobs.get(job_id).cloned())
    }
}

pub struct OrchestratorBuilder {
    config: EngineConfig,
    executor: Option<Arc<dyn SandboxExecutor>>,
    registry: Option<AdapterRegistry>,
    locator: Option<ToolLocator>,
}

impl OrchestratorBuilder {
    pub fn executor(mut self, executor: Arc<dyn SandboxExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn locator(mut self, locator: ToolLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config;
        let executor: Arc<dyn SandboxExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ProcessSandbox::new(config.sandbox.clone())?),
        };
        let locator = self
            .locator
            .unwrap_or_else(|| ToolLocator::from_settings(&config.sandbox));
        let registry = self
            .registry
            .unwrap_or_else(|| AdapterRegistry::builtin(&config));

        Ok(Orchestrator {
            shared: Arc::new(Shared {
                cache: ResultCache::new(config.cache.capacity),
                graph: GraphBuilder::new(&config.graph),
                executor,
                locator,
                registry,
                jobs: Mutex::new(HashMap::new()),
                config,
            }),
        })
    }
}

/// Cloneable handle to the pipeline manager
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: EngineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            executor: None,
            registry: None,
            locator: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.shared.registry
    }

    pub fn locator(&self) -> &ToolLocator {
        &self.shared.locator
    }

    pub fn isolation_report(&self) -> IsolationReport {
        self.shared.executor.isolation_report()
    }

    /// Validate, consult the cache, and start a worker for a new job
    pub fn submit(&self, request: CompileRequest) -> Result<Submission> {
        let shared = &self.shared;
        let metrics = get_metrics();

        let backend = match request
            .validate(shared.config.pipeline.max_source_bytes)
            .and_then(|_| shared.registry.get(request.language))
        {
            Ok(backend) => backend,
            Err(e) => {
                metrics.jobs_rejected.inc();
                log::info!("rejected {} submission: {}", request.language, e);
                return Err(e);
            }
        };

        let fingerprint =
            Fingerprint::compute(request.language, request.mode, &request.options, &request.source);
        if shared.config.cache.enabled && request.use_cache {
            match shared.cache.lookup(&fingerprint)? {
                Lookup::Hit(done) => {
                    metrics.cache_hits.inc();
                    events::cache_hit(&done.job.id, fingerprint.as_str(), false);
                    return Ok(Submission {
                        job_id: done.job.id.clone(),
                        cached: true,
                    });
                }
                Lookup::InFlight(job_id) => {
                    metrics.cache_coalesced.inc();
                    events::cache_hit(&job_id, fingerprint.as_str(), true);
                    return Ok(Submission { job_id, cached: true });
                }
                Lookup::Miss => metrics.cache_misses.inc(),
            }
        }

        let job = CompileJob::new(request.language, request.source, request.options, request.mode);
        let job_id = job.id.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = Arc::new(JobHandle::new(job, done_rx));

        shared.cache.reserve(fingerprint.clone(), job_id.clone())?;
        self.shared
            .jobs
            .lock()
            .map_err(|_| HubError::Internal("job table lock poisoned".to_string()))?
            .insert(job_id.clone(), Arc::clone(&handle));
        metrics.jobs_submitted.inc();
        events::job_submitted(&job_id, request.language, request.mode.as_str());

        let worker_shared = Arc::clone(&self.shared);
        let worker_handle = Arc::clone(&handle);
        let worker_id = job_id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("job-{}", job_id.short()))
            .spawn(move || {
                let retained = fingerprint.clone();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    runner::run_job(&worker_shared, &worker_handle, backend, fingerprint)
                }));
                if outcome.is_err() {
                    log::error!("worker for job {} panicked", worker_id);
                    runner::abandon(&worker_shared, &worker_handle, retained, "job worker panicked");
                }
                if let Ok(mut jobs) = worker_shared.jobs.lock() {
                    jobs.remove(&worker_id);
                }
                drop(done_tx);
            });

        if let Err(e) = spawned {
            let _ = shared.cache.release(&job_id);
            if let Ok(mut jobs) = shared.jobs.lock() {
                jobs.remove(&job_id);
            }
            return Err(HubError::Internal(format!("failed to start job worker: {}", e)));
        }

        Ok(Submission {
            job_id,
            cached: false,
        })
    }

    /// Current state of a job; running jobs come from their handle,
    /// finished ones from the cache
    pub fn snapshot(&self, job_id: &JobId) -> Result<JobSnapshot> {
        if let Some(handle) = self.shared.running(job_id)? {
            return handle.snapshot();
        }
        match self.shared.cache.get(job_id)? {
            Some(done) => Ok(JobSnapshot::from(done.as_ref())),
            None => Err(HubError::NotFound(format!("job {}", job_id))),
        }
    }

    /// Block until the job is terminal or `timeout` passes, then snapshot it
    pub fn wait(&self, job_id: &JobId, timeout: Option<Duration>) -> Result<JobSnapshot> {
        match self.shared.running(job_id)? {
            Some(handle) => {
                handle.wait(timeout);
                handle.snapshot()
            }
            None => self.snapshot(job_id),
        }
    }

    /// Submit and wait for the terminal state
    pub fn run(&self, request: CompileRequest) -> Result<(Submission, JobSnapshot)> {
        let submission = self.submit(request)?;
        let snapshot = self.wait(&submission.job_id, None)?;
        Ok((submission, snapshot))
    }

    /// Cancel a job. Returns false when it had already finished.
    pub fn cancel(&self, job_id: &JobId) -> Result<bool> {
        if let Some(handle) = self.shared.running(job_id)? {
            let stage = handle.snapshot().ok().and_then(|s| s.current_stage);
            handle.cancel();
            log::info!("job {} cancelled during {:?}", job_id, stage);
            events::job_cancelled(job_id, stage.as_deref());
            return Ok(true);
        }
        if self.shared.cache.get(job_id)?.is_some() {
            return Ok(false);
        }
        Err(HubError::NotFound(format!("job {}", job_id)))
    }

    /// Graph of a completed job
    pub fn graph(&self, job_id: &JobId) -> Result<VisualizationGraph> {
        match self.shared.cache.get(job_id)? {
            Some(done) => Ok(done.graph.clone()),
            None if self.shared.running(job_id)?.is_some() => Err(HubError::NotFound(format!(
                "job {} is still running",
                job_id
            ))),
            None => Err(HubError::NotFound(format!("job {}", job_id))),
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.shared.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }
}
