//! Per-job worker: drives one job through its backend's stages

use crate::adapter::{parse_stage_output, LanguageBackend, StageContext, StageSpec};
use crate::cache::{CompletedJob, Fingerprint};
use crate::config::types::HubError;
use crate::core::types::{
    Diagnostic, JobId, JobMode, JobStatus, StageOutcome, StageRecord,
};
use crate::observability::audit::events;
use crate::observability::metrics::get_metrics;
use crate::pipeline::job::{JobHandle, JobState};
use crate::pipeline::manager::Shared;
use crate::sandbox::{Artifact, InputFile, SandboxLimits, SandboxRequest};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stages a job of `mode` runs, in declared order
pub fn selected_stages(backend: &dyn LanguageBackend, mode: JobMode) -> Vec<&StageSpec> {
    backend
        .stages()
        .iter()
        .filter(|stage| mode == JobMode::Compile || stage.phase.is_front_end())
        .collect()
}

/// Wall ceiling of one stage: the configured stage timeout, never above
/// the sandbox wall limit
pub(crate) fn stage_ceiling(shared: &Shared) -> Duration {
    let pipeline = &shared.config.pipeline;
    let wall = shared.config.sandbox.default_limits.wall_seconds;
    Duration::from_secs(pipeline.stage_timeout_seconds.min(wall).max(1))
}

/// Whole-job budget: configured, or the sum of the stage ceilings
pub(crate) fn job_budget(shared: &Shared, stage_count: usize) -> Duration {
    match shared.config.pipeline.job_timeout_seconds {
        Some(seconds) => Duration::from_secs(seconds.max(1)),
        None => stage_ceiling(shared) * stage_count.max(1) as u32,
    }
}

/// How the stage loop ended
enum Stop {
    Finished,
    Status(JobStatus),
    Fault(String),
}

pub(crate) fn run_job(
    shared: &Shared,
    handle: &JobHandle,
    backend: Arc<dyn LanguageBackend>,
    fingerprint: Fingerprint,
) {
    let started = Instant::now();
    let metrics = get_metrics();
    metrics.active_jobs.inc();

    let (job_id, language, source, options, mode) = match handle.lock() {
        Ok(state) => (
            state.job.id.clone(),
            state.job.language,
            state.job.source_code.clone(),
            state.job.options,
            state.job.mode,
        ),
        Err(e) => {
            log::error!("job state unavailable before start: {}", e);
            metrics.active_jobs.dec();
            return;
        }
    };

    let stages = selected_stages(backend.as_ref(), mode);
    let names: Vec<&str> = stages.iter().map(|s| s.name).collect();

    let stop = if handle.is_cancelled() {
        // Cancelled while pending: nothing ran
        with_state(handle, |state| {
            let _ = state.job.transition(JobStatus::Failed);
        });
        if let Some(first) = stages.first() {
            push_record(
                handle,
                StageRecord::skipped(
                    first.name,
                    first.phase,
                    first.blocking,
                    StageOutcome::Cancelled,
                    vec![Diagnostic::error("job cancelled before it started")],
                ),
            );
        }
        Stop::Status(JobStatus::Failed)
    } else {
        with_state(handle, |state| {
            if let Err(e) = state.job.transition(JobStatus::Running) {
                log::error!("{}", e);
            }
        });
        log::info!("job {} started: {} {} stages", job_id, language, names.len());
        events::job_started(&job_id, language, &names);

        match missing_tool(shared, &stages) {
            Some((stage, tool)) => {
                let error = HubError::ToolchainUnavailable {
                    language: language.to_string(),
                    tool: tool.clone(),
                };
                log::warn!("job {}: {}", job_id, error);
                push_record(
                    handle,
                    StageRecord::skipped(
                        stage.name,
                        stage.phase,
                        stage.blocking,
                        StageOutcome::ToolchainUnavailable,
                        vec![Diagnostic::error(format!(
                            "{} is not installed on this host; {} jobs cannot run",
                            tool, language
                        ))],
                    ),
                );
                Stop::Status(JobStatus::Failed)
            }
            None => {
                let ctx = StageContext {
                    language,
                    source_file: backend.source_file_name(&source),
                    vars: backend.template_vars(&options),
                    source,
                    options,
                };
                run_stages(shared, handle, backend.as_ref(), &stages, &ctx, &job_id)
            }
        }
    };

    // Stages after the stopping point are recorded as not run
    let recorded = with_state(handle, |state| state.records.len()).unwrap_or(0);
    for stage in stages.iter().skip(recorded) {
        push_record(
            handle,
            StageRecord::skipped(stage.name, stage.phase, stage.blocking, StageOutcome::NotRun, Vec::new()),
        );
        metrics.record_stage(StageOutcome::NotRun, Duration::ZERO);
    }

    let (status, fault) = match stop {
        Stop::Finished => (JobStatus::Succeeded, None),
        Stop::Status(status) => (status, None),
        Stop::Fault(fault) => (JobStatus::Failed, Some(fault)),
    };
    finish(shared, handle, &job_id, status, fault, fingerprint, started);
}

fn run_stages(
    shared: &Shared,
    handle: &JobHandle,
    backend: &dyn LanguageBackend,
    stages: &[&StageSpec],
    ctx: &StageContext,
    job_id: &JobId,
) -> Stop {
    let metrics = get_metrics();
    let ceiling = stage_ceiling(shared);
    let deadline = Instant::now() + job_budget(shared, stages.len());
    let base_limits = {
        let mut limits = SandboxLimits::from(&shared.config.sandbox.default_limits);
        limits.address_space_bytes = shared.config.sandbox.address_space_limit;
        limits
    };
    let mut artifacts: Vec<Artifact> = Vec::new();

    for spec in stages {
        if handle.is_cancelled() {
            push_record(
                handle,
                StageRecord::skipped(
                    spec.name,
                    spec.phase,
                    spec.blocking,
                    StageOutcome::Cancelled,
                    vec![Diagnostic::error(format!("job cancelled before {} started", spec.name))],
                ),
            );
            return Stop::Status(JobStatus::Failed);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining < Duration::from_millis(50) {
            push_record(
                handle,
                StageRecord::skipped(
                    spec.name,
                    spec.phase,
                    spec.blocking,
                    StageOutcome::TimedOut,
                    vec![Diagnostic::error("job time budget exhausted")],
                ),
            );
            return Stop::Status(JobStatus::Failed);
        }

        let artifact_names: Vec<String> = artifacts
            .iter()
            .map(|a| a.path.to_string_lossy().into_owned())
            .collect();
        let vars = ctx.stage_vars(&artifact_names);
        let program = match spec.command.to_program(&vars) {
            Ok(program) => program,
            Err(e) => return fault(job_id, spec.name, e),
        };

        let limits = base_limits.with_wall_ceiling(ceiling.min(remaining));
        let mut request = SandboxRequest::new(program, limits)
            .with_input(InputFile::new(ctx.source_file.as_str(), ctx.source.as_bytes()));
        for artifact in &artifacts {
            request = request.with_input(artifact.clone().into_input());
        }
        for path in &spec.collect {
            request = request.with_collect(*path);
        }
        for (key, value) in backend.environment() {
            request = request.with_env(key, value);
        }

        with_state(handle, |state| state.current_stage = Some(spec.name.to_string()));
        log::debug!("job {} stage {}: {}", job_id.short(), spec.name, request.program.display_name());

        let result = match shared.executor.execute(&request, handle.cancel_token()) {
            Ok(result) => result,
            Err(HubError::ToolchainUnavailable { tool, .. }) => {
                push_record(
                    handle,
                    StageRecord::skipped(
                        spec.name,
                        spec.phase,
                        spec.blocking,
                        StageOutcome::ToolchainUnavailable,
                        vec![Diagnostic::error(format!("{} is not installed on this host", tool))],
                    ),
                );
                return Stop::Status(JobStatus::Failed);
            }
            Err(e) => return fault(job_id, spec.name, e),
        };

        let notes = backend.option_notes(spec, &ctx.options);
        let record = parse_stage_output(spec, ctx, &result, notes);

        if result.resource_exceeded.terminated() {
            events::limit_exceeded(job_id, spec.name, &result.resource_exceeded);
        }
        metrics.record_stage(record.outcome, Duration::from_millis(record.duration_ms()));
        events::stage_finished(job_id, ctx.language, &record);
        log::debug!(
            "job {} stage {} -> {} ({} ms, {} diagnostics)",
            job_id.short(),
            spec.name,
            record.outcome.as_str(),
            record.duration_ms(),
            record.diagnostics.len()
        );

        for artifact in result.artifacts {
            artifacts.retain(|a| a.path != artifact.path);
            artifacts.push(artifact);
        }

        let outcome = record.outcome;
        push_record(handle, record);
        with_state(handle, |state| state.current_stage = None);

        match outcome {
            StageOutcome::Completed => continue,
            StageOutcome::Cancelled | StageOutcome::TimedOut => return Stop::Status(JobStatus::Failed),
            _ if spec.blocking => return Stop::Status(JobStatus::Failed),
            _ => return Stop::Status(JobStatus::PartiallyFailed),
        }
    }
    Stop::Finished
}

/// First selected stage whose tool is missing, with the tool name
fn missing_tool<'a>(shared: &Shared, stages: &[&'a StageSpec]) -> Option<(&'a StageSpec, String)> {
    for stage in stages {
        for tool in stage.command.tools() {
            if !shared.locator.is_available(tool) {
                return Some((stages[0], tool.to_string()));
            }
        }
    }
    None
}

fn fault(job_id: &JobId, stage: &str, error: HubError) -> Stop {
    log::error!("job {} internal fault in stage {}: {}", job_id, stage, error);
    events::internal_fault(job_id, stage, &error.to_string());
    Stop::Fault(error.to_string())
}

fn with_state<T>(handle: &JobHandle, f: impl FnOnce(&mut JobState) -> T) -> Option<T> {
    match handle.lock() {
        Ok(mut state) => Some(f(&mut state)),
        Err(e) => {
            log::error!("{}", e);
            None
        }
    }
}

fn push_record(handle: &JobHandle, record: StageRecord) {
    with_state(handle, |state| state.records.push(record));
}

/// Terminal bookkeeping: status, graph, cache entry, metrics
fn finish(
    shared: &Shared,
    handle: &JobHandle,
    job_id: &JobId,
    status: JobStatus,
    fault: Option<String>,
    fingerprint: Fingerprint,
    started: Instant,
) {
    let metrics = get_metrics();
    let completed = with_state(handle, |state| {
        if state.job.status != status && !state.job.status.is_terminal() {
            if let Err(e) = state.job.transition(status) {
                log::error!("{}", e);
            }
        }
        state.current_stage = None;
        state.fault = fault.clone();
        let graph = shared.graph.build(&state.records);
        state.graph = Some(graph.clone());

        let reusable = fault.is_none()
            && state.records.iter().all(|r| {
                !matches!(
                    r.outcome,
                    StageOutcome::Cancelled | StageOutcome::TimedOut | StageOutcome::ToolchainUnavailable
                )
            });
        CompletedJob {
            job: state.job.clone(),
            records: state.records.clone(),
            graph,
            fault: state.fault.clone(),
            reusable,
        }
    });

    if let Some(completed) = completed {
        let language = completed.job.language;
        let status = completed.job.status;
        if let Err(e) = shared.cache.put(fingerprint, completed) {
            log::error!("job {}: result not stored: {}", job_id, e);
            with_state(handle, |state| state.fault = Some(e.to_string()));
        }
        let elapsed = started.elapsed();
        metrics.record_job(status, elapsed);
        events::job_finished(job_id, language, status, elapsed.as_millis() as u64);
        log::info!("job {} finished: {} in {} ms", job_id, status, elapsed.as_millis());
    }
    metrics.active_jobs.dec();
}

/// Best-effort terminal state for a worker that died mid-job
pub(crate) fn abandon(shared: &Shared, handle: &JobHandle, fingerprint: Fingerprint, reason: &str) {
    let mut state = handle.lock_after_panic();
    if !state.job.status.is_terminal() {
        let _ = state.job.transition(JobStatus::Failed);
    }
    state.current_stage = None;
    state.fault = Some(reason.to_string());
    let completed = CompletedJob {
        job: state.job.clone(),
        records: state.records.clone(),
        graph: shared.graph.build(&state.records),
        fault: state.fault.clone(),
        reusable: false,
    };
    drop(state);
    if let Err(e) = shared.cache.put(fingerprint, completed) {
        log::error!("abandoned job not stored: {}", e);
    }
    get_metrics().active_jobs.dec();
}
