/// Structured pipeline audit events
///
/// Every event is rendered as one JSON object and written through `log` on
/// the `compilebox::audit` target, so operators can route it with RUST_LOG
/// filters (`RUST_LOG=compilebox::audit=info`).
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

pub const AUDIT_TARGET: &str = "compilebox::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of pipeline events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineEventType {
    JobSubmitted,
    JobStarted,
    StageFinished,
    LimitExceeded,
    JobCancelled,
    JobFinished,
    CacheHit,
    CacheEviction,
    ControlDegraded,
    CleanupFailure,
    InternalFault,
}

impl PipelineEventType {
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            PipelineEventType::JobSubmitted
            | PipelineEventType::JobStarted
            | PipelineEventType::StageFinished
            | PipelineEventType::JobFinished
            | PipelineEventType::CacheHit
            | PipelineEventType::CacheEviction => AuditSeverity::Low,
            PipelineEventType::LimitExceeded | PipelineEventType::JobCancelled => {
                AuditSeverity::Medium
            }
            PipelineEventType::ControlDegraded => AuditSeverity::High,
            PipelineEventType::CleanupFailure | PipelineEventType::InternalFault => {
                AuditSeverity::Critical
            }
        }
    }
}

/// Correlation fields attached to an event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub event_type: PipelineEventType,
    pub severity: AuditSeverity,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub details: String,
    pub correlation: Correlation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(event_type: PipelineEventType, details: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: chrono::Utc::now(),
            details: details.into(),
            correlation: Correlation::default(),
            data: None,
        }
    }

    pub fn with_job(mut self, job_id: impl ToString) -> Self {
        self.correlation.job_id = Some(job_id.to_string());
        self
    }

    pub fn with_language(mut self, language: impl ToString) -> Self {
        self.correlation.language = Some(language.to_string());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.correlation.stage = Some(stage.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"event_type\":\"{:?}\",\"details\":{:?}}}",
                self.event_type, self.details
            )
        })
    }
}

/// Write one event to the audit log target
pub fn log_event(event: PipelineEvent) {
    let line = event.to_json();
    match event.severity {
        AuditSeverity::Critical => error!(target: AUDIT_TARGET, "{}", line),
        AuditSeverity::High | AuditSeverity::Medium => warn!(target: AUDIT_TARGET, "{}", line),
        AuditSeverity::Low => info!(target: AUDIT_TARGET, "{}", line),
    }
}

/// Convenience functions for common pipeline events
pub mod events {
    use super::*;
    use crate::config::types::Language;
    use crate::core::types::{JobId, JobStatus, ResourceExceeded, StageRecord};

    pub fn job_submitted(job_id: &JobId, language: Language, mode: &str) {
        log_event(
            PipelineEvent::new(
                PipelineEventType::JobSubmitted,
                format!("Job submitted: mode={}", mode),
            )
            .with_job(job_id)
            .with_language(language),
        );
    }

    pub fn job_started(job_id: &JobId, language: Language, stages: &[&str]) {
        log_event(
            PipelineEvent::new(
                PipelineEventType::JobStarted,
                format!("Job started with {} stages", stages.len()),
            )
            .with_job(job_id)
            .with_language(language)
            .with_data(serde_json::json!({ "stages": stages })),
        );
    }

    pub fn stage_finished(job_id: &JobId, language: Language, record: &StageRecord) {
        log_event(
            PipelineEvent::new(
                PipelineEventType::StageFinished,
                format!(
                    "Stage {} finished: outcome={}",
                    record.stage_name,
                    record.outcome.as_str()
                ),
            )
            .with_job(job_id)
            .with_language(language)
            .with_stage(record.stage_name.clone())
            .with_data(serde_json::json!({
                "duration_ms": record.duration_ms(),
                "diagnostics": record.diagnostics.len(),
            })),
        );
    }

    pub fn limit_exceeded(job_id: &JobId, stage: &str, exceeded: &ResourceExceeded) {
        log_event(
            PipelineEvent::new(
                PipelineEventType::LimitExceeded,
                format!("Sandbox limits exceeded: {}", exceeded.describe().join(",")),
            )
            .with_job(job_id)
            .with_stage(stage),
        );
    }

    pub fn job_cancelled(job_id: &JobId, stage: Option<&str>) {
        let event = PipelineEvent::new(PipelineEventType::JobCancelled, "Job cancelled by caller")
            .with_job(job_id);
        let event = match stage {
            Some(stage) => event.with_stage(stage),
            None => event,
        };
        log_event(event);
    }

    pub fn job_finished(job_id: &JobId, language: Language, status: JobStatus, elapsed_ms: u64) {
        let event = PipelineEvent::new(
            PipelineEventType::JobFinished,
            format!("Job finished: status={} elapsed_ms={}", status, elapsed_ms),
        )
        .with_job(job_id)
        .with_language(language);
        log_event(event);
    }

    pub fn cache_hit(job_id: &JobId, fingerprint: &str, in_flight: bool) {
        log_event(
            PipelineEvent::new(
                PipelineEventType::CacheHit,
                if in_flight {
                    "Identical submission coalesced onto running job"
                } else {
                    "Completed result reused"
                },
            )
            .with_job(job_id)
            .with_data(serde_json::json!({ "fingerprint": fingerprint })),
        );
    }

    pub fn cache_eviction(job_id: &JobId) {
        log_event(
            PipelineEvent::new(PipelineEventType::CacheEviction, "Least recently used entry evicted")
                .with_job(job_id),
        );
    }

    pub fn control_degraded(control: &str, reason: &str) {
        log_event(PipelineEvent::new(
            PipelineEventType::ControlDegraded,
            format!("Sandbox control '{}' unavailable: {}", control, reason),
        ));
    }

    pub fn cleanup_failure(path: &std::path::Path, error: &str) {
        log_event(
            PipelineEvent::new(
                PipelineEventType::CleanupFailure,
                format!("Failed to remove scratch directory: {}", error),
            )
            .with_data(serde_json::json!({ "path": path.display().to_string() })),
        );
    }

    pub fn internal_fault(job_id: &JobId, stage: &str, error: &str) {
        log_event(
            PipelineEvent::new(PipelineEventType::InternalFault, error.to_string())
                .with_job(job_id)
                .with_stage(stage),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_severity() {
        assert_eq!(
            PipelineEventType::JobStarted.default_severity(),
            AuditSeverity::Low
        );
        assert_eq!(
            PipelineEventType::CleanupFailure.default_severity(),
            AuditSeverity::Critical
        );
        assert_eq!(
            PipelineEventType::LimitExceeded.default_severity(),
            AuditSeverity::Medium
        );
    }

    #[test]
    fn test_event_serialization_carries_correlation() {
        let event = PipelineEvent::new(PipelineEventType::StageFinished, "done")
            .with_job("job-1")
            .with_language("go")
            .with_stage("parse");
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["event_type"], "StageFinished");
        assert_eq!(value["correlation"]["job_id"], "job-1");
        assert_eq!(value["correlation"]["stage"], "parse");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_severity_override() {
        let event = PipelineEvent::new(PipelineEventType::JobFinished, "x")
            .with_severity(AuditSeverity::High);
        assert_eq!(event.severity, AuditSeverity::High);
    }
}
