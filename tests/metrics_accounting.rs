//! Prometheus counters for sandbox calls made on behalf of jobs
//!
//! The registry is process-wide, so this binary holds a single test and
//! compares counters before and after each job.

use compilebox::adapter::{
    AdapterRegistry, CommandTemplate, LanguageBackend, OutputParser, StageCommand, StageSpec,
    TemplateVars,
};
use compilebox::config::settings::EngineConfig;
use compilebox::config::types::{CompileOptions, Language};
use compilebox::core::types::{JobStatus, Phase, StageOutcome};
use compilebox::observability::metrics::get_metrics;
use compilebox::pipeline::{CompileRequest, Orchestrator};
use std::path::Path;
use std::sync::Arc;

/// One `sh -c` stage
struct OneStage {
    stages: Vec<StageSpec>,
}

impl OneStage {
    fn new(script: &str) -> Self {
        let command = StageCommand::Template(CommandTemplate::new([
            "{tool:sh}".to_string(),
            "-c".to_string(),
            script.to_string(),
        ]));
        Self {
            stages: vec![StageSpec::new("compile", Phase::Codegen, command, OutputParser::DiagnosticsOnly)],
        }
    }
}

impl LanguageBackend for OneStage {
    fn language(&self) -> Language {
        Language::C
    }

    fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    fn source_file_name(&self, _source: &str) -> String {
        "main.c".to_string()
    }

    fn template_vars(&self, _options: &CompileOptions) -> TemplateVars {
        TemplateVars::new()
    }
}

fn orchestrator(scratch_root: &Path, script: &str) -> Orchestrator {
    let mut config = EngineConfig::default();
    config.sandbox.scratch_root = scratch_root.to_path_buf();
    config.sandbox.isolate_network = false;
    config.pipeline.stage_timeout_seconds = 1;
    let mut registry = AdapterRegistry::builtin(&config);
    registry.register(Arc::new(OneStage::new(script)));
    Orchestrator::builder(config).registry(registry).build().unwrap()
}

#[test]
fn test_one_stage_job_counts_each_event_once() {
    let metrics = get_metrics();
    let root = tempfile::tempdir().unwrap();

    let invocations = metrics.sandbox_invocations.get();
    let wall = metrics.limit_violations_wall.get();
    let faults = metrics.sandbox_faults.get();
    let orchestrator = orchestrator(root.path(), "sleep 20");
    let (_, snapshot) = orchestrator
        .run(CompileRequest::new(Language::C, "int x;"))
        .unwrap();
    assert_eq!(snapshot.records[0].outcome, StageOutcome::TimedOut);
    assert_eq!(metrics.sandbox_invocations.get() - invocations, 1);
    assert_eq!(metrics.limit_violations_wall.get() - wall, 1);
    assert_eq!(metrics.sandbox_faults.get(), faults);

    // A scratch root below a regular file cannot be created
    let blocker = root.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let invocations = metrics.sandbox_invocations.get();
    let orchestrator = self::orchestrator(&blocker.join("scratch"), "true");
    let (_, snapshot) = orchestrator
        .run(CompileRequest::new(Language::C, "int y;"))
        .unwrap();
    assert_eq!(snapshot.status(), JobStatus::Failed);
    assert!(snapshot.fault.is_some());
    assert_eq!(metrics.sandbox_invocations.get() - invocations, 1);
    assert_eq!(metrics.sandbox_faults.get() - faults, 1);

    let text = metrics.export_prometheus();
    assert!(text.contains(&format!(
        "compilebox_limit_violations_total{{kind=\"wall\"}} {}",
        metrics.limit_violations_wall.get()
    )));
}
