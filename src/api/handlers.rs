use crate::api::types::{format_elapsed, ApiReply, CompileBody, CompileData, Envelope, StageSummary};
use crate::api::Query;
use crate::config::types::{CompileOptions, HubError, Language, OptimizationLevel, Result};
use crate::core::types::{JobId, JobMode, JobStatus, Phase, StageOutcome};
use crate::graph::export::{self, ExportFormat};
use crate::pipeline::{CompileRequest, Orchestrator};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Instant;

fn envelope<T: Serialize>(status: u16, data: Option<T>, error: Option<String>, started: Instant) -> ApiReply {
    let body = Envelope {
        success: error.is_none() && (200..300).contains(&status),
        data,
        execution_time: format_elapsed(started.elapsed()),
        error,
    };
    ApiReply::json(status, serde_json::to_value(body).unwrap_or(Value::Null))
}

pub fn ok<T: Serialize>(data: T, started: Instant) -> ApiReply {
    envelope(200, Some(data), None, started)
}

pub fn error_reply(error: &HubError, started: Instant) -> ApiReply {
    envelope::<Value>(error.http_status(), None, Some(error.to_string()), started)
}

fn job_id(query: &Query) -> Result<JobId> {
    query
        .get("id")
        .or_else(|| query.get("session_id"))
        .filter(|id| !id.is_empty())
        .map(JobId::from)
        .ok_or_else(|| HubError::Validation("missing id parameter".to_string()))
}

fn parse_body(body: &str, mode: JobMode) -> Result<CompileRequest> {
    let body: CompileBody = serde_json::from_str(body)
        .map_err(|e| HubError::Validation(format!("invalid request body: {}", e)))?;
    let language = Language::parse(&body.language)?;
    let optimization = match body.optimization.as_deref() {
        Some(level) => OptimizationLevel::parse(level)?,
        None => OptimizationLevel::default(),
    };
    let options = CompileOptions::new(optimization, body.debug.unwrap_or(false));
    let mut request = CompileRequest::new(language, body.code)
        .with_options(options)
        .with_mode(mode);
    if body.cache == Some(false) {
        request = request.without_cache();
    }
    Ok(request)
}

/// `POST /api/compile` and `POST /api/analyze`
pub fn compile(orchestrator: &Orchestrator, body: &str, mode: JobMode) -> ApiReply {
    let started = Instant::now();
    let request = match parse_body(body, mode) {
        Ok(request) => request,
        Err(e) => return error_reply(&e, started),
    };
    let (submission, snapshot) = match orchestrator.run(request) {
        Ok(done) => done,
        Err(e) => return error_reply(&e, started),
    };

    if let Some(fault) = &snapshot.fault {
        let data = json!({
            "job_id": snapshot.job.id,
            "status": snapshot.job.status,
            "visualization": snapshot.graph,
        });
        return envelope(500, Some(data), Some(format!("internal fault: {}", fault)), started);
    }

    let data = CompileData::from_snapshot(&snapshot, submission.cached);
    let error = match snapshot.job.status {
        JobStatus::Succeeded => None,
        _ => Some(failure_summary(&data)),
    };
    envelope(200, Some(data), error, started)
}

/// One line naming the stage that stopped the job and its first error
fn failure_summary(data: &CompileData) -> String {
    let failed = data
        .stages
        .iter()
        .find(|s| !s.success && s.outcome != StageOutcome::NotRun);
    match failed {
        Some(stage) => {
            let first_error = stage
                .diagnostics
                .iter()
                .find(|d| d.is_error())
                .map(|d| d.message.as_str())
                .unwrap_or("no diagnostic reported");
            format!("{} {}: {}", stage.name, stage.outcome.as_str(), first_error)
        }
        None => format!("job {}", data.status),
    }
}

/// `GET /api/visualization?id=<job>[&stage=<name>]`
pub fn visualization(orchestrator: &Orchestrator, query: &Query) -> ApiReply {
    let started = Instant::now();
    let result = job_id(query)
        .and_then(|id| orchestrator.graph(&id))
        .and_then(|graph| match query.get("stage") {
            Some(stage) => graph
                .view(stage)
                .ok_or_else(|| HubError::NotFound(format!("stage {} did not run", stage))),
            None => Ok(graph),
        });
    match result {
        Ok(graph) => ok(graph, started),
        Err(e) => error_reply(&e, started),
    }
}

#[derive(Serialize)]
struct Explanation {
    title: &'static str,
    description: &'static str,
}

fn explain(phase: Phase) -> Explanation {
    match phase {
        Phase::Lex => Explanation {
            title: "Lexical Analysis",
            description: "Breaking source code into tokens: keywords, identifiers, literals and operators",
        },
        Phase::Parse => Explanation {
            title: "Syntax Analysis",
            description: "Building the syntax tree that represents the program's structure",
        },
        Phase::Check => Explanation {
            title: "Semantic Analysis",
            description: "Type checking and name resolution against the language rules",
        },
        Phase::Codegen => Explanation {
            title: "Code Generation",
            description: "Lowering the checked program to bytecode, IR or assembly",
        },
        Phase::Link => Explanation {
            title: "Linking",
            description: "Producing the final executable from generated code and libraries",
        },
        Phase::Execute => Explanation {
            title: "Execution",
            description: "Running the program under the sandbox budget and recording its steps",
        },
    }
}

/// `GET /api/step?id=<job>&step=<n>&action=next|prev|jump[&to=<n>]`
pub fn step(orchestrator: &Orchestrator, query: &Query) -> ApiReply {
    let started = Instant::now();
    let snapshot = match job_id(query).and_then(|id| orchestrator.snapshot(&id)) {
        Ok(snapshot) => snapshot,
        Err(e) => return error_reply(&e, started),
    };
    let ran: Vec<_> = snapshot.records.iter().filter(|r| r.outcome.ran()).collect();
    if ran.is_empty() {
        return error_reply(&HubError::NotFound("no stage of this job ran".to_string()), started);
    }

    let last = ran.len() - 1;
    let current = query.number("step").unwrap_or(0).min(last);
    let target = match query.get("action").unwrap_or("next") {
        "next" => (current + 1).min(last),
        "prev" => current.saturating_sub(1),
        "jump" => query.number("to").unwrap_or(current).min(last),
        other => {
            let error = HubError::Validation(format!("unknown step action {}", other));
            return error_reply(&error, started);
        }
    };

    let record = ran[target];
    let view = snapshot
        .graph
        .as_ref()
        .and_then(|graph| graph.view(&record.stage_name));
    let data = json!({
        "current_step": target,
        "total_steps": ran.len(),
        "stage": StageSummary::from(record),
        "explanation": explain(record.phase),
        "highlights": view.as_ref().map(|v| v.nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>()),
        "view": view,
    });
    ok(data, started)
}

/// `GET /api/download?id=<job>&format=json|dot|txt[&stage=<name>]`
pub fn download(orchestrator: &Orchestrator, query: &Query) -> ApiReply {
    let started = Instant::now();
    let format_name = query.get("format").unwrap_or("json");
    let Some(format) = ExportFormat::parse(format_name) else {
        let error = HubError::Validation(format!("unsupported download format {}", format_name));
        return error_reply(&error, started);
    };
    let graph = match job_id(query).and_then(|id| orchestrator.graph(&id)) {
        Ok(graph) => graph,
        Err(e) => return error_reply(&e, started),
    };
    let (graph, name) = match query.get("stage") {
        Some(stage) => match graph.view(stage) {
            Some(view) => (view, format!("{}_graph", stage)),
            None => {
                let error = HubError::NotFound(format!("stage {} did not run", stage));
                return error_reply(&error, started);
            }
        },
        None => (graph, "compilation_graph".to_string()),
    };

    let body = match format {
        ExportFormat::Json => serde_json::to_value(&graph).unwrap_or(Value::Null),
        other => Value::String(export::render(&graph, other)),
    };
    ApiReply {
        status: 200,
        content_type: format.content_type(),
        body,
        filename: Some(format!("{}.{}", name, format.extension())),
    }
}

/// `POST /api/cancel?id=<job>`
pub fn cancel(orchestrator: &Orchestrator, query: &Query) -> ApiReply {
    let started = Instant::now();
    match job_id(query).and_then(|id| orchestrator.cancel(&id).map(|c| (id, c))) {
        Ok((id, cancelled)) => ok(json!({ "job_id": id, "cancelled": cancelled }), started),
        Err(e) => error_reply(&e, started),
    }
}

/// `GET /api/job?id=<job>`: status and records without waiting
pub fn job(orchestrator: &Orchestrator, query: &Query) -> ApiReply {
    let started = Instant::now();
    match job_id(query).and_then(|id| orchestrator.snapshot(&id)) {
        Ok(snapshot) => ok(
            json!({
                "job_id": snapshot.job.id,
                "status": snapshot.job.status,
                "current_stage": snapshot.current_stage,
                "stages": snapshot.records.iter().map(StageSummary::from).collect::<Vec<_>>(),
            }),
            started,
        ),
        Err(e) => error_reply(&e, started),
    }
}
