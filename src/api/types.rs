use crate::core::types::{
    Diagnostic, JobId, JobStatus, Phase, ResourceExceeded, StageOutcome, StageOutput, StageRecord,
};
use crate::graph::VisualizationGraph;
use crate::pipeline::JobSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/compile` and `POST /api/analyze`
#[derive(Clone, Debug, Deserialize)]
pub struct CompileBody {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub optimization: Option<String>,
    #[serde(default)]
    pub debug: Option<bool>,
    /// `false` forces a fresh run
    #[serde(default)]
    pub cache: Option<bool>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StageDiagnostic {
    pub stage: String,
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
}

/// Timeline entry for one stage
#[derive(Clone, Debug, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub phase: Phase,
    pub blocking: bool,
    pub outcome: StageOutcome,
    pub success: bool,
    pub duration_ms: u64,
    pub diagnostics: Vec<Diagnostic>,
    pub resource_exceeded: ResourceExceeded,
    pub raw_output: String,
}

impl From<&StageRecord> for StageSummary {
    fn from(record: &StageRecord) -> Self {
        Self {
            name: record.stage_name.clone(),
            phase: record.phase,
            blocking: record.blocking,
            outcome: record.outcome,
            success: record.success,
            duration_ms: record.duration_ms(),
            diagnostics: record.diagnostics.clone(),
            resource_exceeded: record.resource_exceeded,
            raw_output: record.raw_output.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CompileData {
    pub job_id: JobId,
    pub status: JobStatus,
    pub cached: bool,
    pub tokens: Value,
    pub ast: Value,
    pub bytecode: Value,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub trace: Value,
    pub diagnostics: Vec<StageDiagnostic>,
    pub stages: Vec<StageSummary>,
    pub visualization: VisualizationGraph,
}

impl CompileData {
    pub fn from_snapshot(snapshot: &JobSnapshot, cached: bool) -> Self {
        let first = |pick: fn(&StageOutput) -> bool| {
            snapshot
                .records
                .iter()
                .find(|r| pick(&r.output))
                .map(|r| output_data(&r.output))
                .unwrap_or(Value::Null)
        };
        // The last listing is the one closest to machine code
        let bytecode = snapshot
            .records
            .iter()
            .rev()
            .find(|r| matches!(r.output, StageOutput::Code(_)))
            .map(|r| output_data(&r.output))
            .unwrap_or(Value::Null);

        Self {
            job_id: snapshot.job.id.clone(),
            status: snapshot.job.status,
            cached,
            tokens: first(|o| matches!(o, StageOutput::Tokens(_))),
            ast: first(|o| matches!(o, StageOutput::Tree(_))),
            bytecode,
            trace: first(|o| matches!(o, StageOutput::Trace(_))),
            diagnostics: snapshot
                .records
                .iter()
                .flat_map(|r| {
                    r.diagnostics.iter().map(|d| StageDiagnostic {
                        stage: r.stage_name.clone(),
                        diagnostic: d.clone(),
                    })
                })
                .collect(),
            stages: snapshot.records.iter().map(StageSummary::from).collect(),
            visualization: snapshot.graph.clone().unwrap_or_default(),
        }
    }
}

fn output_data(output: &StageOutput) -> Value {
    let value = match output {
        StageOutput::None => return Value::Null,
        StageOutput::Tokens(tokens) => serde_json::to_value(tokens),
        StageOutput::Tree(tree) => serde_json::to_value(tree),
        StageOutput::Code(listing) => serde_json::to_value(listing),
        StageOutput::Trace(trace) => serde_json::to_value(trace),
    };
    value.unwrap_or(Value::Null)
}

/// `{success, data, execution_time, error}` envelope of every JSON reply
#[derive(Clone, Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub execution_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Seconds with two decimals, e.g. `1.24s`
pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

/// What `handle` hands back to the transport
#[derive(Clone, Debug, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Value,
    /// Suggested file name for downloads
    pub filename: Option<String>,
}

impl ApiReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
            filename: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Wire form: JSON bodies pretty-printed, text bodies verbatim
    pub fn render(&self) -> String {
        match &self.body {
            Value::String(text) if self.content_type != "application/json" => text.clone(),
            body => serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_defaults() {
        let body: CompileBody =
            serde_json::from_str(r#"{"language":"go","code":"package main"}"#).unwrap();
        assert!(body.optimization.is_none());
        assert!(body.debug.is_none());
        assert!(body.cache.is_none());
    }

    #[test]
    fn test_elapsed_format() {
        assert_eq!(format_elapsed(std::time::Duration::from_millis(1240)), "1.24s");
        assert_eq!(format_elapsed(std::time::Duration::ZERO), "0.00s");
    }

    #[test]
    fn test_text_reply_renders_verbatim() {
        let reply = ApiReply {
            status: 200,
            content_type: "text/plain",
            body: Value::String("== lex ==\n".into()),
            filename: None,
        };
        assert_eq!(reply.render(), "== lex ==\n");
        let reply = ApiReply::json(200, serde_json::json!({"success": true}));
        assert!(reply.render().contains("\"success\": true"));
    }
}
