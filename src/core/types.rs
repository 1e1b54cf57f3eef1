use crate::config::types::{CompileOptions, HubError, Language, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque job identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First segment of the id, used for thread names and log lines
    pub fn short(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which part of a backend's stage list a job runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    #[default]
    Compile,
    /// Lex and parse stages only
    Analyze,
}

impl JobMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JobMode::Compile => "compile",
            JobMode::Analyze => "analyze",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    PartiallyFailed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::PartiallyFailed
        )
    }

    /// Pending -> Running -> terminal. Pending may fail directly when a job
    /// is cancelled before its worker starts.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Running, terminal) => terminal.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::PartiallyFailed => "partially_failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compilation request tracked by the pipeline manager
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompileJob {
    pub id: JobId,
    pub language: Language,
    pub source_code: String,
    pub options: CompileOptions,
    pub mode: JobMode,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CompileJob {
    pub fn new(
        language: Language,
        source_code: String,
        options: CompileOptions,
        mode: JobMode,
    ) -> Self {
        Self {
            id: JobId::generate(),
            language,
            source_code,
            options,
            mode,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(HubError::Internal(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Map a compiler severity word; notes and remarks become info
    pub fn from_tool(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal error" | "fatal" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "note" | "remark" | "info" => Some(Severity::Info),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn at(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Coarse role of a stage inside a backend's pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lex,
    Parse,
    Check,
    Codegen,
    Link,
    Execute,
}

impl Phase {
    /// Phases run by analyze-mode jobs
    pub fn is_front_end(self) -> bool {
        matches!(self, Phase::Lex | Phase::Parse)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Lex => "lex",
            Phase::Parse => "parse",
            Phase::Check => "check",
            Phase::Codegen => "codegen",
            Phase::Link => "link",
            Phase::Execute => "execute",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    /// Tool reported failure (non-zero exit or error diagnostics)
    Failed,
    /// Forcibly terminated for CPU, memory or output limits
    LimitExceeded,
    /// Tool succeeded but its output could not be interpreted
    ParseFailure,
    TimedOut,
    Cancelled,
    ToolchainUnavailable,
    NotRun,
}

impl StageOutcome {
    pub fn is_success(self) -> bool {
        self == StageOutcome::Completed
    }

    /// Whether the stage reached the sandbox at all
    pub fn ran(self) -> bool {
        !matches!(
            self,
            StageOutcome::NotRun | StageOutcome::ToolchainUnavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageOutcome::Completed => "completed",
            StageOutcome::Failed => "failed",
            StageOutcome::LimitExceeded => "limit_exceeded",
            StageOutcome::ParseFailure => "parse_failure",
            StageOutcome::TimedOut => "timed_out",
            StageOutcome::Cancelled => "cancelled",
            StageOutcome::ToolchainUnavailable => "toolchain_unavailable",
            StageOutcome::NotRun => "not_run",
        }
    }
}

/// Which limits forced a sandboxed run to stop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceExceeded {
    pub cpu: bool,
    pub memory: bool,
    pub time: bool,
    pub output: bool,
}

impl ResourceExceeded {
    /// True when the run was terminated; output truncation alone is not fatal
    pub fn terminated(&self) -> bool {
        self.cpu || self.memory || self.time
    }

    pub fn any(&self) -> bool {
        self.terminated() || self.output
    }

    pub fn describe(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        if self.cpu {
            kinds.push("cpu");
        }
        if self.memory {
            kinds.push("memory");
        }
        if self.time {
            kinds.push("time");
        }
        if self.output {
            kinds.push("output");
        }
        kinds
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Keyword,
    Identifier,
    Literal,
    StringLiteral,
    Operator,
    Punctuation,
    Comment,
    Directive,
    Instruction,
    Unknown,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Keyword => "keyword",
            TokenKind::Identifier => "identifier",
            TokenKind::Literal => "literal",
            TokenKind::StringLiteral => "string_literal",
            TokenKind::Operator => "operator",
            TokenKind::Punctuation => "punctuation",
            TokenKind::Comment => "comment",
            TokenKind::Directive => "directive",
            TokenKind::Instruction => "instruction",
            TokenKind::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxNode {
    pub kind: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// Syntax tree stored as a flat arena; parents always precede children
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxTree {
    pub nodes: Vec<SyntaxNode>,
}

impl SyntaxTree {
    pub fn push(
        &mut self,
        kind: impl Into<String>,
        label: impl Into<String>,
        parent: Option<usize>,
    ) -> usize {
        self.nodes.push(SyntaxNode {
            kind: kind.into(),
            label: label.into(),
            parent,
            line: None,
            column: None,
        });
        self.nodes.len() - 1
    }

    pub fn push_at(
        &mut self,
        kind: impl Into<String>,
        label: impl Into<String>,
        parent: Option<usize>,
        line: Option<u32>,
        column: Option<u32>,
    ) -> usize {
        let index = self.push(kind, label, parent);
        self.nodes[index].line = line;
        self.nodes[index].column = column;
        index
    }

    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.parent == Some(index))
            .map(|(i, _)| i)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeUnitKind {
    /// Class or compilation unit grouping functions
    Module,
    Function,
    Block,
    Instruction,
    /// Callee referenced but not defined in the listing
    External,
}

impl CodeUnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CodeUnitKind::Module => "module",
            CodeUnitKind::Function => "function",
            CodeUnitKind::Block => "block",
            CodeUnitKind::Instruction => "instruction",
            CodeUnitKind::External => "external",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub kind: CodeUnitKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeEdgeKind {
    Flow,
    Branch,
    Call,
}

impl CodeEdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CodeEdgeKind::Flow => "flow",
            CodeEdgeKind::Branch => "branch",
            CodeEdgeKind::Call => "call",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeEdge {
    pub from: usize,
    pub to: usize,
    pub kind: CodeEdgeKind,
}

/// Bytecode, IR or assembly listing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeListing {
    pub units: Vec<CodeUnit>,
    pub edges: Vec<CodeEdge>,
}

impl CodeListing {
    pub fn push(&mut self, kind: CodeUnitKind, label: impl Into<String>, parent: Option<usize>) -> usize {
        self.units.push(CodeUnit {
            kind,
            label: label.into(),
            parent,
            line: None,
        });
        self.units.len() - 1
    }

    pub fn connect(&mut self, from: usize, to: usize, kind: CodeEdgeKind) {
        let edge = CodeEdge { from, to, kind };
        if from != to || kind != CodeEdgeKind::Flow {
            if !self.edges.contains(&edge) {
                self.edges.push(edge);
            }
        }
    }

    pub fn count(&self, kind: CodeUnitKind) -> usize {
        self.units.iter().filter(|unit| unit.kind == kind).count()
    }

    /// Find or create an external unit for an unresolved callee
    pub fn external(&mut self, name: &str) -> usize {
        if let Some(index) = self
            .units
            .iter()
            .position(|u| u.kind == CodeUnitKind::External && u.label == name)
        {
            return index;
        }
        self.push(CodeUnitKind::External, name, None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: u64,
    pub pc: usize,
    pub instruction: String,
    pub pointer: usize,
    pub cell: u8,
}

/// Record of an interpreted run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub steps: Vec<TraceStep>,
    pub output: String,
    pub executed_steps: u64,
    pub final_pointer: usize,
    pub tape_window: Vec<u8>,
    pub truncated: bool,
}

/// Structured result a backend extracted from one stage
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    #[default]
    None,
    Tokens(Vec<Token>),
    Tree(SyntaxTree),
    Code(CodeListing),
    Trace(ExecutionTrace),
}

impl StageOutput {
    pub fn is_none(&self) -> bool {
        matches!(self, StageOutput::None)
    }
}

/// Immutable result of one stage of one job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage_name: String,
    pub phase: Phase,
    pub blocking: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub raw_output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_log: String,
    pub diagnostics: Vec<Diagnostic>,
    pub success: bool,
    pub outcome: StageOutcome,
    #[serde(default)]
    pub resource_exceeded: ResourceExceeded,
    pub output: StageOutput,
}

impl StageRecord {
    /// Record for a stage that never reached the sandbox
    pub fn skipped(
        stage_name: &str,
        phase: Phase,
        blocking: bool,
        outcome: StageOutcome,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            phase,
            blocking,
            started_at: None,
            finished_at: None,
            raw_output: String::new(),
            tool_log: String::new(),
            diagnostics,
            success: false,
            outcome,
            resource_exceeded: ResourceExceeded::default(),
            output: StageOutput::None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::PartiallyFailed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Succeeded.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Succeeded));
    }

    #[test]
    fn test_job_transition_sets_timestamps() {
        let mut job = CompileJob::new(
            Language::C,
            "int main(void){return 0;}".into(),
            CompileOptions::default(),
            JobMode::Compile,
        );
        assert_eq!(job.status, JobStatus::Pending);
        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobStatus::Succeeded).unwrap();
        assert!(job.finished_at.is_some());
        assert!(job.transition(JobStatus::Running).is_err());
    }

    #[test]
    fn test_stage_output_serialization_is_tagged() {
        let output = StageOutput::Tokens(vec![Token::new(TokenKind::Keyword, "int").at(1, 1)]);
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["kind"], "tokens");
        assert_eq!(value["data"][0]["text"], "int");
    }

    #[test]
    fn test_code_listing_dedups_edges_and_externals() {
        let mut listing = CodeListing::default();
        let f = listing.push(CodeUnitKind::Function, "main", None);
        let a = listing.push(CodeUnitKind::Instruction, "call", Some(f));
        let ext = listing.external("printf");
        assert_eq!(listing.external("printf"), ext);
        listing.connect(a, ext, CodeEdgeKind::Call);
        listing.connect(a, ext, CodeEdgeKind::Call);
        assert_eq!(listing.edges.len(), 1);
        assert_eq!(listing.count(CodeUnitKind::External), 1);
    }

    #[test]
    fn test_resource_exceeded_output_is_not_termination() {
        let flags = ResourceExceeded {
            output: true,
            ..Default::default()
        };
        assert!(!flags.terminated());
        assert!(flags.any());
        assert_eq!(flags.describe(), vec!["output"]);
    }
}
