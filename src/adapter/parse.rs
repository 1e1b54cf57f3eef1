//! Sandbox result -> StageRecord
//!
//! Total by construction: limit breaches, cancellation, tool failures and
//! unreadable output all become outcomes with diagnostics.

use crate::adapter::{OutputParser, OutputStream, StageContext, StageSpec};
use crate::core::types::{Diagnostic, StageOutcome, StageOutput, StageRecord};
use crate::frontend::clang_dump::{parse_ast, parse_tokens};
use crate::frontend::diagnostics::scrape;
use crate::frontend::go_asm::parse_go_asm;
use crate::frontend::ir_listing::{parse_listing, IrFlavor};
use crate::frontend::javap::parse_javap;
use crate::frontend::sexpr::parse_dump;
use crate::frontend::{outline, tokenize};
use crate::sandbox::SandboxResult;
use crate::tools::EmbeddedReport;
use chrono::Utc;

/// Interpret one stage's sandbox result.
///
/// `notes` are the backend's option notes for this stage and are appended
/// to whatever the tool reported.
pub fn parse_stage_output(
    spec: &StageSpec,
    ctx: &StageContext,
    result: &SandboxResult,
    notes: Vec<Diagnostic>,
) -> StageRecord {
    let finished_at = Utc::now();
    let started_at = finished_at - chrono::Duration::milliseconds(result.wall_time_ms as i64);

    let (raw_output, tool_log) = select_stream(spec.stream, result);
    let exited_ok = result.exit_code == Some(0) && result.signal.is_none();

    let mut diagnostics = scrape(&result.stderr, &ctx.source_file, !exited_ok);
    if spec.parser == OutputParser::DiagnosticsOnly {
        diagnostics.extend(scrape(&result.stdout, &ctx.source_file, !exited_ok));
    }

    let mut output = StageOutput::None;
    let outcome = if result.cancelled {
        keep_partial(spec, ctx, &raw_output, &mut output, &mut diagnostics);
        diagnostics.push(Diagnostic::error(format!(
            "stage {} cancelled by caller",
            spec.name
        )));
        StageOutcome::Cancelled
    } else if result.resource_exceeded.time {
        keep_partial(spec, ctx, &raw_output, &mut output, &mut diagnostics);
        diagnostics.push(Diagnostic::error(format!(
            "stage {} timed out after {} ms",
            spec.name, result.wall_time_ms
        )));
        StageOutcome::TimedOut
    } else if result.resource_exceeded.cpu || result.resource_exceeded.memory {
        keep_partial(spec, ctx, &raw_output, &mut output, &mut diagnostics);
        let mut kinds = Vec::new();
        if result.resource_exceeded.cpu {
            kinds.push("cpu");
        }
        if result.resource_exceeded.memory {
            kinds.push("memory");
        }
        diagnostics.push(Diagnostic::error(format!(
            "stage {} terminated: {} limit exceeded",
            spec.name,
            kinds.join(" and ")
        )));
        StageOutcome::LimitExceeded
    } else if !exited_ok {
        keep_partial(spec, ctx, &raw_output, &mut output, &mut diagnostics);
        if !diagnostics.iter().any(Diagnostic::is_error) {
            let message = match (result.exit_code, result.signal) {
                (_, Some(signal)) => format!("{} killed by signal {}", spec.name, signal),
                (Some(code), None) => format!("{} exited with status {}", spec.name, code),
                (None, None) => format!("{} did not report an exit status", spec.name),
            };
            diagnostics.push(Diagnostic::error(message));
        }
        StageOutcome::Failed
    } else {
        match interpret(spec.parser, ctx, &raw_output) {
            Ok((parsed, reported)) => {
                output = parsed;
                diagnostics.extend(reported);
                if diagnostics.iter().any(Diagnostic::is_error)
                    && spec.parser == OutputParser::Embedded
                {
                    StageOutcome::Failed
                } else {
                    StageOutcome::Completed
                }
            }
            Err(reason) => {
                diagnostics.push(Diagnostic::error(format!(
                    "could not interpret {} output: {}",
                    spec.name, reason
                )));
                StageOutcome::ParseFailure
            }
        }
    };

    if result.resource_exceeded.output {
        diagnostics.push(Diagnostic::warning(format!(
            "output truncated at {} bytes",
            raw_output.len().max(result.stderr.len())
        )));
    }
    diagnostics.extend(notes);

    StageRecord {
        stage_name: spec.name.to_string(),
        phase: spec.phase,
        blocking: spec.blocking,
        started_at: Some(started_at),
        finished_at: Some(finished_at),
        raw_output,
        tool_log,
        diagnostics,
        success: outcome.is_success(),
        outcome,
        resource_exceeded: result.resource_exceeded,
        output,
    }
}

fn select_stream(stream: OutputStream, result: &SandboxResult) -> (String, String) {
    match stream {
        OutputStream::Stdout => (result.stdout.clone(), result.stderr.clone()),
        OutputStream::Stderr => (result.stderr.clone(), result.stdout.clone()),
        OutputStream::Either => {
            if result.stdout.trim().is_empty() {
                (result.stderr.clone(), String::new())
            } else {
                (result.stdout.clone(), result.stderr.clone())
            }
        }
        OutputStream::Artifact(path) => {
            let text = result.artifact(path).map(|a| a.text()).unwrap_or_default();
            let mut log = result.stderr.clone();
            if !result.stdout.is_empty() {
                if !log.is_empty() {
                    log.push('\n');
                }
                log.push_str(&result.stdout);
            }
            (text, log)
        }
    }
}

/// Failed tools often still print usable structure (clang keeps dumping the
/// AST after errors, embedded tools write their report before exiting).
fn keep_partial(
    spec: &StageSpec,
    ctx: &StageContext,
    raw: &str,
    output: &mut StageOutput,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if raw.trim().is_empty() || spec.parser == OutputParser::DiagnosticsOnly {
        return;
    }
    if let Ok((parsed, reported)) = interpret(spec.parser, ctx, raw) {
        *output = parsed;
        for diagnostic in reported {
            if !diagnostics.contains(&diagnostic) {
                diagnostics.push(diagnostic);
            }
        }
    }
}

fn interpret(
    parser: OutputParser,
    ctx: &StageContext,
    raw: &str,
) -> Result<(StageOutput, Vec<Diagnostic>), String> {
    let file = ctx.source_file.as_str();
    let output = match parser {
        OutputParser::DiagnosticsOnly => StageOutput::None,
        OutputParser::ClangTokens => StageOutput::Tokens(parse_tokens(raw, file)?),
        OutputParser::ClangAst => StageOutput::Tree(parse_ast(raw, file)?),
        OutputParser::LlvmIr => StageOutput::Code(parse_listing(raw, IrFlavor::Llvm)?),
        OutputParser::Sil => StageOutput::Code(parse_listing(raw, IrFlavor::Sil)?),
        OutputParser::Javap => StageOutput::Code(parse_javap(raw)?),
        OutputParser::GoAssembly => StageOutput::Code(parse_go_asm(raw, file)?),
        OutputParser::SwiftDump => StageOutput::Tree(parse_dump(raw)?),
        OutputParser::SourceOutline(dialect) => {
            let lexed = tokenize(&ctx.source, dialect);
            StageOutput::Tree(outline(&lexed.tokens, dialect, file).tree)
        }
        OutputParser::Embedded => {
            let report = EmbeddedReport::decode(raw)?;
            return Ok((report.output, report.diagnostics));
        }
    };
    Ok((output, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{CommandTemplate, StageCommand, TemplateVars};
    use crate::config::types::{CompileOptions, Language};
    use crate::core::types::{Phase, ResourceExceeded, Severity};
    use crate::sandbox::{Artifact, ExecutionStatus, OutputIntegrity};
    use std::path::PathBuf;

    fn ctx() -> StageContext {
        StageContext {
            language: Language::C,
            source: "int main(void) { return 0; }\n".to_string(),
            source_file: "main.c".to_string(),
            options: CompileOptions::default(),
            vars: TemplateVars::new(),
        }
    }

    fn spec(parser: OutputParser) -> StageSpec {
        StageSpec::new(
            "codegen",
            Phase::Codegen,
            StageCommand::Template(CommandTemplate::new(["{tool:clang}"])),
            parser,
        )
    }

    fn result(exit_code: Option<i32>, stdout: &str, stderr: &str) -> SandboxResult {
        let exceeded = ResourceExceeded::default();
        SandboxResult {
            status: SandboxResult::classify(exit_code, None, &exceeded, false),
            exit_code,
            signal: None,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            stdout_integrity: OutputIntegrity::Complete,
            stderr_integrity: OutputIntegrity::Complete,
            wall_time_ms: 12,
            cpu_time_ms: 5,
            memory_peak_bytes: 0,
            resource_exceeded: exceeded,
            cancelled: false,
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_successful_stage_with_artifact() {
        let mut res = result(Some(0), "", "");
        res.artifacts.push(Artifact {
            path: PathBuf::from("source.ll"),
            contents: b"source_filename = \"main.c\"\ndefine i32 @main() {\nentry:\n  ret i32 0\n}\n".to_vec(),
        });
        let spec = spec(OutputParser::LlvmIr).reading(OutputStream::Artifact("source.ll"));
        let record = parse_stage_output(&spec, &ctx(), &res, Vec::new());
        assert_eq!(record.outcome, StageOutcome::Completed);
        assert!(record.success);
        assert!(matches!(record.output, StageOutput::Code(_)));
        assert!(record.raw_output.contains("define i32 @main"));
        assert!(record.started_at <= record.finished_at);
    }

    #[test]
    fn test_unreadable_output_is_a_parse_failure() {
        let record = parse_stage_output(
            &spec(OutputParser::Javap),
            &ctx(),
            &result(Some(0), "garbage", ""),
            Vec::new(),
        );
        assert_eq!(record.outcome, StageOutcome::ParseFailure);
        assert!(!record.success);
        assert!(record.has_errors());
    }

    #[test]
    fn test_failed_tool_keeps_scraped_positions() {
        let record = parse_stage_output(
            &spec(OutputParser::DiagnosticsOnly),
            &ctx(),
            &result(Some(1), "", "main.c:2:3: error: expected ';'\n"),
            Vec::new(),
        );
        assert_eq!(record.outcome, StageOutcome::Failed);
        assert_eq!(record.diagnostics.len(), 1);
        assert_eq!(record.diagnostics[0].line, Some(2));
        assert_eq!(record.diagnostics[0].column, Some(3));
    }

    #[test]
    fn test_silent_failure_gets_generic_error() {
        let record = parse_stage_output(
            &spec(OutputParser::DiagnosticsOnly),
            &ctx(),
            &result(Some(3), "", ""),
            Vec::new(),
        );
        assert_eq!(record.outcome, StageOutcome::Failed);
        assert_eq!(record.diagnostics[0].message, "codegen exited with status 3");
        assert_eq!(record.diagnostics[0].line, None);
    }

    #[test]
    fn test_limits_and_cancellation() {
        let mut timed = result(None, "", "");
        timed.signal = Some(libc::SIGKILL);
        timed.resource_exceeded.time = true;
        timed.status = ExecutionStatus::TimeLimit;
        let record = parse_stage_output(&spec(OutputParser::DiagnosticsOnly), &ctx(), &timed, Vec::new());
        assert_eq!(record.outcome, StageOutcome::TimedOut);
        assert!(record.resource_exceeded.time);

        let mut memory = timed.clone();
        memory.resource_exceeded = ResourceExceeded {
            memory: true,
            ..Default::default()
        };
        let record = parse_stage_output(&spec(OutputParser::DiagnosticsOnly), &ctx(), &memory, Vec::new());
        assert_eq!(record.outcome, StageOutcome::LimitExceeded);
        assert!(record.diagnostics[0].message.contains("memory"));

        let mut cancelled = timed;
        cancelled.cancelled = true;
        let record = parse_stage_output(&spec(OutputParser::DiagnosticsOnly), &ctx(), &cancelled, Vec::new());
        assert_eq!(record.outcome, StageOutcome::Cancelled);
    }

    #[test]
    fn test_notes_and_truncation_are_appended() {
        let mut res = result(Some(0), "", "");
        res.resource_exceeded.output = true;
        let record = parse_stage_output(
            &spec(OutputParser::DiagnosticsOnly),
            &ctx(),
            &res,
            vec![Diagnostic::info("optimization level ignored")],
        );
        assert_eq!(record.outcome, StageOutcome::Completed);
        assert_eq!(record.diagnostics.len(), 2);
        assert_eq!(record.diagnostics[0].severity, Severity::Warning);
        assert_eq!(record.diagnostics[1].severity, Severity::Info);
    }

    #[test]
    fn test_source_outline_parser_reads_the_submission() {
        let record = parse_stage_output(
            &spec(OutputParser::SourceOutline(crate::frontend::Dialect::C)),
            &ctx(),
            &result(Some(0), "", ""),
            Vec::new(),
        );
        match record.output {
            StageOutput::Tree(tree) => {
                assert_eq!(tree.nodes[0].label, "main.c");
                assert!(tree.nodes.iter().any(|n| n.kind == "function"));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }
}
