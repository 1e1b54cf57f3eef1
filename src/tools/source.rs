/// Generic source front end: `--dialect <name> <file>`
use crate::core::types::{Diagnostic, StageOutput};
use crate::frontend::{outline, tokenize, Dialect};
use crate::sandbox::{Abort, EmbeddedContext, EmbeddedProgram};
use crate::tools::{read_source, EmbeddedReport};
use std::io::Write;

/// Rough per-token footprint charged against the memory budget
const TOKEN_COST: u64 = 96;

fn dialect(ctx: &mut EmbeddedContext<'_>) -> Option<Dialect> {
    let name = ctx.flag_value("--dialect").unwrap_or("c").to_string();
    let found = Dialect::parse(&name);
    if found.is_none() {
        let _ = writeln!(ctx.stderr(), "unknown dialect: {}", name);
    }
    found
}

fn exit_code(diagnostics: &[Diagnostic]) -> i32 {
    if diagnostics.iter().any(Diagnostic::is_error) {
        1
    } else {
        0
    }
}

/// Emits the token stream
pub struct SourceLexer;

impl EmbeddedProgram for SourceLexer {
    fn name(&self) -> &str {
        "lexer"
    }

    fn run(&self, ctx: &mut EmbeddedContext<'_>) -> Result<i32, Abort> {
        let Some(dialect) = dialect(ctx) else {
            return Ok(2);
        };
        let Some(source) = read_source(ctx) else {
            return Ok(2);
        };
        let lexed = tokenize(&source, dialect);
        ctx.charge_memory(lexed.tokens.len() as u64 * TOKEN_COST)?;
        ctx.check_budgets()?;

        let code = exit_code(&lexed.errors);
        EmbeddedReport::new(StageOutput::Tokens(lexed.tokens), lexed.errors).emit(ctx);
        Ok(code)
    }
}

/// Emits the declaration/statement outline
pub struct SourceOutliner;

impl EmbeddedProgram for SourceOutliner {
    fn name(&self) -> &str {
        "outliner"
    }

    fn run(&self, ctx: &mut EmbeddedContext<'_>) -> Result<i32, Abort> {
        let Some(dialect) = dialect(ctx) else {
            return Ok(2);
        };
        let root = ctx
            .positional()
            .first()
            .map(|p| p.to_string())
            .unwrap_or_default();
        let Some(source) = read_source(ctx) else {
            return Ok(2);
        };
        let lexed = tokenize(&source, dialect);
        ctx.charge_memory(lexed.tokens.len() as u64 * TOKEN_COST * 2)?;
        ctx.check_budgets()?;

        let shape = outline(&lexed.tokens, dialect, &root);
        // lexical errors already failed the lex stage
        let code = exit_code(&shape.errors);
        EmbeddedReport::new(StageOutput::Tree(shape.tree), shape.errors).emit(ctx);
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::inprocess::run_embedded;
    use crate::sandbox::types::{InputFile, SandboxLimits, SandboxProgram, SandboxRequest};
    use crate::sandbox::workspace::ScratchDir;
    use crate::sandbox::CancelToken;
    use std::sync::Arc;

    fn run(program: Arc<dyn EmbeddedProgram>, source: &str) -> (i32, EmbeddedReport) {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(root.path()).unwrap();
        scratch
            .materialize(&[InputFile::new("Main.java", source.as_bytes().to_vec())])
            .unwrap();
        let args: Vec<String> = vec!["--dialect".into(), "java".into(), "Main.java".into()];
        let request = SandboxRequest::new(
            SandboxProgram::Embedded {
                program: program.clone(),
                args: args.clone(),
            },
            SandboxLimits::default(),
        );
        let result = run_embedded(program.as_ref(), &args, &request, &scratch, &CancelToken::new());
        let report = EmbeddedReport::decode(&result.stdout).unwrap();
        (result.exit_code.unwrap(), report)
    }

    #[test]
    fn test_lexer_reports_tokens() {
        let (code, report) = run(Arc::new(SourceLexer), "class Main { int x = 1; }");
        assert_eq!(code, 0);
        match report.output {
            StageOutput::Tokens(tokens) => {
                assert_eq!(tokens[0].text, "class");
                assert_eq!(tokens.len(), 9);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_outliner_fails_on_unbalanced_source() {
        let (code, report) = run(Arc::new(SourceOutliner), "class Main { void f() {");
        assert_eq!(code, 1);
        assert!(report.has_errors());
        match report.output {
            StageOutput::Tree(tree) => assert_eq!(tree.nodes[0].label, "Main.java"),
            other => panic!("unexpected output {:?}", other),
        }
    }
}
