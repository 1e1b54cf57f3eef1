use crate::adapter::{
    CommandTemplate, LanguageBackend, OutputParser, StageCommand, StageSpec, TemplateVars,
};
use crate::config::settings::BrainfuckSettings;
use crate::config::types::{CompileOptions, Language};
use crate::core::types::{Diagnostic, Phase};
use crate::sandbox::EmbeddedProgram;
use crate::tools::brainfuck::{BfInterpreter, BfLexer, BfOptimizer, BfParser};
use std::sync::Arc;

/// Brainfuck: every stage is an embedded tool, the last one runs the
/// program under the step budget and records a trace.
#[derive(Debug, Clone)]
pub struct BrainfuckBackend {
    stages: Vec<StageSpec>,
}

fn embedded(program: Arc<dyn EmbeddedProgram>, args: Vec<String>) -> StageCommand {
    StageCommand::Embedded {
        program,
        args: CommandTemplate::new(args),
    }
}

impl BrainfuckBackend {
    pub fn new(settings: &BrainfuckSettings) -> Self {
        let source = || vec!["{source}".to_string()];
        let leveled = || vec!["--level".to_string(), "{opt}".to_string(), "{source}".to_string()];
        let mut run_args = vec![
            "--tape".to_string(),
            settings.tape_cells.to_string(),
            "--max-steps".to_string(),
            settings.max_steps.to_string(),
            "--trace".to_string(),
            settings.trace_steps.to_string(),
        ];
        run_args.extend(leveled());

        let stages = vec![
            StageSpec::new("lex", Phase::Lex, embedded(Arc::new(BfLexer), source()), OutputParser::Embedded),
            StageSpec::new(
                "parse",
                Phase::Parse,
                embedded(Arc::new(BfParser), source()),
                OutputParser::Embedded,
            ),
            StageSpec::new(
                "optimize",
                Phase::Codegen,
                embedded(Arc::new(BfOptimizer), leveled()),
                OutputParser::Embedded,
            ),
            StageSpec::new(
                "execute",
                Phase::Execute,
                embedded(Arc::new(BfInterpreter), run_args),
                OutputParser::Embedded,
            )
            .non_blocking(),
        ];
        Self { stages }
    }
}

impl LanguageBackend for BrainfuckBackend {
    fn language(&self) -> Language {
        Language::Brainfuck
    }

    fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    fn source_file_name(&self, _source: &str) -> String {
        "program.bf".to_string()
    }

    fn template_vars(&self, options: &CompileOptions) -> TemplateVars {
        TemplateVars::new()
            .with("opt", [options.optimization.level().to_string()])
            .with("debug", Vec::<String>::new())
    }

    fn option_notes(&self, stage: &StageSpec, options: &CompileOptions) -> Vec<Diagnostic> {
        if stage.name == "optimize" && options.debug {
            return vec![Diagnostic::info("debug info has no meaning for brainfuck; ignored")];
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_needs_no_host_tools() {
        let backend = BrainfuckBackend::new(&BrainfuckSettings::default());
        assert!(backend.required_tools().is_empty());
        let names: Vec<_> = backend.stages().iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["lex", "parse", "optimize", "execute"]);
        assert_eq!(backend.stages()[3].phase, Phase::Execute);
    }

    #[test]
    fn test_run_arguments_carry_settings() {
        let settings = BrainfuckSettings {
            tape_cells: 100,
            max_steps: 5,
            trace_steps: 2,
        };
        let backend = BrainfuckBackend::new(&settings);
        let mut vars = backend.template_vars(&CompileOptions::default());
        vars.set("source", ["program.bf"]);
        let StageCommand::Embedded { args, .. } = &backend.stages()[3].command else {
            panic!("execute should be embedded");
        };
        let argv = args.expand(&vars).unwrap();
        assert_eq!(
            argv,
            vec!["--tape", "100", "--max-steps", "5", "--trace", "2", "--level", "0", "program.bf"]
        );
    }
}
