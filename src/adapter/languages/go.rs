use crate::adapter::{
    CommandTemplate, LanguageBackend, OutputParser, OutputStream, StageCommand, StageSpec,
    TemplateVars,
};
use crate::config::types::{CompileOptions, Language, OptimizationLevel};
use crate::core::types::{Diagnostic, Phase};
use crate::frontend::Dialect;
use std::path::PathBuf;

/// Go: gofmt validates syntax (outline built from the source), go vet
/// type-checks, `go build -gcflags=-S` emits assembly.
#[derive(Debug, Clone)]
pub struct GoBackend {
    stages: Vec<StageSpec>,
    go_cache: Option<PathBuf>,
}

impl GoBackend {
    pub fn new(go_cache: Option<PathBuf>) -> Self {
        let stages = vec![
            StageSpec::new(
                "parse",
                Phase::Parse,
                StageCommand::Template(CommandTemplate::new(["{tool:gofmt}", "-e", "-l", "{source}"])),
                OutputParser::SourceOutline(Dialect::Go),
            ),
            StageSpec::new(
                "typecheck",
                Phase::Check,
                StageCommand::Template(CommandTemplate::new(["{tool:go}", "vet", "{source}"])),
                OutputParser::DiagnosticsOnly,
            ),
            StageSpec::new(
                "codegen",
                Phase::Codegen,
                StageCommand::Template(CommandTemplate::new([
                    "{tool:go}",
                    "build",
                    "{gcflags}",
                    "{ldflags}",
                    "-o",
                    "program",
                    "{source}",
                ])),
                OutputParser::GoAssembly,
            )
            .reading(OutputStream::Stderr),
        ];
        Self { stages, go_cache }
    }
}

impl LanguageBackend for GoBackend {
    fn language(&self) -> Language {
        Language::Go
    }

    fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    fn source_file_name(&self, _source: &str) -> String {
        "main.go".to_string()
    }

    fn environment(&self) -> Vec<(String, String)> {
        let cache = self
            .go_cache
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "{scratch}/.gocache".to_string());
        vec![
            ("GOCACHE".to_string(), cache),
            ("GOPATH".to_string(), "{scratch}/.gopath".to_string()),
            ("GOTOOLCHAIN".to_string(), "local".to_string()),
            ("CGO_ENABLED".to_string(), "0".to_string()),
            ("GOTELEMETRY".to_string(), "off".to_string()),
        ]
    }

    fn template_vars(&self, options: &CompileOptions) -> TemplateVars {
        let gcflags = match options.optimization {
            OptimizationLevel::O0 => "-gcflags=-S -N -l",
            _ => "-gcflags=-S",
        };
        let ldflags: Vec<&str> = if options.debug { Vec::new() } else { vec!["-ldflags=-w"] };
        TemplateVars::new()
            .with("gcflags", [gcflags])
            .with("ldflags", ldflags)
            .with("opt", Vec::<String>::new())
            .with("debug", Vec::<String>::new())
    }

    fn option_notes(&self, stage: &StageSpec, options: &CompileOptions) -> Vec<Diagnostic> {
        if stage.name != "codegen" {
            return Vec::new();
        }
        match options.optimization {
            OptimizationLevel::O2 | OptimizationLevel::O3 => vec![Diagnostic::info(format!(
                "the Go compiler has no {} level; default optimizations used",
                options.optimization
            ))],
            _ => Vec::new(),
        }
    }
}
