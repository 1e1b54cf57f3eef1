use crate::adapter::{
    CommandTemplate, LanguageBackend, OutputParser, OutputStream, StageCommand, StageSpec,
    TemplateVars,
};
use crate::config::types::{CompileOptions, Language, OptimizationLevel};
use crate::core::types::{Diagnostic, Phase};

/// Swift through swiftc: parse dump, typecheck, SIL, native build
#[derive(Debug, Clone)]
pub struct SwiftBackend {
    stages: Vec<StageSpec>,
}

fn swiftc(args: &[&str]) -> StageCommand {
    let mut parts = vec!["{tool:swiftc}"];
    parts.extend_from_slice(args);
    parts.push("{source}");
    StageCommand::Template(CommandTemplate::new(parts))
}

impl SwiftBackend {
    pub fn new() -> Self {
        let stages = vec![
            StageSpec::new(
                "parse",
                Phase::Parse,
                swiftc(&["-dump-parse"]),
                OutputParser::SwiftDump,
            )
            .reading(OutputStream::Either),
            StageSpec::new(
                "typecheck",
                Phase::Check,
                swiftc(&["-typecheck"]),
                OutputParser::DiagnosticsOnly,
            ),
            StageSpec::new("sil", Phase::Codegen, swiftc(&["-emit-sil", "{opt}"]), OutputParser::Sil),
            StageSpec::new(
                "codegen",
                Phase::Link,
                swiftc(&["{opt}", "{debug}", "-o", "program"]),
                OutputParser::DiagnosticsOnly,
            )
            .non_blocking(),
        ];
        Self { stages }
    }
}

impl Default for SwiftBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageBackend for SwiftBackend {
    fn language(&self) -> Language {
        Language::Swift
    }

    fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    fn source_file_name(&self, _source: &str) -> String {
        "main.swift".to_string()
    }

    fn environment(&self) -> Vec<(String, String)> {
        vec![(
            "CLANG_MODULE_CACHE_PATH".to_string(),
            "{scratch}/.module-cache".to_string(),
        )]
    }

    fn template_vars(&self, options: &CompileOptions) -> TemplateVars {
        let opt = match options.optimization {
            OptimizationLevel::O0 => "-Onone",
            _ => "-O",
        };
        let debug: Vec<&str> = if options.debug { vec!["-g"] } else { Vec::new() };
        TemplateVars::new().with("opt", [opt]).with("debug", debug)
    }

    fn option_notes(&self, stage: &StageSpec, options: &CompileOptions) -> Vec<Diagnostic> {
        if stage.name != "sil" {
            return Vec::new();
        }
        match options.optimization {
            OptimizationLevel::O1 | OptimizationLevel::O3 => vec![Diagnostic::info(format!(
                "swiftc has a single optimizing mode; {} mapped to -O",
                options.optimization
            ))],
            _ => Vec::new(),
        }
    }
}
