use crate::adapter::{
    CommandTemplate, LanguageBackend, OutputParser, StageCommand, StageSpec, TemplateVars,
};
use crate::config::types::{CompileOptions, Language, OptimizationLevel};
use crate::core::types::{Diagnostic, Phase};
use crate::frontend::compiled;
use crate::tools::source::{SourceLexer, SourceOutliner};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static PUBLIC_TYPE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*public\s+(?:(?:final|abstract|sealed|static|strictfp)\s+)*(?:class|interface|enum|record)\s+([A-Za-z_$][\w$]*)",
    )
    .ok()
});

/// Java: embedded lexer and outliner for the front end, javac for checking
/// and class generation, javap for bytecode.
#[derive(Debug, Clone)]
pub struct JavaBackend {
    stages: Vec<StageSpec>,
}

impl JavaBackend {
    pub fn new() -> Self {
        let front_args = || CommandTemplate::new(["--dialect", "java", "{source}"]);
        let stages = vec![
            StageSpec::new(
                "lex",
                Phase::Lex,
                StageCommand::Embedded {
                    program: Arc::new(SourceLexer),
                    args: front_args(),
                },
                OutputParser::Embedded,
            ),
            StageSpec::new(
                "parse",
                Phase::Parse,
                StageCommand::Embedded {
                    program: Arc::new(SourceOutliner),
                    args: front_args(),
                },
                OutputParser::Embedded,
            ),
            StageSpec::new(
                "typecheck",
                Phase::Check,
                StageCommand::Template(CommandTemplate::new([
                    "{tool:javac}",
                    "-J-XX:+UseSerialGC",
                    "-J-XX:TieredStopAtLevel=1",
                    "-encoding",
                    "UTF-8",
                    "-Xlint:all",
                    "{debug}",
                    "-d",
                    "classes",
                    "{source}",
                ])),
                OutputParser::DiagnosticsOnly,
            )
            .collecting("classes"),
            StageSpec::new(
                "bytecode",
                Phase::Codegen,
                StageCommand::Template(CommandTemplate::new([
                    "{tool:javap}",
                    "-J-XX:+UseSerialGC",
                    "-c",
                    "-p",
                    "{classes}",
                ])),
                OutputParser::Javap,
            )
            .non_blocking(),
        ];
        Self { stages }
    }
}

impl Default for JavaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageBackend for JavaBackend {
    fn language(&self) -> Language {
        Language::Java
    }

    fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// javac insists a public top-level type lives in `<Name>.java`
    fn source_file_name(&self, source: &str) -> String {
        let pattern = match compiled(&PUBLIC_TYPE, "java public type") {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                log::error!("{}; Java sources fall back to Main.java", e);
                None
            }
        };
        let name = pattern
            .and_then(|re| re.captures(source))
            .map(|caps| caps[1].to_string())
            .unwrap_or_else(|| "Main".to_string());
        format!("{}.java", name)
    }

    fn template_vars(&self, options: &CompileOptions) -> TemplateVars {
        TemplateVars::new()
            .with("opt", Vec::<String>::new())
            .with("debug", [if options.debug { "-g" } else { "-g:none" }])
    }

    fn option_notes(&self, stage: &StageSpec, options: &CompileOptions) -> Vec<Diagnostic> {
        if stage.name == "typecheck" && options.optimization != OptimizationLevel::O0 {
            return vec![Diagnostic::info(format!(
                "javac has no optimization levels; {} ignored",
                options.optimization
            ))];
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_file_follows_public_class() {
        let backend = JavaBackend::new();
        assert_eq!(
            backend.source_file_name("import java.util.*;\npublic final class Greeter {}\n"),
            "Greeter.java"
        );
        assert_eq!(backend.source_file_name("class Helper {}"), "Main.java");
        assert_eq!(
            backend.source_file_name("public sealed interface Shape permits Circle {}"),
            "Shape.java"
        );
        assert_eq!(
            backend.source_file_name("public record Point(int x, int y) {}"),
            "Point.java"
        );
    }

    #[test]
    fn test_public_type_pattern_compiles() {
        assert!(compiled(&PUBLIC_TYPE, "java public type").is_ok());
    }

    #[test]
    fn test_tools_and_notes() {
        let backend = JavaBackend::new();
        assert_eq!(backend.required_tools(), vec!["javac", "javap"]);
        let typecheck = &backend.stages()[2];
        let notes = backend.option_notes(
            typecheck,
            &CompileOptions::new(OptimizationLevel::O2, false),
        );
        assert_eq!(notes.len(), 1);
        assert!(backend
            .option_notes(typecheck, &CompileOptions::default())
            .is_empty());
    }
}
