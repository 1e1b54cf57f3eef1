use crate::adapter::{
    CommandTemplate, LanguageBackend, OutputParser, OutputStream, StageCommand, StageSpec,
    TemplateVars,
};
use crate::config::types::{CompileOptions, Language};
use crate::core::types::Phase;

/// C and C++ through clang: token dump, AST dump, warnings pass, LLVM IR
/// and a final link.
#[derive(Debug, Clone)]
pub struct ClangBackend {
    language: Language,
    source_file: &'static str,
    stages: Vec<StageSpec>,
}

fn clang(tool: &str, std: &str, args: &[&str]) -> StageCommand {
    let mut parts = vec![format!("{{tool:{}}}", tool), std.to_string()];
    parts.extend(args.iter().map(|a| a.to_string()));
    parts.push("{source}".to_string());
    StageCommand::Template(CommandTemplate::new(parts))
}

impl ClangBackend {
    pub fn c() -> Self {
        Self::build(Language::C, "clang", "-std=c11", "main.c")
    }

    pub fn cpp() -> Self {
        Self::build(Language::Cpp, "clang++", "-std=c++17", "main.cpp")
    }

    fn build(language: Language, tool: &str, std: &str, source_file: &'static str) -> Self {
        let stages = vec![
            StageSpec::new(
                "lex",
                Phase::Lex,
                clang(
                    tool,
                    std,
                    &["-fsyntax-only", "-fno-color-diagnostics", "-Xclang", "-dump-tokens"],
                ),
                OutputParser::ClangTokens,
            )
            .reading(OutputStream::Stderr),
            StageSpec::new(
                "parse",
                Phase::Parse,
                clang(
                    tool,
                    std,
                    &["-fsyntax-only", "-fno-color-diagnostics", "-Xclang", "-ast-dump"],
                ),
                OutputParser::ClangAst,
            ),
            StageSpec::new(
                "typecheck",
                Phase::Check,
                clang(
                    tool,
                    std,
                    &["-fsyntax-only", "-fno-color-diagnostics", "-Wall", "-Wextra"],
                ),
                OutputParser::DiagnosticsOnly,
            ),
            StageSpec::new(
                "codegen",
                Phase::Codegen,
                clang(
                    tool,
                    std,
                    &[
                        "-fno-color-diagnostics",
                        "-S",
                        "-emit-llvm",
                        "{opt}",
                        "{debug}",
                        "-o",
                        "source.ll",
                    ],
                ),
                OutputParser::LlvmIr,
            )
            .reading(OutputStream::Artifact("source.ll"))
            .collecting("source.ll"),
            StageSpec::new(
                "link",
                Phase::Link,
                clang(
                    tool,
                    std,
                    &["-fno-color-diagnostics", "{opt}", "{debug}", "-o", "program"],
                ),
                OutputParser::DiagnosticsOnly,
            )
            .non_blocking(),
        ];
        Self {
            language,
            source_file,
            stages,
        }
    }
}

impl LanguageBackend for ClangBackend {
    fn language(&self) -> Language {
        self.language
    }

    fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    fn source_file_name(&self, _source: &str) -> String {
        self.source_file.to_string()
    }

    fn template_vars(&self, options: &CompileOptions) -> TemplateVars {
        let debug: Vec<&str> = if options.debug { vec!["-g"] } else { Vec::new() };
        TemplateVars::new()
            .with("opt", [format!("-{}", options.optimization.as_str())])
            .with("debug", debug)
    }
}
