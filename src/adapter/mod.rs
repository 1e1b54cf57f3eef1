//! Language backends.
//!
//! The pipeline stays language-agnostic. A backend declares its fixed stage
//! sequence (command template, output parser, blocking flag) and the
//! environment its toolchain needs; [`parse_stage_output`] turns any sandbox
//! result into a `StageRecord` without ever failing.

pub mod languages;
pub mod parse;
pub mod registry;
pub mod template;

pub use parse::parse_stage_output;
pub use registry::AdapterRegistry;
pub use template::{CommandTemplate, TemplateVars};

use crate::config::types::{CompileOptions, Language, Result};
use crate::core::types::{Diagnostic, Phase};
use crate::frontend::Dialect;
use crate::sandbox::{EmbeddedProgram, SandboxProgram};
use std::fmt;
use std::sync::Arc;

/// How a stage is run
#[derive(Clone)]
pub enum StageCommand {
    /// External toolchain invocation
    Template(CommandTemplate),
    /// In-process tool; `args` are expanded like an external command line
    Embedded {
        program: Arc<dyn EmbeddedProgram>,
        args: CommandTemplate,
    },
}

impl StageCommand {
    pub fn tools(&self) -> Vec<&str> {
        match self {
            StageCommand::Template(template) => template.tools(),
            StageCommand::Embedded { .. } => Vec::new(),
        }
    }

    pub fn to_program(&self, vars: &TemplateVars) -> Result<SandboxProgram> {
        match self {
            StageCommand::Template(template) => Ok(SandboxProgram::External {
                argv: template.expand(vars)?,
            }),
            StageCommand::Embedded { program, args } => Ok(SandboxProgram::Embedded {
                program: Arc::clone(program),
                args: args.expand(vars)?,
            }),
        }
    }
}

impl fmt::Debug for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageCommand::Template(template) => write!(f, "Template({:?})", template.parts()),
            StageCommand::Embedded { program, args } => {
                write!(f, "Embedded({}, {:?})", program.name(), args.parts())
            }
        }
    }
}

/// Interpretation applied to a stage's raw output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputParser {
    /// Only diagnostics matter
    DiagnosticsOnly,
    ClangTokens,
    ClangAst,
    LlvmIr,
    Sil,
    Javap,
    GoAssembly,
    SwiftDump,
    /// Outline the submitted source itself; the tool only validates it
    SourceOutline(Dialect),
    /// JSON report written by an embedded tool
    Embedded,
}

/// Where the parser reads from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
    /// stdout, or stderr when stdout is blank
    Either,
    /// A file collected from the scratch directory
    Artifact(&'static str),
}

#[derive(Clone, Debug)]
pub struct StageSpec {
    pub name: &'static str,
    pub phase: Phase,
    /// A failed blocking stage fails the job
    pub blocking: bool,
    pub command: StageCommand,
    pub parser: OutputParser,
    pub stream: OutputStream,
    /// Scratch-relative paths read back after the run and handed to later stages
    pub collect: Vec<&'static str>,
}

impl StageSpec {
    pub fn new(name: &'static str, phase: Phase, command: StageCommand, parser: OutputParser) -> Self {
        Self {
            name,
            phase,
            blocking: true,
            command,
            parser,
            stream: OutputStream::Stdout,
            collect: Vec::new(),
        }
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn reading(mut self, stream: OutputStream) -> Self {
        self.stream = stream;
        self
    }

    pub fn collecting(mut self, path: &'static str) -> Self {
        self.collect.push(path);
        self
    }
}

/// Per-job facts a stage needs to build its command and parse its output
#[derive(Clone, Debug)]
pub struct StageContext {
    pub language: Language,
    pub source: String,
    pub source_file: String,
    pub options: CompileOptions,
    pub vars: TemplateVars,
}

impl StageContext {
    /// Template variables for one stage: backend vars plus `{source}` and
    /// `{classes}` (compiled classes among the artifacts handed to the stage)
    pub fn stage_vars(&self, artifacts: &[String]) -> TemplateVars {
        let mut vars = self.vars.clone();
        vars.set("source", [self.source_file.clone()]);
        let mut classes: Vec<String> = artifacts
            .iter()
            .filter(|path| path.ends_with(".class"))
            .cloned()
            .collect();
        classes.sort();
        vars.set("classes", classes);
        vars
    }
}

/// One supported language
pub trait LanguageBackend: Send + Sync {
    fn language(&self) -> Language;

    /// Fixed stage sequence, in execution order
    fn stages(&self) -> &[StageSpec];

    /// Executables any stage may invoke
    fn required_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for stage in self.stages() {
            for tool in stage.command.tools() {
                if !tools.iter().any(|t| t == tool) {
                    tools.push(tool.to_string());
                }
            }
        }
        tools
    }

    /// File name the source is written to inside the scratch directory
    fn source_file_name(&self, source: &str) -> String;

    /// Extra child environment; values may contain `{scratch}`
    fn environment(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// `{opt}`, `{debug}` and any backend-specific placeholders
    fn template_vars(&self, options: &CompileOptions) -> TemplateVars;

    /// Info diagnostics for options this stage ignores or approximates
    fn option_notes(&self, _stage: &StageSpec, _options: &CompileOptions) -> Vec<Diagnostic> {
        Vec::new()
    }
}
