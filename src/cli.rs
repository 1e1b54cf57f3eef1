use crate::api::Api;
use crate::config::settings::EngineConfig;
use crate::config::types::{CompileOptions, Language, OptimizationLevel};
use crate::config::validator;
use crate::core::types::{JobMode, JobStatus, StageOutput};
use crate::graph::export::{self, ExportFormat};
use crate::observability::metrics::get_metrics;
use crate::pipeline::{selected_stages, CompileRequest, JobSnapshot, Orchestrator};
use crate::sandbox::{workspace, ToolLocator};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (JSON); defaults to ./compilebox.json when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage of a language pipeline and print the result
    Compile(SourceArgs),
    /// Run only the lexing and parsing stages
    Analyze(SourceArgs),
    /// Send one request through the JSON API and print the reply
    Api {
        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
        /// Route with query string, e.g. /api/visualization?id=...
        #[arg(long)]
        path: String,
        /// Request body; `@file` reads it from a file
        #[arg(long, default_value = "")]
        body: String,
    },
    /// List supported languages with their stages and toolchain availability
    Languages,
    /// Check if all language toolchains are installed
    CheckDeps {
        /// Verbose output showing detailed version information
        #[arg(long)]
        verbose: bool,
    },
    /// Remove scratch directories left behind by crashed runs
    Cleanup {
        /// Minimum age in seconds of a directory to remove
        #[arg(long, default_value_t = 3600)]
        older_than: u64,
    },
    /// Print process metrics in Prometheus text format
    Metrics,
}

#[derive(Args)]
struct SourceArgs {
    /// Source language (java, cpp, c, swift, brainfuck, go)
    #[arg(long, short = 'l')]
    language: String,
    /// Source code
    #[arg(long, conflicts_with = "file")]
    code: Option<String>,
    /// Source file
    #[arg(long)]
    file: Option<PathBuf>,
    /// Optimization level (O0, O1, O2, O3)
    #[arg(long)]
    optimization: Option<String>,
    /// Build with debug information
    #[arg(long)]
    debug: bool,
    /// Always run, even when an identical job is cached
    #[arg(long)]
    no_cache: bool,
    /// Output format (json, dot, text)
    #[arg(long, default_value = "json")]
    format: String,
}

impl SourceArgs {
    fn into_request(self, mode: JobMode) -> Result<(CompileRequest, ExportFormat)> {
        let format = ExportFormat::parse(&self.format)
            .ok_or_else(|| anyhow::anyhow!("unsupported output format: {}", self.format))?;
        let source = match (self.code, self.file) {
            (Some(code), _) => code,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read source file {}", path.display()))?,
            (None, None) => anyhow::bail!("either --code or --file is required"),
        };
        let language = Language::parse(&self.language)?;
        let optimization = match self.optimization.as_deref() {
            Some(level) => OptimizationLevel::parse(level)?,
            None => OptimizationLevel::default(),
        };
        let mut request = CompileRequest::new(language, source)
            .with_options(CompileOptions::new(optimization, self.debug))
            .with_mode(mode);
        if self.no_cache {
            request = request.without_cache();
        }
        Ok((request, format))
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())
        .context("failed to load engine configuration")?;
    validator::validate_and_report(&config)?;

    match cli.command {
        Commands::Compile(args) => run_job(config, args, JobMode::Compile),
        Commands::Analyze(args) => run_job(config, args, JobMode::Analyze),
        Commands::Api { method, path, body } => run_api(config, &method, &path, &body),
        Commands::Languages => list_languages(&config),
        Commands::CheckDeps { verbose } => check_language_dependencies(&config, verbose),
        Commands::Cleanup { older_than } => {
            let root = &config.sandbox.scratch_root;
            let removed = workspace::sweep_stale(root, Duration::from_secs(older_than))?;
            println!("Removed {} stale scratch directories under {}", removed, root.display());
            Ok(())
        }
        Commands::Metrics => {
            print!("{}", get_metrics().export_prometheus());
            Ok(())
        }
    }
}

fn run_job(config: EngineConfig, args: SourceArgs, mode: JobMode) -> Result<()> {
    let (request, format) = args.into_request(mode)?;
    let orchestrator = Orchestrator::new(config)?;
    let report = orchestrator.isolation_report();
    if report.is_degraded() {
        log::warn!("sandbox running without: {}", report.missing.join(", "));
    }

    let (submission, snapshot) = orchestrator.run(request)?;
    match format {
        ExportFormat::Json => {
            let data = crate::api::CompileData::from_snapshot(&snapshot, submission.cached);
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        ExportFormat::Text => print_summary(&snapshot),
        other => {
            let graph = snapshot.graph.clone().unwrap_or_default();
            print!("{}", export::render(&graph, other));
        }
    }

    if let Some(fault) = &snapshot.fault {
        anyhow::bail!("job {} hit an internal fault: {}", snapshot.job.id, fault);
    }
    if snapshot.status() != JobStatus::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(snapshot: &JobSnapshot) {
    println!("job {} [{}] {}", snapshot.job.id, snapshot.job.language, snapshot.status());
    for record in &snapshot.records {
        let detail = match &record.output {
            StageOutput::None => String::new(),
            StageOutput::Tokens(tokens) => format!(" ({} tokens)", tokens.len()),
            StageOutput::Tree(tree) => format!(" ({} nodes)", tree.len()),
            StageOutput::Code(listing) => format!(" ({} units)", listing.units.len()),
            StageOutput::Trace(trace) => format!(" ({} steps)", trace.steps.len()),
        };
        println!(
            "  {:<12} {:<22} {:>6}ms{}",
            record.stage_name,
            record.outcome.as_str(),
            record.duration_ms(),
            detail
        );
        for diagnostic in &record.diagnostics {
            let location = match (diagnostic.line, diagnostic.column) {
                (Some(line), Some(column)) => format!("{}:{}: ", line, column),
                (Some(line), None) => format!("{}: ", line),
                _ => String::new(),
            };
            println!("    {}{}: {}", location, diagnostic.severity.as_str(), diagnostic.message);
        }
    }
    if let Some(graph) = &snapshot.graph {
        println!();
        print!("{}", export::render(graph, ExportFormat::Text));
    }
}

fn run_api(config: EngineConfig, method: &str, path: &str, body: &str) -> Result<()> {
    let body = match body.strip_prefix('@') {
        Some(file) => std::fs::read_to_string(file)
            .with_context(|| format!("failed to read request body from {}", file))?,
        None => body.to_string(),
    };
    let api = Api::new(Orchestrator::new(config)?);
    let reply = api.handle(method, path, &body);

    eprintln!("HTTP {} {}", reply.status, reply.content_type);
    if let Some(name) = &reply.filename {
        eprintln!("Content-Disposition: attachment; filename=\"{}\"", name);
    }
    println!("{}", reply.render());
    if !reply.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn list_languages(config: &EngineConfig) -> Result<()> {
    let orchestrator = Orchestrator::new(config.clone())?;
    let locator = orchestrator.locator();
    for language in orchestrator.registry().languages() {
        let backend = orchestrator.registry().get(language)?;
        let tools = backend.required_tools();
        let missing: Vec<&String> = tools.iter().filter(|t| !locator.is_available(t)).collect();
        let availability = match (tools.is_empty(), missing.is_empty()) {
            (true, _) => "embedded".to_string(),
            (false, true) => "available".to_string(),
            (false, false) => format!(
                "missing {}",
                missing.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
            ),
        };
        println!("{} ({})", language, availability);

        let front_end = selected_stages(backend.as_ref(), JobMode::Analyze);
        for stage in backend.stages() {
            let analyze = front_end.iter().any(|s| s.name == stage.name);
            println!(
                "  {:<12} {:<8} {}{}",
                stage.name,
                stage.phase.as_str(),
                if stage.blocking { "blocking" } else { "optional" },
                if analyze { "  [analyze]" } else { "" }
            );
        }
    }
    Ok(())
}

/// Argument that makes a tool print its version
fn version_flag(tool: &str) -> &'static str {
    match tool {
        "go" => "version",
        "java" | "javac" | "javap" => "-version",
        _ => "--version",
    }
}

fn tool_version(locator: &ToolLocator, tool: &str) -> Option<String> {
    let path = locator.locate(tool)?;
    let output = std::process::Command::new(path)
        .arg(version_flag(tool))
        .output()
        .ok()?;
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    Some(text.lines().next().unwrap_or("").trim().to_string())
}

fn check_language_dependencies(config: &EngineConfig, verbose: bool) -> Result<()> {
    let locator = ToolLocator::from_settings(&config.sandbox);
    let registry = crate::adapter::AdapterRegistry::builtin(config);

    println!("Checking language toolchains...");
    println!();

    let mut missing_languages = Vec::new();
    for language in Language::ALL {
        let backend = registry.get(language)?;
        let tools = backend.required_tools();
        let mut lines = Vec::new();
        let mut ok = true;
        for tool in &tools {
            match locator.locate(tool) {
                Some(path) => {
                    if verbose {
                        let version = tool_version(&locator, tool).unwrap_or_default();
                        lines.push(format!("  {} -> {} {}", tool, path.display(), version));
                    }
                }
                None => {
                    ok = false;
                    lines.push(format!("  {} -> NOT FOUND", tool));
                }
            }
        }

        if tools.is_empty() {
            println!("OK      {} (embedded)", language);
        } else if ok {
            println!("OK      {}", language);
        } else {
            println!("MISSING {}", language);
            missing_languages.push(language);
        }
        for line in lines {
            println!("{}", line);
        }
    }

    println!();
    if missing_languages.is_empty() {
        println!("All language toolchains are installed.");
        return Ok(());
    }
    let names: Vec<&str> = missing_languages.iter().map(|l| l.as_str()).collect();
    println!("Jobs for {} will report toolchain_unavailable.", names.join(", "));
    println!("Install the missing tools or point sandbox.tool_paths at them.");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_source_args_build_request() {
        let cli = Cli::parse_from([
            "compilebox",
            "analyze",
            "--language",
            "bf",
            "--code",
            "+.",
            "--optimization",
            "O2",
            "--no-cache",
            "--format",
            "dot",
        ]);
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let (request, format) = args.into_request(JobMode::Analyze).unwrap();
        assert_eq!(request.language, Language::Brainfuck);
        assert_eq!(request.mode, JobMode::Analyze);
        assert!(!request.use_cache);
        assert_eq!(request.options.optimization, OptimizationLevel::O2);
        assert_eq!(format, ExportFormat::Dot);
    }

    #[test]
    fn test_source_is_required() {
        let cli = Cli::parse_from(["compilebox", "compile", "--language", "go"]);
        let Commands::Compile(args) = cli.command else {
            panic!("expected compile");
        };
        assert!(args.into_request(JobMode::Compile).is_err());
    }
}
