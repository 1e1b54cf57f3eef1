// Startup validation of the engine configuration.
// Strict mode fails fast; permissive mode logs warnings and continues.

use crate::config::settings::EngineConfig;
use crate::config::types::{HubError, Result};

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate config at startup
pub fn validate_config(config: &EngineConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_limits(config, &mut result);
    validate_pipeline(config, &mut result);
    validate_cache_and_graph(config, &mut result);
    validate_paths(config, &mut result);

    if config.sandbox.strict_mode && !result.is_valid() {
        let error_msg = format!(
            "Config validation failed in strict mode:\n{}",
            result.errors.join("\n")
        );
        return Err(HubError::Config(error_msg));
    }

    Ok(result)
}

/// Validate and log; the caller decides whether errors stop startup
pub fn validate_and_report(config: &EngineConfig) -> Result<()> {
    let result = validate_config(config)?;
    for warning in &result.warnings {
        log::warn!("config: {}", warning);
    }
    for error in &result.errors {
        log::warn!("config error (permissive mode, continuing): {}", error);
    }
    Ok(())
}

fn validate_limits(config: &EngineConfig, result: &mut ValidationResult) {
    let limits = &config.sandbox.default_limits;

    if limits.cpu_seconds == 0 {
        result.add_error("cpu_seconds cannot be zero".to_string());
    }
    if limits.wall_seconds == 0 {
        result.add_error("wall_seconds cannot be zero".to_string());
    }
    if limits.memory_bytes == 0 {
        result.add_error("memory_bytes cannot be zero".to_string());
    } else if limits.memory_bytes < 16 * 1024 * 1024 {
        result.add_warning(format!(
            "memory_bytes {} is very low (< 16MB), most toolchains will not start",
            limits.memory_bytes
        ));
    }
    if limits.max_output_bytes == 0 {
        result.add_error("max_output_bytes cannot be zero".to_string());
    }
    if limits.max_open_files < 16 {
        result.add_error(format!(
            "max_open_files {} is too low for compiler toolchains (minimum 16)",
            limits.max_open_files
        ));
    }
    if limits.wall_seconds < limits.cpu_seconds {
        result.add_warning(format!(
            "wall_seconds ({}) is below cpu_seconds ({}); the wall limit will always fire first",
            limits.wall_seconds, limits.cpu_seconds
        ));
    }

    if let Some(address_space) = config.sandbox.address_space_limit {
        if address_space < limits.memory_bytes {
            result.add_error(format!(
                "address_space_limit ({}) must be >= memory_bytes ({})",
                address_space, limits.memory_bytes
            ));
        }
    }

    if !config.sandbox.isolate_network {
        result.add_warning("network isolation disabled for sandboxed tools".to_string());
    }
}

fn validate_pipeline(config: &EngineConfig, result: &mut ValidationResult) {
    let pipeline = &config.pipeline;
    let wall = config.sandbox.default_limits.wall_seconds;

    if pipeline.stage_timeout_seconds == 0 {
        result.add_error("stage_timeout_seconds cannot be zero".to_string());
    } else if pipeline.stage_timeout_seconds > wall {
        result.add_warning(format!(
            "stage_timeout_seconds ({}) exceeds the sandbox wall limit ({}); clamped",
            pipeline.stage_timeout_seconds, wall
        ));
    }

    if let Some(job_timeout) = pipeline.job_timeout_seconds {
        if job_timeout == 0 {
            result.add_error("job_timeout_seconds cannot be zero".to_string());
        }
    }

    if pipeline.max_source_bytes == 0 {
        result.add_error("max_source_bytes cannot be zero".to_string());
    }
}

fn validate_cache_and_graph(config: &EngineConfig, result: &mut ValidationResult) {
    if config.cache.capacity == 0 {
        result.add_error("cache capacity must be at least 1".to_string());
    }
    if config.graph.max_nodes_per_stage == 0 {
        result.add_error("max_nodes_per_stage cannot be zero".to_string());
    }
    if config.brainfuck.tape_cells == 0 {
        result.add_error("brainfuck tape_cells cannot be zero".to_string());
    }
    if config.brainfuck.max_steps == 0 {
        result.add_error("brainfuck max_steps cannot be zero".to_string());
    }
}

fn validate_paths(config: &EngineConfig, result: &mut ValidationResult) {
    if !config.sandbox.scratch_root.is_absolute() {
        result.add_error(format!(
            "scratch_root must be an absolute path: {:?}",
            config.sandbox.scratch_root
        ));
    }

    for (tool, path) in &config.sandbox.tool_paths {
        if !path.is_absolute() {
            result.add_error(format!("tool_paths.{} must be absolute: {:?}", tool, path));
        } else if !path.exists() {
            result.add_warning(format!("tool_paths.{} does not exist: {:?}", tool, path));
        }
    }
}
