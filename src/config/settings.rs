/// Engine configuration loaded from JSON
use crate::config::types::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "compilebox.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sandbox: SandboxSettings,
    pub pipeline: PipelineSettings,
    pub cache: CacheSettings,
    pub graph: GraphSettings,
    pub brainfuck: BrainfuckSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Parent directory of per-call scratch directories
    pub scratch_root: PathBuf,
    /// Fail closed when network isolation cannot be applied
    pub strict_mode: bool,
    pub isolate_network: bool,
    pub default_limits: LimitSettings,
    /// RLIMIT_AS in bytes; JVM and Go runtimes reserve large virtual ranges
    pub address_space_limit: Option<u64>,
    /// Host variables copied into every child environment
    pub env_passthrough: Vec<String>,
    /// Explicit locations for toolchain binaries, keyed by tool name
    pub tool_paths: BTreeMap<String, PathBuf>,
    /// How often the watchdog samples process-group memory
    pub memory_poll_ms: u64,
    /// GOCACHE override; defaults to a directory inside the scratch dir
    pub go_cache: Option<PathBuf>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            scratch_root: default_scratch_root(),
            strict_mode: false,
            isolate_network: true,
            default_limits: LimitSettings::default(),
            address_space_limit: None,
            env_passthrough: vec!["PATH".to_string()],
            tool_paths: BTreeMap::new(),
            memory_poll_ms: 50,
            go_cache: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub cpu_seconds: u64,
    pub memory_bytes: u64,
    pub wall_seconds: u64,
    pub max_output_bytes: usize,
    pub max_file_bytes: u64,
    pub max_open_files: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            cpu_seconds: 10,
            memory_bytes: 512 * 1024 * 1024,
            wall_seconds: 15,
            max_output_bytes: 1024 * 1024,
            max_file_bytes: 64 * 1024 * 1024,
            max_open_files: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Per-stage ceiling, clamped to the sandbox wall limit
    pub stage_timeout_seconds: u64,
    /// Whole-job budget; defaults to the sum of the stage ceilings
    pub job_timeout_seconds: Option<u64>,
    pub max_source_bytes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_timeout_seconds: 20,
            job_timeout_seconds: None,
            max_source_bytes: 256 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Reuse completed results for identical submissions
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 128,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub max_nodes_per_stage: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_nodes_per_stage: 2000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainfuckSettings {
    pub tape_cells: usize,
    pub max_steps: u64,
    /// Number of leading steps kept in the execution trace
    pub trace_steps: usize,
}

impl Default for BrainfuckSettings {
    fn default() -> Self {
        Self {
            tape_cells: 30_000,
            max_steps: 5_000_000,
            trace_steps: 256,
        }
    }
}

fn default_scratch_root() -> PathBuf {
    let euid = nix::unistd::geteuid().as_raw();
    std::env::temp_dir().join(format!("compilebox-uid-{}", euid))
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HubError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| HubError::Config(format!("Failed to parse config JSON: {}", e)))
    }

    /// Explicit file, then ./compilebox.json, then built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        let local = std::env::current_dir()
            .map_err(|e| HubError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        if local.exists() {
            log::info!("Loading configuration from {}", local.display());
            return Self::load_from_file(local);
        }

        log::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sandbox.default_limits.cpu_seconds, 10);
        assert_eq!(config.sandbox.default_limits.wall_seconds, 15);
        assert_eq!(config.sandbox.env_passthrough, vec!["PATH".to_string()]);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, 128);
        assert_eq!(config.brainfuck.tape_cells, 30_000);
        assert!(config
            .sandbox
            .scratch_root
            .to_string_lossy()
            .contains("compilebox-uid-"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"cache": {"capacity": 4}, "sandbox": {"default_limits": {"wall_seconds": 2}}}"#,
        )
        .unwrap();
        assert_eq!(config.cache.capacity, 4);
        assert!(config.cache.enabled);
        assert_eq!(config.sandbox.default_limits.wall_seconds, 2);
        assert_eq!(config.sandbox.default_limits.cpu_seconds, 10);
        assert_eq!(config.pipeline.stage_timeout_seconds, 20);
    }

    #[test]
    fn test_load_from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = EngineConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("parse"));

        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"graph": {"max_nodes_per_stage": 10}}"#).unwrap();
        let config = EngineConfig::load(Some(&good)).unwrap();
        assert_eq!(config.graph.max_nodes_per_stage, 10);
    }
}
