use crate::config::settings::LimitSettings;
use crate::core::types::ResourceExceeded;
use crate::sandbox::inprocess::EmbeddedProgram;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Limits applied to one sandbox call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxLimits {
    pub cpu_time: Duration,
    pub wall_time: Duration,
    pub memory_bytes: u64,
    pub max_output_bytes: usize,
    pub max_file_bytes: u64,
    pub max_open_files: u64,
    pub address_space_bytes: Option<u64>,
}

impl SandboxLimits {
    /// Copy with the wall limit lowered to `ceiling` when that is tighter
    pub fn with_wall_ceiling(&self, ceiling: Duration) -> Self {
        let mut limits = self.clone();
        if ceiling < limits.wall_time {
            limits.wall_time = ceiling;
        }
        limits
    }
}

impl From<&LimitSettings> for SandboxLimits {
    fn from(settings: &LimitSettings) -> Self {
        Self {
            cpu_time: Duration::from_secs(settings.cpu_seconds),
            wall_time: Duration::from_secs(settings.wall_seconds),
            memory_bytes: settings.memory_bytes,
            max_output_bytes: settings.max_output_bytes,
            max_file_bytes: settings.max_file_bytes,
            max_open_files: settings.max_open_files,
            address_space_bytes: None,
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from(&LimitSettings::default())
    }
}

/// What a sandbox call runs
#[derive(Clone)]
pub enum SandboxProgram {
    /// External tool; argv[0] is resolved against tool paths and PATH
    External { argv: Vec<String> },
    /// In-process tool with expanded arguments
    Embedded {
        program: Arc<dyn EmbeddedProgram>,
        args: Vec<String>,
    },
}

impl SandboxProgram {
    pub fn external<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Self {
        SandboxProgram::External {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            SandboxProgram::External { argv } => argv.first().cloned().unwrap_or_default(),
            SandboxProgram::Embedded { program, .. } => format!("embedded:{}", program.name()),
        }
    }
}

impl fmt::Debug for SandboxProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxProgram::External { argv } => f.debug_struct("External").field("argv", argv).finish(),
            SandboxProgram::Embedded { program, args } => f
                .debug_struct("Embedded")
                .field("program", &program.name())
                .field("args", args)
                .finish(),
        }
    }
}

/// File placed into the scratch directory before the program starts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputFile {
    /// Relative to the scratch directory
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// File read back out of the scratch directory after the run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    #[serde(skip)]
    pub contents: Vec<u8>,
}

impl Artifact {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }

    pub fn into_input(self) -> InputFile {
        InputFile {
            path: self.path,
            contents: self.contents,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SandboxRequest {
    pub program: SandboxProgram,
    pub input_files: Vec<InputFile>,
    /// Relative paths (files or directories) to collect as artifacts
    pub collect: Vec<PathBuf>,
    /// Extra environment; `{scratch}` expands to the scratch directory
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub limits: SandboxLimits,
}

impl SandboxRequest {
    pub fn new(program: SandboxProgram, limits: SandboxLimits) -> Self {
        Self {
            program,
            input_files: Vec::new(),
            collect: Vec::new(),
            env: Vec::new(),
            stdin: None,
            limits,
        }
    }

    pub fn with_input(mut self, file: InputFile) -> Self {
        self.input_files.push(file);
        self
    }

    pub fn with_collect(mut self, path: impl Into<PathBuf>) -> Self {
        self.collect.push(path.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }
}

/// Output integrity classification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputIntegrity {
    #[default]
    Complete,
    /// Bytes past the output limit were discarded
    TruncatedByLimit,
    /// Collector did not finish before the collection deadline
    CollectorTimeout,
    ReadError,
}

impl OutputIntegrity {
    pub fn is_truncated(self) -> bool {
        self != OutputIntegrity::Complete
    }
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::CollectorTimeout => write!(f, "collector_timeout"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
        }
    }
}

/// How a sandboxed run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "SIG")]
    Signaled,
    #[serde(rename = "TLE")]
    TimeLimit,
    #[serde(rename = "MLE")]
    MemoryLimit,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxResult {
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_integrity: OutputIntegrity,
    pub stderr_integrity: OutputIntegrity,
    pub wall_time_ms: u64,
    pub cpu_time_ms: u64,
    pub memory_peak_bytes: u64,
    pub resource_exceeded: ResourceExceeded,
    pub cancelled: bool,
    pub artifacts: Vec<Artifact>,
}

impl SandboxResult {
    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }

    pub fn artifact_paths(&self) -> Vec<&PathBuf> {
        self.artifacts.iter().map(|a| &a.path).collect()
    }

    pub fn artifact(&self, path: &str) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .find(|a| a.path == std::path::Path::new(path))
    }

    /// Derive the status from exit information and enforcement flags
    pub fn classify(
        exit_code: Option<i32>,
        signal: Option<i32>,
        exceeded: &ResourceExceeded,
        cancelled: bool,
    ) -> ExecutionStatus {
        if cancelled {
            ExecutionStatus::Cancelled
        } else if exceeded.time || exceeded.cpu {
            ExecutionStatus::TimeLimit
        } else if exceeded.memory {
            ExecutionStatus::MemoryLimit
        } else if signal.is_some() {
            ExecutionStatus::Signaled
        } else if exit_code == Some(0) {
            ExecutionStatus::Ok
        } else {
            ExecutionStatus::RuntimeError
        }
    }
}

/// Which isolation controls a sandbox could apply on this host
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IsolationReport {
    pub configured: Vec<String>,
    pub applied: Vec<String>,
    pub missing: Vec<String>,
}

impl IsolationReport {
    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_precedence() {
        let none = ResourceExceeded::default();
        assert_eq!(
            SandboxResult::classify(Some(0), None, &none, false),
            ExecutionStatus::Ok
        );
        assert_eq!(
            SandboxResult::classify(Some(1), None, &none, false),
            ExecutionStatus::RuntimeError
        );
        assert_eq!(
            SandboxResult::classify(None, Some(11), &none, false),
            ExecutionStatus::Signaled
        );

        let wall = ResourceExceeded {
            time: true,
            ..Default::default()
        };
        assert_eq!(
            SandboxResult::classify(None, Some(9), &wall, false),
            ExecutionStatus::TimeLimit
        );
        assert_eq!(
            SandboxResult::classify(None, Some(9), &wall, true),
            ExecutionStatus::Cancelled
        );
    }

    #[test]
    fn test_wall_ceiling_only_tightens() {
        let limits = SandboxLimits::default();
        let tighter = limits.with_wall_ceiling(Duration::from_secs(2));
        assert_eq!(tighter.wall_time, Duration::from_secs(2));
        let looser = limits.with_wall_ceiling(Duration::from_secs(600));
        assert_eq!(looser.wall_time, limits.wall_time);
    }

    #[test]
    fn test_status_serialization_uses_short_codes() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::TimeLimit).unwrap(),
            "\"TLE\""
        );
    }
}
