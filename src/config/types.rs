/// Core enums and the error type shared by every compilebox module
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Source languages with a registered backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Cpp,
    C,
    Swift,
    Brainfuck,
    Go,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Java,
        Language::Cpp,
        Language::C,
        Language::Swift,
        Language::Brainfuck,
        Language::Go,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Swift => "swift",
            Language::Brainfuck => "brainfuck",
            Language::Go => "go",
        }
    }

    /// Parse a request language name, accepting common aliases
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "java" => Ok(Language::Java),
            "cpp" | "c++" | "cxx" => Ok(Language::Cpp),
            "c" => Ok(Language::C),
            "swift" => Ok(Language::Swift),
            "brainfuck" | "bf" => Ok(Language::Brainfuck),
            "go" | "golang" => Ok(Language::Go),
            _ => Err(HubError::UnknownLanguage(name.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        Language::parse(s)
    }
}

/// Optimization hint passed to backends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptimizationLevel {
    #[default]
    O0,
    O1,
    O2,
    O3,
}

impl OptimizationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationLevel::O0 => "O0",
            OptimizationLevel::O1 => "O1",
            OptimizationLevel::O2 => "O2",
            OptimizationLevel::O3 => "O3",
        }
    }

    pub fn level(self) -> u8 {
        match self {
            OptimizationLevel::O0 => 0,
            OptimizationLevel::O1 => 1,
            OptimizationLevel::O2 => 2,
            OptimizationLevel::O3 => 3,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "O0" | "o0" | "0" => Ok(OptimizationLevel::O0),
            "O1" | "o1" | "1" => Ok(OptimizationLevel::O1),
            "O2" | "o2" | "2" => Ok(OptimizationLevel::O2),
            "O3" | "o3" | "3" => Ok(OptimizationLevel::O3),
            other => Err(HubError::Validation(format!(
                "optimization must be one of O0, O1, O2, O3 (got '{}')",
                other
            ))),
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationLevel {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        OptimizationLevel::parse(s)
    }
}

/// Per-job compile options; both are hints a backend may ignore
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileOptions {
    #[serde(default)]
    pub optimization: OptimizationLevel,
    #[serde(default)]
    pub debug: bool,
}

impl CompileOptions {
    pub fn new(optimization: OptimizationLevel, debug: bool) -> Self {
        Self {
            optimization,
            debug,
        }
    }
}

/// Error categories surfaced to API callers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ToolchainUnavailable,
    NotFound,
    InternalFault,
}

/// Error types for compilebox
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported language: {0}")]
    UnknownLanguage(String),

    #[error("Toolchain unavailable: {language} requires '{tool}'")]
    ToolchainUnavailable { language: String, tool: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Internal fault: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::Validation(_) | HubError::UnknownLanguage(_) => ErrorKind::Validation,
            HubError::ToolchainUnavailable { .. } => ErrorKind::ToolchainUnavailable,
            HubError::NotFound(_) => ErrorKind::NotFound,
            HubError::Config(_) | HubError::Sandbox(_) | HubError::Internal(_) | HubError::Io(_) => {
                ErrorKind::InternalFault
            }
        }
    }

    /// Status code used by the JSON API for this error
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::ToolchainUnavailable => 503,
            ErrorKind::InternalFault => 500,
        }
    }
}

impl From<nix::errno::Errno> for HubError {
    fn from(errno: nix::errno::Errno) -> Self {
        HubError::Io(std::io::Error::from_raw_os_error(errno as i32))
    }
}

pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_aliases() {
        assert_eq!(Language::parse("c++").unwrap(), Language::Cpp);
        assert_eq!(Language::parse("BF").unwrap(), Language::Brainfuck);
        assert_eq!(Language::parse(" golang ").unwrap(), Language::Go);
        assert!(matches!(
            Language::parse("python"),
            Err(HubError::UnknownLanguage(_))
        ));
    }

    #[test]
    fn test_language_serde_names() {
        let json = serde_json::to_string(&Language::Brainfuck).unwrap();
        assert_eq!(json, "\"brainfuck\"");
        let parsed: Language = serde_json::from_str("\"cpp\"").unwrap();
        assert_eq!(parsed, Language::Cpp);
    }

    #[test]
    fn test_optimization_parse() {
        assert_eq!(OptimizationLevel::parse("O2").unwrap().level(), 2);
        assert!(OptimizationLevel::parse("O9").is_err());
        assert_eq!(OptimizationLevel::default(), OptimizationLevel::O0);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(HubError::Validation("x".into()).http_status(), 400);
        assert_eq!(HubError::UnknownLanguage("x".into()).http_status(), 400);
        assert_eq!(HubError::NotFound("x".into()).http_status(), 404);
        let unavailable = HubError::ToolchainUnavailable {
            language: "java".into(),
            tool: "javac".into(),
        };
        assert_eq!(unavailable.http_status(), 503);
        assert_eq!(HubError::Internal("x".into()).kind(), ErrorKind::InternalFault);
        let io: HubError = nix::errno::Errno::ENOENT.into();
        assert_eq!(io.http_status(), 500);
    }
}
