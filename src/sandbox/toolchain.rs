/// Toolchain binary lookup
///
/// Children run with a cleared environment, so program names are resolved
/// here: configured overrides first, then the host PATH.
use crate::config::settings::SandboxSettings;
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default)]
pub struct ToolLocator {
    overrides: BTreeMap<String, PathBuf>,
    search_path: Vec<PathBuf>,
}

impl ToolLocator {
    pub fn new(overrides: BTreeMap<String, PathBuf>, search_path: Vec<PathBuf>) -> Self {
        Self {
            overrides,
            search_path,
        }
    }

    pub fn from_settings(settings: &SandboxSettings) -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_else(|| {
                ["/usr/local/bin", "/usr/bin", "/bin"]
                    .iter()
                    .map(PathBuf::from)
                    .collect()
            });
        Self::new(settings.tool_paths.clone(), search_path)
    }

    /// Absolute path of an executable, if it exists on this host
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        if let Some(path) = self.overrides.get(name) {
            return is_executable(path).then(|| path.clone());
        }
        if name.contains('/') {
            let path = PathBuf::from(name);
            return (path.is_absolute() && is_executable(&path)).then_some(path);
        }
        self.search_path
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }

    /// Directories a child PATH should contain so toolchains find their helpers
    pub fn child_path(&self) -> String {
        let mut dirs: Vec<PathBuf> = self
            .overrides
            .values()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect();
        for dir in &self.search_path {
            if !dirs.contains(dir) {
                dirs.push(dir.clone());
            }
        }
        std::env::join_paths(dirs)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string())
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_sh_on_path() {
        let locator = ToolLocator::new(BTreeMap::new(), vec![PathBuf::from("/bin")]);
        assert_eq!(locator.locate("sh"), Some(PathBuf::from("/bin/sh")));
        assert!(locator.locate("definitely-not-a-real-tool-xyz").is_none());
    }

    #[test]
    fn test_override_wins_and_must_exist() {
        let mut overrides = BTreeMap::new();
        overrides.insert("cc".to_string(), PathBuf::from("/bin/sh"));
        overrides.insert("javac".to_string(), PathBuf::from("/nonexistent/javac"));
        let locator = ToolLocator::new(overrides, vec![PathBuf::from("/usr/bin")]);
        assert_eq!(locator.locate("cc"), Some(PathBuf::from("/bin/sh")));
        assert!(locator.locate("javac").is_none());
        assert!(locator.child_path().starts_with("/bin"));
    }

    #[test]
    fn test_absolute_name() {
        let locator = ToolLocator::default();
        assert!(locator.is_available("/bin/sh"));
        assert!(!locator.is_available("relative/sh"));
    }
}
