/// Per-call scratch directories
///
/// Every sandbox call gets `<scratch_root>/<uuid>` with mode 0700. The
/// directory is removed when the `ScratchDir` is dropped, which covers
/// normal returns, `?` early exits and panics in the calling thread.
use crate::config::types::{HubError, Result};
use crate::observability::{audit::events, metrics::get_metrics};
use crate::sandbox::types::{Artifact, InputFile};
use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

pub struct ScratchDir {
    run_id: String,
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(root: &Path) -> Result<Self> {
        ensure_root(root)?;

        let run_id = Uuid::new_v4().to_string();
        let path = root.join(&run_id);
        fs::DirBuilder::new().mode(0o700).create(&path).map_err(|e| {
            HubError::Sandbox(format!(
                "Failed to create scratch directory {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self { run_id, path })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write input files, rejecting paths that escape the directory
    pub fn materialize(&self, files: &[InputFile]) -> Result<()> {
        for file in files {
            let target = self.resolve(&file.path)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &file.contents).map_err(|e| {
                HubError::Sandbox(format!("Failed to write {}: {}", target.display(), e))
            })?;
        }
        Ok(())
    }

    /// Read requested files, or every file under requested directories
    pub fn collect(&self, requested: &[PathBuf]) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for relative in requested {
            let target = self.resolve(relative)?;
            let meta = match fs::symlink_metadata(&target) {
                Ok(meta) => meta,
                Err(_) => {
                    log::debug!("Artifact {} not produced", relative.display());
                    continue;
                }
            };
            if meta.is_dir() {
                self.collect_dir(&target, &mut artifacts)?;
            } else if meta.is_file() {
                artifacts.push(Artifact {
                    path: relative.clone(),
                    contents: fs::read(&target)?,
                });
            }
        }
        Ok(artifacts)
    }

    fn collect_dir(&self, dir: &Path, artifacts: &mut Vec<Artifact>) -> Result<()> {
        let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            let meta = fs::symlink_metadata(&path)?;
            if meta.is_dir() {
                self.collect_dir(&path, artifacts)?;
            } else if meta.is_file() {
                let relative = path
                    .strip_prefix(&self.path)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| path.clone());
                artifacts.push(Artifact {
                    path: relative,
                    contents: fs::read(&path)?,
                });
            }
        }
        Ok(())
    }

    fn resolve(&self, relative: &Path) -> Result<PathBuf> {
        if !is_contained(relative) {
            return Err(HubError::Sandbox(format!(
                "path escapes scratch directory: {}",
                relative.display()
            )));
        }
        Ok(self.path.join(relative))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match remove_tree(&self.path) {
            Ok(()) => get_metrics().record_cleanup(true),
            Err(e) => {
                get_metrics().record_cleanup(false);
                log::warn!(
                    "Failed to remove scratch directory {}: {}",
                    self.path.display(),
                    e
                );
                events::cleanup_failure(&self.path, &e.to_string());
            }
        }
    }
}

fn ensure_root(root: &Path) -> Result<()> {
    if root.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(root)
        .map_err(|e| {
            HubError::Sandbox(format!(
                "Failed to create scratch root {}: {}",
                root.display(),
                e
            ))
        })
}

fn is_contained(relative: &Path) -> bool {
    !relative.as_os_str().is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Remove a directory tree without following symlinks.
///
/// Toolchains (notably the Go build cache) leave read-only directories
/// behind, so owner write permission is restored before removal.
pub fn remove_tree(path: &Path) -> std::io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !meta.is_dir() {
        return fs::remove_file(path);
    }
    restore_write_permission(path)?;
    fs::remove_dir_all(path)
}

fn restore_write_permission(dir: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(dir)?;
    let mode = meta.permissions().mode();
    if mode & 0o700 != 0o700 {
        fs::set_permissions(dir, fs::Permissions::from_mode(mode | 0o700))?;
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            restore_write_permission(&entry.path())?;
        }
    }
    Ok(())
}

/// Remove scratch directories older than `max_age` left by crashed processes
pub fn sweep_stale(root: &Path, max_age: Duration) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;
    for entry in fs::read_dir(root)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let path = entry.path();
        let name = entry.file_name();
        if Uuid::parse_str(&name.to_string_lossy()).is_err() {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }
        match remove_tree(&path) {
            Ok(()) => {
                log::info!("Removed stale scratch directory {}", path.display());
                cleaned += 1;
            }
            Err(e) => {
                log::warn!("Failed to remove stale {}: {}", path.display(), e);
                events::cleanup_failure(&path, &e.to_string());
            }
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_dir_is_private_and_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchDir::create(root.path()).unwrap();
            let mode = fs::metadata(scratch.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_materialize_and_collect() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(root.path()).unwrap();
        scratch
            .materialize(&[
                InputFile::new("source.c", "int main;"),
                InputFile::new("classes/pkg/A.class", vec![0xca, 0xfe]),
            ])
            .unwrap();

        let artifacts = scratch
            .collect(&[PathBuf::from("classes"), PathBuf::from("missing.ll")])
            .unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, PathBuf::from("classes/pkg/A.class"));
        assert_eq!(artifacts[0].contents, vec![0xca, 0xfe]);
    }

    #[test]
    fn test_escaping_paths_rejected() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(root.path()).unwrap();
        assert!(scratch
            .materialize(&[InputFile::new("../evil", "x")])
            .is_err());
        assert!(scratch.materialize(&[InputFile::new("/etc/x", "x")]).is_err());
    }

    #[test]
    fn test_read_only_tree_is_removed() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchDir::create(root.path()).unwrap();
            let cache = scratch.path().join("cache/ab");
            fs::create_dir_all(&cache).unwrap();
            fs::write(cache.join("entry"), b"x").unwrap();
            fs::set_permissions(&cache, fs::Permissions::from_mode(0o500)).unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_sweep_stale_only_touches_run_dirs() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join(Uuid::new_v4().to_string());
        fs::create_dir(&stale).unwrap();
        let unrelated = root.path().join("keep-me");
        fs::create_dir(&unrelated).unwrap();

        let cleaned = sweep_stale(root.path(), Duration::ZERO).unwrap();
        assert_eq!(cleaned, 1);
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }
}
