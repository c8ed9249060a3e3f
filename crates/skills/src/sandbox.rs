use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

/// Canonicalizing path gate for file-writing skills.
///
/// A write target must resolve under one of the allowed roots and never
/// under a blocked system root.  Resolution uses real paths so `..`
/// traversal and symlinks cannot escape the sandbox.
pub struct PathSandbox {
    allowed_roots: Vec<PathBuf>,
    blocked_roots: Vec<PathBuf>,
}

impl PathSandbox {
    pub fn new(workspace_dir: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Self {
        let blocked = [
            "/etc", "/usr", "/bin", "/sbin", "/boot", "/sys", "/proc",
            "C:\\Windows", "C:\\Program Files", "C:\\Program Files (x86)",
        ];
        Self {
            allowed_roots: vec![
                workspace_dir.as_ref().to_path_buf(),
                data_dir.as_ref().to_path_buf(),
            ],
            blocked_roots: blocked.iter().map(PathBuf::from).collect(),
        }
    }

    fn resolve(path: &Path) -> PathBuf {
        // Canonicalize the deepest existing ancestor, then re-append the
        // remainder, so not-yet-created files still validate.
        let mut existing = path.to_path_buf();
        let mut tail: Vec<std::ffi::OsString> = vec![];
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => break,
            }
        }
        let mut resolved = existing.canonicalize().unwrap_or(existing);
        for part in tail.iter().rev() {
            resolved.push(part);
        }
        resolved
    }

    /// Validate a write target, returning the resolved real path.
    pub fn validate_output_path(&self, path: &str) -> Result<PathBuf> {
        if path.trim().is_empty() {
            bail!("path is empty");
        }
        let resolved = Self::resolve(Path::new(path));

        for blocked in &self.blocked_roots {
            let blocked_real = blocked.canonicalize().unwrap_or_else(|_| blocked.clone());
            if resolved.starts_with(&blocked_real) {
                bail!("access denied: path is in a protected system directory");
            }
        }
        for root in &self.allowed_roots {
            let root_real = Self::resolve(root);
            if resolved.starts_with(&root_real) {
                return Ok(resolved);
            }
        }
        bail!("access denied: path is outside allowed directories (workspace, data)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(dir: &Path) -> PathSandbox {
        PathSandbox::new(dir.join("workspace"), dir.join("data"))
    }

    #[test]
    fn allows_paths_under_workspace() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("workspace"))?;
        let sb = sandbox(dir.path());
        let target = dir.path().join("workspace/report.txt");
        assert!(sb.validate_output_path(target.to_str().unwrap()).is_ok());
        Ok(())
    }

    #[test]
    fn rejects_outside_roots() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sb = sandbox(dir.path());
        assert!(sb.validate_output_path("/tmp/elsewhere.txt").is_err());
        Ok(())
    }

    #[test]
    fn rejects_system_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sb = sandbox(dir.path());
        assert!(sb.validate_output_path("/etc/passwd").is_err());
        Ok(())
    }

    #[test]
    fn traversal_cannot_escape() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("workspace"))?;
        let sb = sandbox(dir.path());
        let sneaky = dir.path().join("workspace/../../../etc/passwd");
        assert!(sb.validate_output_path(sneaky.to_str().unwrap()).is_err());
        Ok(())
    }

    #[test]
    fn empty_path_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sb = sandbox(dir.path());
        assert!(sb.validate_output_path("  ").is_err());
        Ok(())
    }
}
