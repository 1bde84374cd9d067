use std::path::{Path, PathBuf};
use thiserror::Error;

/// Boundary checks so patches never touch files outside the plugin tree.
///
/// Maintenance patches are authored with relative paths and run by an
/// operator who may be in the wrong directory; every target is resolved and
/// checked against the plugin root before anything is written.
#[derive(Debug, Clone)]
pub struct RootGuard {
    /// Canonical path to the plugin root
    plugin_root: PathBuf,
    /// Canonical paths to subtrees that must never be patched
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("path is outside the plugin root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("path is in a forbidden directory: {path} (forbidden: {forbidden})")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl RootGuard {
    /// Create a guard for the given plugin root.
    ///
    /// The root is canonicalized so symlinked checkouts behave. Version
    /// control metadata and compiled AMD bundles are off limits: `amd/build`
    /// holds minified artifacts regenerated from `amd/src`, so a patch
    /// landing there would be clobbered by the next grunt run.
    pub fn new(plugin_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let plugin_root = plugin_root.as_ref().canonicalize()?;

        let mut forbidden_paths = Vec::new();
        for name in [".git", "amd/build"] {
            if let Ok(path) = plugin_root.join(name).canonicalize() {
                forbidden_paths.push(path);
            }
        }

        Ok(Self {
            plugin_root,
            forbidden_paths,
        })
    }

    /// Check that a path is safe to patch.
    ///
    /// Relative paths resolve against the plugin root. Returns the
    /// canonicalized absolute path if it stays inside the root and outside
    /// the forbidden subtrees.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.plugin_root.join(path)
        };

        // Canonicalize to resolve symlinks and .. components
        let canonical = absolute.canonicalize()?;

        self.check_canonical(&canonical)?;

        Ok(canonical)
    }

    /// Re-validate a previously validated canonical path.
    ///
    /// Called immediately before the write to narrow the TOCTOU window.
    pub fn revalidate(&self, path: &Path) -> Result<PathBuf, SafetyError> {
        let canonical = path.canonicalize()?;
        self.check_canonical(&canonical)?;
        Ok(canonical)
    }

    fn check_canonical(&self, canonical: &Path) -> Result<(), SafetyError> {
        if !canonical.starts_with(&self.plugin_root) {
            return Err(SafetyError::OutsideRoot {
                path: canonical.to_path_buf(),
                root: self.plugin_root.clone(),
            });
        }

        for forbidden in &self.forbidden_paths {
            if canonical.starts_with(forbidden) {
                return Err(SafetyError::ForbiddenPath {
                    path: canonical.to_path_buf(),
                    forbidden: forbidden.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn plugin_root(&self) -> &Path {
        &self.plugin_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn path_inside_root_is_accepted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let guard = RootGuard::new(root).unwrap();

        let file = root.join("classes/homework_manager.php");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"<?php").unwrap();

        assert!(guard.validate_path(&file).is_ok());
    }

    #[test]
    fn path_outside_root_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("plugin");
        fs::create_dir_all(&root).unwrap();
        let guard = RootGuard::new(&root).unwrap();

        let outside = temp_dir.path().join("outside.php");
        fs::write(&outside, b"<?php").unwrap();

        let result = guard.validate_path(&outside);
        assert!(matches!(result, Err(SafetyError::OutsideRoot { .. })));
    }

    #[test]
    fn compiled_amd_bundles_are_forbidden() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let build = root.join("amd/build");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("dashboard.min.js"), b"min").unwrap();

        let guard = RootGuard::new(root).unwrap();
        let result = guard.validate_path("amd/build/dashboard.min.js");
        assert!(matches!(result, Err(SafetyError::ForbiddenPath { .. })));
    }

    #[test]
    fn amd_sources_are_allowed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let src = root.join("amd/src");
        fs::create_dir_all(root.join("amd/build")).unwrap();
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("dashboard.js"), b"js").unwrap();

        let guard = RootGuard::new(root).unwrap();
        assert!(guard.validate_path("amd/src/dashboard.js").is_ok());
    }

    #[test]
    fn relative_path_resolves_against_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let guard = RootGuard::new(root).unwrap();

        fs::write(root.join("lib.php"), b"<?php").unwrap();

        assert!(guard.validate_path("lib.php").is_ok());
    }

    #[test]
    fn missing_target_is_canonicalize_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = RootGuard::new(temp_dir.path()).unwrap();

        let result = guard.validate_path("does_not_exist.php");
        assert!(matches!(result, Err(SafetyError::Canonicalize(_))));
    }

    #[test]
    #[cfg(unix)]
    fn symlink_escape_is_rejected() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("plugin");
        fs::create_dir_all(&root).unwrap();

        let outside = temp_dir.path().join("outside.php");
        fs::write(&outside, b"<?php").unwrap();

        let link = root.join("escape.php");
        symlink(&outside, &link).unwrap();

        let guard = RootGuard::new(&root).unwrap();
        let result = guard.validate_path(&link);

        assert!(matches!(result, Err(SafetyError::OutsideRoot { .. })));
    }
}
