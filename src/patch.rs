use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The fundamental patch primitive: verified literal text replacement.
///
/// Every maintenance edit this tool performs compiles down to one of these.
/// The search text doubles as the verification of the expected before-state:
/// if it does not occur verbatim in the file, nothing is written. There is no
/// pattern matching of any kind - a file that has drifted by a single
/// character is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchSpec does nothing until apply() is called"]
pub struct PatchSpec {
    /// Path to the file to patch (absolute, or resolved by the caller)
    pub file: PathBuf,
    /// Exact text expected to occur in the current file contents
    pub search: String,
    /// Text substituted for every occurrence of `search`
    pub replace: String,
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Encoding { path: PathBuf },
}

/// Result of applying a patch. Both variants are terminal for an invocation.
///
/// `Skipped` is the expected outcome on a second run, or when the target has
/// already diverged - it is deliberately not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOutcome should be checked for applied/skipped"]
pub enum PatchOutcome {
    /// All occurrences of the search text were replaced and written back.
    Applied { file: PathBuf, occurrences: usize },
    /// The search text does not occur; the file was not touched.
    Skipped { file: PathBuf },
}

impl PatchSpec {
    pub fn new(
        file: impl Into<PathBuf>,
        search: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            search: search.into(),
            replace: replace.into(),
        }
    }

    /// The pure contents -> contents function behind [`apply`](Self::apply).
    ///
    /// Returns the new contents and the occurrence count, or `None` when the
    /// search text is absent. Replaces every occurrence.
    pub fn replace_in(&self, content: &str) -> Option<(String, usize)> {
        let occurrences = content.matches(self.search.as_str()).count();
        if occurrences == 0 {
            return None;
        }
        Some((content.replace(&self.search, &self.replace), occurrences))
    }

    /// Whether `content` already carries the replacement text.
    ///
    /// Used by callers to distinguish "already applied" from "target drifted"
    /// once `replace_in` comes back empty.
    pub fn is_applied(&self, content: &str) -> bool {
        content.contains(self.replace.as_str())
    }

    /// Apply this patch to the file system.
    ///
    /// Reads the whole file as UTF-8, computes the replacement fully in
    /// memory, and only then writes - atomically, via a temp file in the same
    /// directory followed by fsync and rename. A crash mid-write leaves the
    /// original intact. After a successful write the target's mtime is bumped
    /// so PHP opcache revalidates the file.
    pub fn apply(&self) -> Result<PatchOutcome, PatchError> {
        let bytes = fs::read(&self.file).map_err(|source| PatchError::Read {
            path: self.file.clone(),
            source,
        })?;
        let content = String::from_utf8(bytes).map_err(|_| PatchError::Encoding {
            path: self.file.clone(),
        })?;

        let Some((new_content, occurrences)) = self.replace_in(&content) else {
            return Ok(PatchOutcome::Skipped {
                file: self.file.clone(),
            });
        };

        atomic_write(&self.file, new_content.as_bytes())?;

        // Opcache checks mtime, not content
        let now = filetime::FileTime::now();
        filetime::set_file_mtime(&self.file, now).map_err(|source| PatchError::Write {
            path: self.file.clone(),
            source,
        })?;

        Ok(PatchOutcome::Applied {
            file: self.file.clone(),
            occurrences,
        })
    }
}

/// Atomic file write: temp file + fsync + rename.
///
/// The temp file lives in the target's directory so the rename never crosses
/// a filesystem boundary.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), PatchError> {
    let parent = path.parent().ok_or_else(|| PatchError::Write {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ),
    })?;

    let write_err = |source: std::io::Error| PatchError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    temp.write_all(content).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;

    Ok(())
}
