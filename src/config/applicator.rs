//! Patch applicator - runs a validated patch set against a plugin tree.
//!
//! Application is sequential and per-patch:
//! - the whole set is gated on the target plugin's version,
//! - every target path goes through the [`RootGuard`],
//! - a patch whose search text is gone is classified as already applied
//!   (replacement text present) or drifted (with a nearest-region hint),
//!   never forced.

use crate::config::schema::PatchConfig;
use crate::drift::{closest_region, DriftReport};
use crate::patch::{PatchError, PatchOutcome, PatchSpec};
use crate::plugin::matches_requirement;
use crate::safety::{RootGuard, SafetyError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of applying (or checking) a single patch.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "PatchResult should be checked for success/failure"]
pub enum PatchResult {
    /// The search text was found and replaced. From `check_patches` this
    /// means "would be replaced".
    Applied { file: PathBuf, occurrences: usize },
    /// The search text is gone but the replacement is present.
    AlreadyApplied { file: PathBuf },
    /// Neither search nor replacement text occurs - the target has drifted.
    /// A normal negative result, deliberately not an error.
    NotFound {
        file: PathBuf,
        drift: Option<DriftReport>,
    },
    /// The whole set was skipped because of a plugin version constraint.
    SkippedVersion { reason: String },
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchResult::Applied { file, occurrences } => {
                write!(
                    f,
                    "Applied to {} ({} occurrence{})",
                    file.display(),
                    occurrences,
                    if *occurrences == 1 { "" } else { "s" }
                )
            }
            PatchResult::AlreadyApplied { file } => {
                write!(f, "Already applied to {}", file.display())
            }
            PatchResult::NotFound { file, .. } => {
                write!(f, "Search text not found in {}", file.display())
            }
            PatchResult::SkippedVersion { reason } => {
                write!(f, "Skipped (version): {}", reason)
            }
        }
    }
}

/// Environmental failures during application. Fatal for the patch concerned;
/// nothing is written for it.
#[derive(Debug)]
pub enum ApplicationError {
    /// Target file missing or unreadable
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Target escapes the plugin root or hits a forbidden subtree
    Safety(SafetyError),
    /// Read, decode, or write failure from the patch primitive
    Patch(PatchError),
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ApplicationError::Safety(e) => write!(f, "safety error: {}", e),
            ApplicationError::Patch(e) => write!(f, "patch error: {}", e),
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Io { source, .. } => Some(source),
            ApplicationError::Safety(e) => Some(e),
            ApplicationError::Patch(e) => Some(e),
        }
    }
}

impl From<SafetyError> for ApplicationError {
    fn from(e: SafetyError) -> Self {
        ApplicationError::Safety(e)
    }
}

impl From<PatchError> for ApplicationError {
    fn from(e: PatchError) -> Self {
        ApplicationError::Patch(e)
    }
}

/// Apply a patch set to the plugin tree behind `guard`.
///
/// Returns one result per patch, in definition order.
pub fn apply_patches(
    config: &PatchConfig,
    guard: &RootGuard,
    plugin_version: u64,
) -> Vec<(String, Result<PatchResult, ApplicationError>)> {
    run_patches(config, guard, plugin_version, true)
}

/// Evaluate a patch set without mutating anything.
///
/// Mirrors `apply_patches` result semantics (`Applied` means "would apply").
/// Backs the status, verify, and dry-run commands.
pub fn check_patches(
    config: &PatchConfig,
    guard: &RootGuard,
    plugin_version: u64,
) -> Vec<(String, Result<PatchResult, ApplicationError>)> {
    run_patches(config, guard, plugin_version, false)
}

fn run_patches(
    config: &PatchConfig,
    guard: &RootGuard,
    plugin_version: u64,
    write: bool,
) -> Vec<(String, Result<PatchResult, ApplicationError>)> {
    if let Some(reason) = version_skip_reason(
        plugin_version,
        config.meta.min_plugin_version,
        config.meta.max_plugin_version,
    ) {
        return config
            .patches
            .iter()
            .map(|patch| {
                (
                    patch.id.clone(),
                    Ok(PatchResult::SkippedVersion {
                        reason: reason.clone(),
                    }),
                )
            })
            .collect();
    }

    config
        .patches
        .iter()
        .map(|patch| {
            let result = resolve_target(guard, &patch.file, config.meta.root_relative)
                .and_then(|target| {
                    let spec = PatchSpec::new(target, &patch.search, &patch.replace);
                    if write {
                        apply_one(guard, &spec)
                    } else {
                        check_one(&spec)
                    }
                });
            (patch.id.clone(), result)
        })
        .collect()
}

fn version_skip_reason(version: u64, min: Option<u64>, max: Option<u64>) -> Option<String> {
    if matches_requirement(version, min, max) {
        return None;
    }
    let reason = match (min, max) {
        (Some(min), _) if version < min => {
            format!("plugin version {version} is below min_plugin_version {min}")
        }
        (_, Some(max)) => {
            format!("plugin version {version} is above max_plugin_version {max}")
        }
        _ => format!("plugin version {version} outside configured bounds"),
    };
    Some(reason)
}

/// Resolve and boundary-check a patch target.
///
/// `root_relative` paths resolve against the plugin root; everything else
/// resolves against the invoking directory. Both end up inside the guard.
fn resolve_target(
    guard: &RootGuard,
    file: &str,
    root_relative: bool,
) -> Result<PathBuf, ApplicationError> {
    let raw: PathBuf = if root_relative || Path::new(file).is_absolute() {
        PathBuf::from(file)
    } else {
        std::env::current_dir()
            .map_err(|source| ApplicationError::Io {
                path: PathBuf::from(file),
                source,
            })?
            .join(file)
    };

    guard.validate_path(&raw).map_err(|e| match e {
        // A missing target is a file-access failure, not a boundary breach
        SafetyError::Canonicalize(source) => ApplicationError::Io {
            path: if raw.is_absolute() {
                raw.clone()
            } else {
                guard.plugin_root().join(&raw)
            },
            source,
        },
        other => ApplicationError::Safety(other),
    })
}

fn apply_one(guard: &RootGuard, spec: &PatchSpec) -> Result<PatchResult, ApplicationError> {
    // The target was validated at resolution; re-check right before the write
    guard.revalidate(&spec.file).map_err(|e| match e {
        SafetyError::Canonicalize(source) => ApplicationError::Io {
            path: spec.file.clone(),
            source,
        },
        other => ApplicationError::Safety(other),
    })?;

    match spec.apply()? {
        PatchOutcome::Applied { file, occurrences } => {
            Ok(PatchResult::Applied { file, occurrences })
        }
        PatchOutcome::Skipped { file } => {
            let content = read_text(&file)?;
            Ok(classify_negative(spec, &file, &content))
        }
    }
}

fn check_one(spec: &PatchSpec) -> Result<PatchResult, ApplicationError> {
    let content = read_text(&spec.file)?;
    match spec.replace_in(&content) {
        Some((_, occurrences)) => Ok(PatchResult::Applied {
            file: spec.file.clone(),
            occurrences,
        }),
        None => Ok(classify_negative(spec, &spec.file, &content)),
    }
}

/// The search text is absent: already applied, or the target drifted.
fn classify_negative(spec: &PatchSpec, file: &Path, content: &str) -> PatchResult {
    if spec.is_applied(content) {
        PatchResult::AlreadyApplied {
            file: file.to_path_buf(),
        }
    } else {
        PatchResult::NotFound {
            file: file.to_path_buf(),
            drift: closest_region(content, &spec.search),
        }
    }
}

fn read_text(path: &Path) -> Result<String, ApplicationError> {
    let bytes = fs::read(path).map_err(|source| ApplicationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| {
        ApplicationError::Patch(PatchError::Encoding {
            path: path.to_path_buf(),
        })
    })
}
