//! Moodle plugin manifest inspection.
//!
//! Patch sets can be gated on the target plugin's version. Moodle plugins
//! declare an integer version in `YYYYMMDDXX` form in their `version.php`;
//! this module reads it (and the component name) out of the file textually,
//! without executing any PHP.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginManifest {
    /// Frankenstyle component name, e.g. `local_homeworkdashboard`
    pub component: Option<String>,
    /// `$plugin->version`, e.g. 2025112703
    pub version: u64,
}

#[derive(Debug)]
pub enum ManifestError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// version.php was readable but carries no parseable `$plugin->version`
    MissingVersion { path: PathBuf },
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ManifestError::MissingVersion { path } => {
                write!(f, "no $plugin->version found in {}", path.display())
            }
        }
    }
}

impl std::error::Error for ManifestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ManifestError::Io { source, .. } => Some(source),
            ManifestError::MissingVersion { .. } => None,
        }
    }
}

/// Read and parse `<plugin_root>/version.php`.
pub fn read_manifest(plugin_root: &Path) -> Result<PluginManifest, ManifestError> {
    let path = plugin_root.join("version.php");
    let content = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
        path: path.clone(),
        source,
    })?;
    parse_manifest(&content).ok_or(ManifestError::MissingVersion { path })
}

/// Parse a version.php body. Returns `None` when no version assignment is
/// present.
pub fn parse_manifest(content: &str) -> Option<PluginManifest> {
    let version = assigned_value(content, "version").and_then(|v| v.parse::<u64>().ok())?;
    let component =
        assigned_value(content, "component").map(|v| v.trim_matches(['\'', '"']).to_string());

    Some(PluginManifest { component, version })
}

/// Extract the right-hand side of `$plugin->{field} = <value>;`, trimmed.
fn assigned_value(content: &str, field: &str) -> Option<String> {
    for line in content.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix("$plugin->") else {
            continue;
        };
        let Some(rest) = rest.strip_prefix(field) else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let value = rest.split(';').next().unwrap_or("").trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Check a plugin version against inclusive bounds.
///
/// `None` bounds mean "apply to all versions", matching the behavior of an
/// omitted constraint in a patch set's `[meta]` table.
pub fn matches_requirement(version: u64, min: Option<u64>, max: Option<u64>) -> bool {
    if let Some(min) = min {
        if version < min {
            return false;
        }
    }
    if let Some(max) = max {
        if version > max {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION_PHP: &str = r#"<?php
defined('MOODLE_INTERNAL') || die();

$plugin->component = 'local_homeworkdashboard';
$plugin->version   = 2025112703;
$plugin->requires  = 2022112800; // Moodle 4.0+
$plugin->maturity  = MATURITY_ALPHA;
$plugin->release   = '0.1 Homework Dashboard MVP';
"#;

    #[test]
    fn parses_version_and_component() {
        let manifest = parse_manifest(VERSION_PHP).unwrap();
        assert_eq!(manifest.version, 2025112703);
        assert_eq!(
            manifest.component.as_deref(),
            Some("local_homeworkdashboard")
        );
    }

    #[test]
    fn missing_version_is_none() {
        assert!(parse_manifest("<?php\n$plugin->component = 'local_x';\n").is_none());
        assert!(parse_manifest("").is_none());
    }

    #[test]
    fn non_numeric_version_is_none() {
        assert!(parse_manifest("<?php\n$plugin->version = MATURITY_ALPHA;\n").is_none());
    }

    #[test]
    fn read_manifest_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("version.php"), VERSION_PHP).unwrap();

        let manifest = read_manifest(dir.path()).unwrap();
        assert_eq!(manifest.version, 2025112703);
    }

    #[test]
    fn read_manifest_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_manifest(dir.path()),
            Err(ManifestError::Io { .. })
        ));
    }

    #[test]
    fn requirement_bounds_are_inclusive() {
        assert!(matches_requirement(2025112703, None, None));
        assert!(matches_requirement(2025112703, Some(2025112703), None));
        assert!(matches_requirement(2025112703, None, Some(2025112703)));
        assert!(matches_requirement(2025112703, Some(2025010100), Some(2025123199)));
        assert!(!matches_requirement(2024123100, Some(2025010100), None));
        assert!(!matches_requirement(2026010100, None, Some(2025123199)));
    }
}
