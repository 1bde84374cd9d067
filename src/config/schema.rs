use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Inclusive lower bound on the target plugin's `$plugin->version`
    #[serde(default)]
    pub min_plugin_version: Option<u64>,
    /// Inclusive upper bound on the target plugin's `$plugin->version`
    #[serde(default)]
    pub max_plugin_version: Option<u64>,
    /// When true, patch file paths resolve against the plugin root
    #[serde(default)]
    pub root_relative: bool,
}

/// One literal edit: an immutable (file, search, replace) triple.
#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    pub file: String,
    /// Exact text expected in the current file, verbatim
    pub search: String,
    /// Text substituted for every occurrence of `search`
    pub replace: String,
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        if let (Some(min), Some(max)) = (
            self.meta.min_plugin_version,
            self.meta.max_plugin_version,
        ) {
            if min > max {
                issues.push(ValidationIssue::InvalidCombo {
                    patch_id: None,
                    message: format!(
                        "min_plugin_version {min} exceeds max_plugin_version {max}"
                    ),
                });
            }
        }

        let mut seen_ids = HashSet::new();
        for patch in &self.patches {
            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            } else if !seen_ids.insert(patch.id.as_str()) {
                issues.push(ValidationIssue::InvalidCombo {
                    patch_id: Some(patch.id.clone()),
                    message: "duplicate patch id".to_string(),
                });
            }

            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "file",
                });
            }

            if patch.search.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "search",
                });
            } else if patch.search == patch.replace {
                // Such a patch would re-apply forever and never read as done
                issues.push(ValidationIssue::InvalidCombo {
                    patch_id: Some(patch.id.clone()),
                    message: "search and replace are identical".to_string(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch config contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}
