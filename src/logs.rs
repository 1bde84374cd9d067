//! Read-only log tailing for the dashboard's server environment.
//!
//! Exposed to external tooling as a JSON query: given a log kind and a line
//! count, report each configured candidate file's existence, total line
//! count, last N lines, and size. Unreadable files produce an error payload
//! inside the report rather than failing the whole call.
//!
//! The path table is injectable so deployments can point at their own Apache
//! and Moodle data directories instead of relying on baked-in paths.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Apache / PHP error logs
    Error,
    /// Apache access logs
    Access,
    /// Logs written under the Moodle data directory
    Moodle,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Error => write!(f, "error"),
            LogKind::Access => write!(f, "access"),
            LogKind::Moodle => write!(f, "moodle"),
        }
    }
}

/// Mapping from log kind to candidate file paths, checked in order.
#[derive(Debug, Clone)]
pub struct LogPaths {
    table: BTreeMap<LogKind, Vec<PathBuf>>,
}

impl Default for LogPaths {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(
            LogKind::Error,
            vec![
                PathBuf::from("/var/log/apache2/error.log"),
                PathBuf::from("/var/log/apache2/php_error.log"),
            ],
        );
        table.insert(
            LogKind::Access,
            vec![PathBuf::from("/var/log/apache2/access.log")],
        );
        table.insert(
            LogKind::Moodle,
            vec![PathBuf::from("/var/www/moodledata/cron.log")],
        );
        Self { table }
    }
}

#[derive(Debug)]
pub enum LogPathsError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        source: toml_edit::de::Error,
    },
}

impl fmt::Display for LogPathsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogPathsError::Io { path, source } => {
                write!(f, "failed to read log paths from {}: {}", path.display(), source)
            }
            LogPathsError::Toml { source } => {
                write!(f, "failed to parse log paths TOML: {}", source)
            }
        }
    }
}

impl std::error::Error for LogPathsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogPathsError::Io { source, .. } => Some(source),
            LogPathsError::Toml { source } => Some(source),
        }
    }
}

/// On-disk override shape: one array of paths per log kind, all optional.
#[derive(Debug, Deserialize, Default)]
struct LogPathsFile {
    #[serde(default)]
    error: Vec<PathBuf>,
    #[serde(default)]
    access: Vec<PathBuf>,
    #[serde(default)]
    moodle: Vec<PathBuf>,
}

impl LogPaths {
    pub fn new(table: BTreeMap<LogKind, Vec<PathBuf>>) -> Self {
        Self { table }
    }

    /// Load an override table from a TOML document. Kinds not named in the
    /// document keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, LogPathsError> {
        let file: LogPathsFile =
            toml_edit::de::from_str(input).map_err(|source| LogPathsError::Toml { source })?;

        let mut paths = Self::default();
        if !file.error.is_empty() {
            paths.table.insert(LogKind::Error, file.error);
        }
        if !file.access.is_empty() {
            paths.table.insert(LogKind::Access, file.access);
        }
        if !file.moodle.is_empty() {
            paths.table.insert(LogKind::Moodle, file.moodle);
        }
        Ok(paths)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LogPathsError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| LogPathsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn candidates(&self, kind: LogKind) -> &[PathBuf] {
        self.table.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Report for one candidate log file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogFileStatus {
    pub path: PathBuf,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full report for one query.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogReport {
    pub log_type: LogKind,
    pub requested_lines: usize,
    pub logs: Vec<LogFileStatus>,
}

/// Tail every candidate file configured for `kind`.
///
/// Side-effect free: files are only ever opened for reading. Log files in
/// the wild carry broken encodings, so bytes decode lossily rather than
/// failing the query.
pub fn tail_logs(paths: &LogPaths, kind: LogKind, lines: usize) -> LogReport {
    let mut logs = Vec::new();

    for path in paths.candidates(kind) {
        if !path.exists() {
            logs.push(LogFileStatus {
                path: path.clone(),
                exists: false,
                total_lines: None,
                recent_lines: Vec::new(),
                size_bytes: None,
                error: Some("file not found".to_string()),
            });
            continue;
        }

        match fs::read(path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let all_lines: Vec<&str> = text.lines().collect();
                let start = all_lines.len().saturating_sub(lines);
                let recent_lines = all_lines[start..]
                    .iter()
                    .map(|line| line.trim().to_string())
                    .collect();

                logs.push(LogFileStatus {
                    path: path.clone(),
                    exists: true,
                    total_lines: Some(all_lines.len()),
                    recent_lines,
                    size_bytes: Some(bytes.len() as u64),
                    error: None,
                });
            }
            Err(e) => {
                logs.push(LogFileStatus {
                    path: path.clone(),
                    exists: true,
                    total_lines: None,
                    recent_lines: Vec::new(),
                    size_bytes: None,
                    error: Some(format!("could not read file: {e}")),
                });
            }
        }
    }

    LogReport {
        log_type: kind,
        requested_lines: lines,
        logs,
    }
}
