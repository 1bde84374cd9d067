//! Nearest-region diagnostics for patches whose search text no longer occurs.
//!
//! When a target file has drifted since a patch was authored, the operator
//! needs to see where the old code went. This module scans the file for the
//! line window most similar to the search text and reports it. It is strictly
//! a reporting aid - the patch engine itself only ever acts on an exact match.

use strsim::normalized_levenshtein;

/// Regions less similar than this are not worth reporting.
const MIN_SIMILARITY: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct DriftReport {
    /// 1-based line number where the closest window starts
    pub line: usize,
    /// Normalized Levenshtein similarity in [0, 1]
    pub similarity: f64,
    /// First line of the closest window, trimmed
    pub snippet: String,
}

/// Find the window of lines in `content` closest to `search`.
///
/// The window size equals the search text's line count, slid one line at a
/// time. Returns `None` when nothing clears [`MIN_SIMILARITY`].
pub fn closest_region(content: &str, search: &str) -> Option<DriftReport> {
    if content.is_empty() || search.is_empty() {
        return None;
    }

    let search_lines: Vec<&str> = search.lines().collect();
    let content_lines: Vec<&str> = content.lines().collect();
    let window = search_lines.len().max(1);
    if content_lines.len() < window {
        let similarity = normalized_levenshtein(content, search);
        return (similarity >= MIN_SIMILARITY).then(|| DriftReport {
            line: 1,
            similarity,
            snippet: content_lines.first().unwrap_or(&"").trim().to_string(),
        });
    }

    let mut best: Option<DriftReport> = None;
    for (idx, chunk) in content_lines.windows(window).enumerate() {
        let candidate = chunk.join("\n");
        let similarity = normalized_levenshtein(&candidate, search);
        if best.as_ref().map_or(true, |b| similarity > b.similarity) {
            best = Some(DriftReport {
                line: idx + 1,
                similarity,
                snippet: chunk.first().unwrap_or(&"").trim().to_string(),
            });
        }
    }

    best.filter(|report| report.similarity >= MIN_SIMILARITY)
}
