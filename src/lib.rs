//! Moodle Patcher: maintenance patching for Moodle dashboard plugins
//!
//! A small engine for the literal search-and-replace edits that keep a
//! production dashboard plugin alive between releases, plus a read-only log
//! tailing helper for the server environment around it.
//!
//! # Architecture
//!
//! Every edit compiles down to a single primitive: [`PatchSpec`], a verified
//! literal text replacement. The edits themselves live outside the code, as
//! TOML patch sets loaded at runtime; the engine stays generic.
//!
//! # Safety
//!
//! - A patch only applies on an exact, current match of its search text
//! - Atomic file writes (tempfile + fsync + rename)
//! - Plugin-root boundary enforcement, with compiled AMD bundles off limits
//! - UTF-8 validation
//! - Idempotent operations: re-running an applied set is a no-op
//!
//! # Example
//!
//! ```no_run
//! use moodle_patcher::{PatchOutcome, PatchSpec};
//!
//! let patch = PatchSpec::new(
//!     "ajax_send_report.php",
//!     "$status_label = 'No attempt';",
//!     "$status_label = $r->status ?? 'No attempt';",
//! );
//!
//! match patch.apply() {
//!     Ok(PatchOutcome::Applied { occurrences, .. }) => {
//!         println!("replaced {occurrences} occurrence(s)")
//!     }
//!     Ok(PatchOutcome::Skipped { .. }) => println!("search text not found"),
//!     Err(e) => eprintln!("patch failed: {e}"),
//! }
//! ```

pub mod config;
pub mod drift;
pub mod logs;
pub mod patch;
pub mod plugin;
pub mod safety;

// Re-exports
pub use config::{
    apply_patches, check_patches, load_from_path, load_from_str, ApplicationError, ConfigError,
    PatchConfig, PatchDefinition, PatchResult,
};
pub use drift::{closest_region, DriftReport};
pub use logs::{tail_logs, LogKind, LogPaths, LogReport};
pub use patch::{PatchError, PatchOutcome, PatchSpec};
pub use plugin::{matches_requirement, read_manifest, ManifestError, PluginManifest};
pub use safety::{RootGuard, SafetyError};
