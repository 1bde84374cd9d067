use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use moodle_patcher::config::{
    apply_patches, check_patches, load_from_path, ApplicationError, PatchResult,
};
use moodle_patcher::logs::{tail_logs, LogKind, LogPaths};
use moodle_patcher::plugin;
use moodle_patcher::safety::RootGuard;
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "moodle-patcher")]
#[command(about = "Maintenance patching for Moodle dashboard plugins", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch sets to a plugin tree
    Apply {
        /// Path to the plugin root (auto-detected if not specified)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Specific patch file to apply (otherwise applies all in patches/)
        #[arg(short, long)]
        patches: Option<PathBuf>,

        /// Dry run - show what would change without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Check status of patches without applying
    Status {
        /// Path to the plugin root (auto-detected if not specified)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Verify patches are already applied to the current tree
    Verify {
        /// Path to the plugin root (auto-detected if not specified)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// List available patch sets and their version constraints
    List {
        /// Path to the plugin root (auto-detected if not specified)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Tail server log files and print a JSON report
    Logs {
        /// Which log family to read
        #[arg(short, long, value_enum, default_value_t = LogKind::Error)]
        kind: LogKind,

        /// How many trailing lines to include per file
        #[arg(short, long, default_value_t = 50)]
        lines: usize,

        /// TOML file overriding the candidate log paths per kind
        #[arg(long)]
        paths: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            root,
            patches,
            dry_run,
            diff,
        } => cmd_apply(root, patches, dry_run, diff),

        Commands::Status { root } => cmd_status(root),

        Commands::Verify { root } => cmd_verify(root),

        Commands::List { root } => cmd_list(root),

        Commands::Logs { kind, lines, paths } => cmd_logs(kind, lines, paths),
    }
}

/// Helper: discover all .toml patch files in a patches/ directory.
///
/// Discovery order:
/// 1. `<root>/patches` (patch files kept alongside the plugin).
/// 2. `./patches` relative to the current working directory (typical when
///    running from the moodle-patcher repo).
fn discover_patch_files(root: &Path) -> Result<Vec<PathBuf>> {
    let cwd_patches_dir = env::current_dir().ok().map(|cwd| cwd.join("patches"));
    let root_patches_dir = root.join("patches");

    let candidate_dirs: Vec<PathBuf> = std::iter::once(root_patches_dir)
        .chain(cwd_patches_dir)
        .collect();

    for patches_dir in candidate_dirs {
        if !patches_dir.exists() {
            continue;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&patches_dir).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
            {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();

        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml patch files found in either ./patches or {}/patches",
        root.display()
    )
}

/// Resolve the plugin root using multiple detection strategies
///
/// Priority order:
/// 1. Explicit --root flag
/// 2. MOODLE_PLUGIN_ROOT environment variable
/// 3. Auto-detect from the current directory
fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf> {
    // 1. Explicit flag (highest priority)
    if let Some(path) = cli_root {
        return Ok(path.canonicalize()?);
    }

    // 2. Environment variable
    if let Ok(env_path) = env::var("MOODLE_PLUGIN_ROOT") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: MOODLE_PLUGIN_ROOT is set but path doesn't exist: {}",
                env_path
            )
            .yellow()
        );
    }

    // 3. Auto-detect from current directory
    if let Some(path) = auto_detect_root() {
        println!(
            "{}",
            format!("Auto-detected plugin root: {}", path.display()).dimmed()
        );
        return Ok(path);
    }

    // 4. Helpful error with multiple solutions
    anyhow::bail!(
        "{}\n{}\n  {}\n  {}\n  {}",
        "Could not find a plugin root.".red(),
        "Try one of:".bold(),
        "1. cd into the plugin directory: cd /path/to/moodle/local/homeworkdashboard && moodle-patcher apply",
        "2. Specify explicitly: moodle-patcher apply --root /path/to/moodle/local/homeworkdashboard",
        "3. Set environment variable: export MOODLE_PLUGIN_ROOT=/path/to/moodle/local/homeworkdashboard"
    )
}

/// Auto-detect the plugin root by walking up from the current directory.
///
/// A Moodle plugin directory carries version.php and lib.php at its top
/// level; that pair is the detection marker.
fn auto_detect_root() -> Option<PathBuf> {
    let current = env::current_dir().ok()?;

    for ancestor in current.ancestors() {
        let has_version = ancestor.join("version.php").exists();
        let has_lib = ancestor.join("lib.php").exists();

        if has_version && has_lib {
            return Some(ancestor.to_path_buf());
        }
    }

    None
}

/// Helper: read the plugin version from version.php, with a warned fallback.
fn read_plugin_version(root: &Path) -> u64 {
    match plugin::read_manifest(root) {
        Ok(manifest) => manifest.version,
        Err(e) => {
            eprintln!(
                "{}",
                format!("Warning: {e}; treating plugin version as 0").yellow()
            );
            0
        }
    }
}

/// Helper: show a unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn cmd_apply(
    root: Option<PathBuf>,
    patches: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let root = resolve_root(root)?;
    let guard = RootGuard::new(&root)?;

    let patch_files = if let Some(path) = patches {
        vec![path]
    } else {
        discover_patch_files(&root)?
    };

    let plugin_version = read_plugin_version(&root);

    println!("Plugin root: {}", root.display());
    println!("Plugin version: {}", plugin_version);
    println!();

    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_not_found = 0;
    let mut total_skipped = 0;
    let mut total_failed = 0;

    for patch_file in patch_files {
        println!("Loading patches from {}...", patch_file.display());

        let config = load_from_path(&patch_file)?;

        // Capture file contents before applying (for diff output). Only the
        // files these patches touch are read.
        let mut file_contents_before: HashMap<PathBuf, String> = HashMap::new();
        if show_diff && !dry_run {
            let target_files: std::collections::HashSet<PathBuf> = config
                .patches
                .iter()
                .filter_map(|p| guard.validate_path(&p.file).ok())
                .collect();
            for file_path in target_files {
                if let Ok(content) = fs::read_to_string(&file_path) {
                    file_contents_before.insert(file_path, content);
                }
            }
        }

        let results = if dry_run {
            println!("{}", "  [DRY RUN - nothing will be written]".cyan());
            check_patches(&config, &guard, plugin_version)
        } else {
            apply_patches(&config, &guard, plugin_version)
        };

        for (patch_id, result) in results {
            match result {
                Ok(PatchResult::Applied { ref file, .. }) => {
                    if dry_run {
                        println!(
                            "{} {}: Would update {}",
                            "✓".green(),
                            patch_id,
                            file.display()
                        );
                    } else {
                        println!(
                            "{} {}: Successfully updated {}",
                            "✓".green(),
                            patch_id,
                            file.display()
                        );
                    }
                    total_applied += 1;

                    if show_diff && !dry_run {
                        if let Some(before) = file_contents_before.get(file) {
                            if let Ok(after) = fs::read_to_string(file) {
                                if before != &after {
                                    display_diff(file, before, &after);
                                }
                            }
                        }
                    }
                }
                Ok(PatchResult::AlreadyApplied { file }) => {
                    println!(
                        "{} {}: Already applied to {}",
                        "⊙".yellow(),
                        patch_id,
                        file.display()
                    );
                    total_already_applied += 1;
                }
                Ok(PatchResult::NotFound { file, drift }) => {
                    println!(
                        "{} {}: Search text not found in {}",
                        "⊙".yellow(),
                        patch_id,
                        file.display()
                    );
                    if let Some(drift) = drift {
                        println!(
                            "  {}",
                            format!(
                                "closest match near line {} ({:.0}% similar): {}",
                                drift.line,
                                drift.similarity * 100.0,
                                drift.snippet
                            )
                            .dimmed()
                        );
                    }
                    total_not_found += 1;
                }
                Ok(PatchResult::SkippedVersion { reason }) => {
                    println!("{} {}: Skipped ({})", "⊘".cyan(), patch_id, reason);
                    total_skipped += 1;
                }
                Err(e) => {
                    eprintln!("{} {}: Error - {}", "✗".red(), patch_id, e);
                    if let ApplicationError::Safety(_) = e {
                        eprintln!("  {}", "Patch targets must stay inside the plugin root".red());
                    }
                    total_failed += 1;
                }
            }
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} not found", format!("{}", total_not_found).yellow());
    println!("  {} skipped", format!("{}", total_skipped).cyan());
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_status(root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let guard = RootGuard::new(&root)?;
    let patch_files = discover_patch_files(&root)?;
    let plugin_version = read_plugin_version(&root);

    println!("{}", "Patch Status Report".bold());
    println!("Plugin root: {}", root.display());
    println!("Plugin version: {}", plugin_version);
    println!();

    let mut applied = Vec::new();
    let mut not_applied = Vec::new();
    let mut skipped = Vec::new();

    for patch_file in patch_files {
        let config = load_from_path(&patch_file)?;
        let results = check_patches(&config, &guard, plugin_version);

        for (patch_id, result) in results {
            match result {
                Ok(PatchResult::Applied { .. }) => {
                    // Target still matches: the patch has not been run yet.
                    not_applied.push((patch_id, "target found but not yet patched".to_string()));
                }
                Ok(PatchResult::AlreadyApplied { .. }) => {
                    applied.push(patch_id);
                }
                Ok(PatchResult::NotFound { file, .. }) => {
                    not_applied.push((
                        patch_id,
                        format!("search text not found in {}", file.display()),
                    ));
                }
                Ok(PatchResult::SkippedVersion { reason }) => {
                    skipped.push((patch_id, reason));
                }
                Err(e) => {
                    not_applied.push((patch_id, e.to_string()));
                }
            }
        }
    }

    if !applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for id in &applied {
            println!("  - {}", id);
        }
        println!();
    }

    if !not_applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊙".yellow(),
            "NOT APPLIED".yellow().bold(),
            not_applied.len()
        );
        for (id, reason) in &not_applied {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    if !skipped.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊘".cyan(),
            "SKIPPED".cyan().bold(),
            skipped.len()
        );
        for (id, reason) in &skipped {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_verify(root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let guard = RootGuard::new(&root)?;
    let patch_files = discover_patch_files(&root)?;
    let plugin_version = read_plugin_version(&root);

    println!("{}", "Verifying patches...".bold());
    println!("Plugin root: {}", root.display());
    println!("Plugin version: {}", plugin_version);
    println!();

    let mut verified = 0;
    let mut mismatch = 0;
    let mut skipped = 0;

    for patch_file in patch_files {
        let config = load_from_path(&patch_file)?;
        let results = check_patches(&config, &guard, plugin_version);

        for (patch_id, result) in results {
            match result {
                Ok(PatchResult::AlreadyApplied { .. }) => {
                    println!("{} {}: Verified (already applied)", "✓".green(), patch_id);
                    verified += 1;
                }
                Ok(PatchResult::Applied { file, .. }) => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), patch_id);
                    eprintln!("  Expected: patch already applied");
                    eprintln!("  Found: patch not yet applied");
                    eprintln!("  Location: {}", file.display());
                    mismatch += 1;
                }
                Ok(PatchResult::NotFound { file, drift }) => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), patch_id);
                    eprintln!("  Neither search nor replacement text present");
                    eprintln!("  Location: {}", file.display());
                    if let Some(drift) = drift {
                        eprintln!(
                            "  Closest match near line {} ({:.0}% similar)",
                            drift.line,
                            drift.similarity * 100.0
                        );
                    }
                    mismatch += 1;
                }
                Ok(PatchResult::SkippedVersion { reason }) => {
                    println!("{} {}: Skipped ({})", "⊘".cyan(), patch_id, reason);
                    skipped += 1;
                }
                Err(ref e) => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), patch_id);
                    eprintln!("  Error: {}", e);
                    mismatch += 1;
                }
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} verified", format!("{}", verified).green());
    println!("  {} mismatch", format!("{}", mismatch).red());
    println!("  {} skipped", format!("{}", skipped).cyan());

    if mismatch > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let patch_files = discover_patch_files(&root)?;

    for patch_file in patch_files {
        let config = load_from_path(&patch_file)?;

        println!("{}", patch_file.display().to_string().bold());
        if !config.meta.name.is_empty() {
            println!("  name: {}", config.meta.name);
        }
        if let Some(description) = &config.meta.description {
            println!("  description: {}", description);
        }
        match (
            config.meta.min_plugin_version,
            config.meta.max_plugin_version,
        ) {
            (None, None) => {}
            (min, max) => println!(
                "  plugin version: {} ..= {}",
                min.map_or("*".to_string(), |v| v.to_string()),
                max.map_or("*".to_string(), |v| v.to_string()),
            ),
        }
        for patch in &config.patches {
            println!("  - {} ({})", patch.id, patch.file.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_logs(kind: LogKind, lines: usize, paths: Option<PathBuf>) -> Result<()> {
    let log_paths = match paths {
        Some(path) => LogPaths::from_path(&path)?,
        None => LogPaths::default(),
    };

    let report = tail_logs(&log_paths, kind, lines);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
