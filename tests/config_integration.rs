//! Integration tests for patch set loading and application
//!
//! Tests version gating, idempotency classification, drift reporting, and
//! root boundary enforcement through the public API.

use moodle_patcher::config::{
    apply_patches, check_patches, load_from_str, ApplicationError, Metadata, PatchConfig,
    PatchDefinition, PatchResult,
};
use moodle_patcher::safety::RootGuard;
use std::fs;
use tempfile::TempDir;

const PLUGIN_VERSION: u64 = 2025112703;

/// Helper to create a plugin tree with one patchable PHP file
fn setup_test_plugin() -> TempDir {
    let dir = TempDir::new().unwrap();

    fs::write(
        dir.path().join("ajax_send_report.php"),
        "<?php\n$status_label = 'No attempt';\necho $status_label;\n",
    )
    .unwrap();

    fs::write(
        dir.path().join("ajax_email_report.php"),
        "<?php\nif ($lang === 'ko' && $report_ko) {\n    $report_to_send = $report_ko;\n}\n",
    )
    .unwrap();

    dir
}

fn definition(id: &str, file: &str, search: &str, replace: &str) -> PatchDefinition {
    PatchDefinition {
        id: id.to_string(),
        file: file.to_string(),
        search: search.to_string(),
        replace: replace.to_string(),
    }
}

fn root_relative_config(patches: Vec<PatchDefinition>) -> PatchConfig {
    PatchConfig {
        meta: Metadata {
            root_relative: true,
            ..Metadata::default()
        },
        patches,
    }
}

#[test]
fn test_load_patch_set_from_toml() {
    let toml = r#"
[meta]
name = "status-labels"
description = "Status label passthrough"
min_plugin_version = 2025010100
root_relative = true

[[patches]]
id = "pass-status-through"
file = "ajax_send_report.php"
search = "$status_label = 'No attempt';"
replace = "$status_label = $r->status ?? 'No attempt';"
"#;

    let config = load_from_str(toml).expect("failed to parse patch set");

    assert_eq!(config.meta.name, "status-labels");
    assert_eq!(config.meta.min_plugin_version, Some(2025010100));
    assert!(config.meta.root_relative);
    assert_eq!(config.patches.len(), 1);
    assert_eq!(config.patches[0].id, "pass-status-through");
}

#[test]
fn test_apply_then_reapply() {
    let plugin = setup_test_plugin();
    let guard = RootGuard::new(plugin.path()).unwrap();

    let config = root_relative_config(vec![definition(
        "pass-status-through",
        "ajax_send_report.php",
        "$status_label = 'No attempt';",
        "$status_label = $r->status ?? 'No attempt';",
    )]);

    let results = apply_patches(&config, &guard, PLUGIN_VERSION);
    assert!(matches!(
        results[0].1,
        Ok(PatchResult::Applied { occurrences: 1, .. })
    ));

    let content = fs::read_to_string(plugin.path().join("ajax_send_report.php")).unwrap();
    assert!(content.contains("$r->status ?? 'No attempt'"));

    // Second run classifies as already applied, leaves the file alone
    let results = apply_patches(&config, &guard, PLUGIN_VERSION);
    assert!(matches!(results[0].1, Ok(PatchResult::AlreadyApplied { .. })));
    assert_eq!(
        fs::read_to_string(plugin.path().join("ajax_send_report.php")).unwrap(),
        content
    );
}

#[test]
fn test_drifted_target_reports_not_found_with_hint() {
    let plugin = setup_test_plugin();
    let guard = RootGuard::new(plugin.path()).unwrap();

    let config = root_relative_config(vec![definition(
        "pass-status-through",
        "ajax_send_report.php",
        "$status_label = 'No attempts';", // plural - does not occur
        "$status_label = $r->status;",
    )]);

    let results = apply_patches(&config, &guard, PLUGIN_VERSION);
    match &results[0].1 {
        Ok(PatchResult::NotFound { drift, .. }) => {
            let drift = drift.as_ref().expect("expected a drift hint");
            assert_eq!(drift.line, 2);
            assert!(drift.similarity > 0.8);
        }
        other => panic!("expected NotFound, got {other:?}"),
    }

    // No-op safety: the file is untouched
    let content = fs::read_to_string(plugin.path().join("ajax_send_report.php")).unwrap();
    assert!(content.contains("$status_label = 'No attempt';"));
}

#[test]
fn test_version_gate_skips_set() {
    let plugin = setup_test_plugin();
    let guard = RootGuard::new(plugin.path()).unwrap();

    let config = PatchConfig {
        meta: Metadata {
            root_relative: true,
            min_plugin_version: Some(2026010100),
            ..Metadata::default()
        },
        patches: vec![definition(
            "pass-status-through",
            "ajax_send_report.php",
            "$status_label = 'No attempt';",
            "$status_label = $r->status;",
        )],
    };

    let results = apply_patches(&config, &guard, PLUGIN_VERSION);
    match &results[0].1 {
        Ok(PatchResult::SkippedVersion { reason }) => {
            assert!(reason.contains("below min_plugin_version"));
        }
        other => panic!("expected SkippedVersion, got {other:?}"),
    }

    // Gated sets never touch the tree
    let content = fs::read_to_string(plugin.path().join("ajax_send_report.php")).unwrap();
    assert!(content.contains("'No attempt'"));
}

#[test]
fn test_check_patches_is_read_only() {
    let plugin = setup_test_plugin();
    let guard = RootGuard::new(plugin.path()).unwrap();
    let before = fs::read_to_string(plugin.path().join("ajax_send_report.php")).unwrap();

    let config = root_relative_config(vec![definition(
        "pass-status-through",
        "ajax_send_report.php",
        "$status_label = 'No attempt';",
        "$status_label = $r->status;",
    )]);

    let results = check_patches(&config, &guard, PLUGIN_VERSION);
    assert!(matches!(
        results[0].1,
        Ok(PatchResult::Applied { occurrences: 1, .. })
    ));

    let after = fs::read_to_string(plugin.path().join("ajax_send_report.php")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_missing_target_is_io_error() {
    let plugin = setup_test_plugin();
    let guard = RootGuard::new(plugin.path()).unwrap();

    let config = root_relative_config(vec![definition(
        "ghost",
        "does_not_exist.php",
        "a",
        "b",
    )]);

    let results = apply_patches(&config, &guard, PLUGIN_VERSION);
    match &results[0].1 {
        Err(ApplicationError::Io { path, .. }) => {
            assert!(path.ends_with("does_not_exist.php"));
        }
        other => panic!("expected Io error, got {other:?}"),
    }
}

#[test]
fn test_target_outside_root_is_refused() {
    let outer = TempDir::new().unwrap();
    let root = outer.path().join("plugin");
    fs::create_dir_all(&root).unwrap();
    let guard = RootGuard::new(&root).unwrap();

    let outside = outer.path().join("outside.php");
    fs::write(&outside, "<?php\ntarget text\n").unwrap();

    let config = root_relative_config(vec![definition(
        "escape",
        outside.to_str().unwrap(),
        "target text",
        "patched text",
    )]);

    let results = apply_patches(&config, &guard, PLUGIN_VERSION);
    assert!(matches!(
        results[0].1,
        Err(ApplicationError::Safety(_))
    ));

    // Refused patches write nothing
    assert_eq!(
        fs::read_to_string(&outside).unwrap(),
        "<?php\ntarget text\n"
    );
}

#[test]
fn test_multiple_patches_in_order() {
    let plugin = setup_test_plugin();
    let guard = RootGuard::new(plugin.path()).unwrap();

    let config = root_relative_config(vec![
        definition(
            "pass-status-through",
            "ajax_send_report.php",
            "$status_label = 'No attempt';",
            "$status_label = $r->status ?? 'No attempt';",
        ),
        definition(
            "korean-profile-value",
            "ajax_email_report.php",
            "$lang === 'ko' && $report_ko",
            "($lang === 'ko' || $lang === 'Korean') && $report_ko",
        ),
    ]);

    let results = apply_patches(&config, &guard, PLUGIN_VERSION);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "pass-status-through");
    assert_eq!(results[1].0, "korean-profile-value");
    assert!(matches!(results[0].1, Ok(PatchResult::Applied { .. })));
    assert!(matches!(results[1].1, Ok(PatchResult::Applied { .. })));

    let email = fs::read_to_string(plugin.path().join("ajax_email_report.php")).unwrap();
    assert!(email.contains("$lang === 'Korean'"));
}
