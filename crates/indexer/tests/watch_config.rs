//! Watch configuration, event screening and status reporting.

use factgraph_indexer::{
    check_watch_status, get_incremental_stats, handle_event, process_batch_events, ChangeEvent,
    EventDisposition, IndexAction, IndexerError, WatchConfig, WatchSettings,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn workspace_config(exclude: &[&str]) -> WatchConfig {
    WatchConfig::new(["/workspace"], true, exclude, 100, 500).unwrap()
}

#[test]
fn stats_reflect_configuration() {
    let config = WatchConfig::new(["/workspace"], true, &[".git"], 50, 300).unwrap();

    let stats = get_incremental_stats(&config);

    assert_eq!(stats.watched_paths, 1);
    assert_eq!(stats.exclusion_patterns, 1);
    assert_eq!(stats.batch_size, 50);
    assert_eq!(stats.debounce_ms, 300);
    assert!(stats.recursive);
}

#[test]
fn stats_serialize_with_stable_keys() {
    let config = WatchConfig::new(["/a", "/b"], false, &[], 10, 0).unwrap();
    let json = serde_json::to_value(get_incremental_stats(&config)).unwrap();

    assert_eq!(json["watched_paths"], 2);
    assert_eq!(json["exclusion_patterns"], 0);
    assert_eq!(json["debounce_ms"], 0);
    assert_eq!(json["recursive"], false);
}

#[test]
fn excluded_event_is_ignored() {
    let config = workspace_config(&["__pycache__"]);
    let event = ChangeEvent::created("/workspace/__pycache__/test.pyc");

    let disposition = handle_event(&event, &config);

    assert_eq!(disposition.status(), "ignored");
    assert_eq!(
        disposition,
        EventDisposition::Ignored {
            reason: "excluded_pattern".to_string(),
            pattern: Some("__pycache__".to_string()),
        }
    );
}

#[test]
fn admitted_event_is_queued_with_its_action() {
    let config = workspace_config(&["__pycache__"]);

    let disposition = handle_event(&ChangeEvent::deleted("/workspace/src/main.py"), &config);

    assert_eq!(
        disposition,
        EventDisposition::Queued {
            action: IndexAction::RemoveFromIndex,
            event_type: factgraph_indexer::ChangeKind::Deleted,
            file_path: PathBuf::from("/workspace/src/main.py"),
        }
    );
    let json = serde_json::to_value(&disposition).unwrap();
    assert_eq!(json["status"], "queued");
    assert_eq!(json["action"], "remove_from_index");
}

#[test]
fn empty_root_list_is_rejected() {
    let err = WatchConfig::new(Vec::<PathBuf>::new(), true, &[], 100, 500).unwrap_err();

    let IndexerError::InvalidWatchConfig(messages) = err else {
        panic!("expected InvalidWatchConfig, got {err:?}");
    };
    assert!(!messages.is_empty());
    assert!(messages.iter().any(|m| m.contains("No watch paths")));
}

#[test]
fn negative_batch_size_is_rejected() {
    let err = WatchConfig::new(["/workspace"], true, &[], -1, 500).unwrap_err();

    let IndexerError::InvalidWatchConfig(messages) = err else {
        panic!("expected InvalidWatchConfig, got {err:?}");
    };
    assert!(messages.iter().any(|m| m.contains("Batch size")));
}

#[test]
fn every_violation_is_reported() {
    let settings = WatchSettings {
        batch_size: 0,
        debounce_ms: -5,
        max_batch_wait_ms: 0,
        ..WatchSettings::default()
    };

    let messages = settings.validate();

    assert_eq!(messages.len(), 4, "{messages:?}");
}

#[test]
fn settings_parse_from_toml_with_defaults() {
    let settings: WatchSettings = toml::from_str(
        r#"
        roots = ["/workspace"]
        exclude = ["target", "*.log"]
        debounce_ms = 0
        "#,
    )
    .unwrap();

    let config = WatchConfig::try_from(settings).unwrap();

    assert_eq!(config.batch_size(), 100);
    assert!(config.debounce().is_zero());
    assert_eq!(config.exclude_patterns(), ["target", "*.log"]);
}

#[test]
fn batch_report_counts_each_disposition() {
    let config = workspace_config(&["node_modules", "*.tmp"]);
    let events = vec![
        ChangeEvent::created("/workspace/src/app.ts"),
        ChangeEvent::modified("/workspace/node_modules/x/index.js"),
        ChangeEvent::moved("/workspace/a.rs", "/workspace/b.rs"),
        ChangeEvent::created("/workspace/scratch.tmp"),
        ChangeEvent::modified("/elsewhere/file.rs"),
    ];

    let report = process_batch_events(&events, &config);

    assert_eq!(report.status, "batch_processed");
    assert_eq!(report.total_events, 5);
    assert_eq!(report.processed, 2);
    assert_eq!(report.ignored, 3);
    let statuses: Vec<&str> = report.details.iter().map(EventDisposition::status).collect();
    assert_eq!(statuses, ["queued", "ignored", "queued", "ignored", "ignored"]);
}

#[test]
fn watch_status_reports_missing_roots() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone");
    let config = WatchConfig::new([dir.path().to_path_buf(), missing.clone()], true, &[], 10, 0)
        .unwrap();

    let status = check_watch_status(&config);

    assert!(!status.is_ready());
    assert_eq!(status.status, "missing_roots");
    assert!(status.roots[0].exists && status.roots[0].is_dir);
    assert!(!status.roots[1].exists);

    std::fs::create_dir(&missing).unwrap();
    assert!(check_watch_status(&config).is_ready());
}
