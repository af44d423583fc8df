use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn factgraph(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("factgraph").unwrap();
    cmd.arg("--config").arg(config).env("RUST_LOG", "warn");
    cmd
}

fn workspace() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::create_dir_all(dir.path().join("target")).unwrap();
    std::fs::write(src.join("parser.rs"), "struct Parser reads Tokens from Lexer").unwrap();
    std::fs::write(dir.path().join("target/build.log"), "Ignored Output").unwrap();

    let config = dir.path().join("factgraph.toml");
    std::fs::write(
        &config,
        r#"
snapshot = "state/graph.ttl"

[watch]
roots = ["."]
exclude = ["target", "state", "factgraph.toml"]
debounce_ms = 0

[graph]
type = "rdf"
base_uri = "http://example.org/"
"#,
    )
    .unwrap();
    (dir, config)
}

#[test]
fn stats_prints_watch_statistics() {
    let (_dir, config) = workspace();

    let output = factgraph(&config).arg("stats").output().unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stats: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["watched_paths"], 1);
    assert_eq!(stats["exclusion_patterns"], 3);
    assert_eq!(stats["debounce_ms"], 0);
}

#[test]
fn watch_once_then_export_and_visualize() {
    let (dir, config) = workspace();

    let output = factgraph(&config).args(["watch", "--once"]).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(report["graph_triples"].as_u64().unwrap() > 0);
    assert!(dir.path().join("state/graph.ttl").is_file());

    let output = factgraph(&config).arg("export").output().unwrap();
    assert!(output.status.success());
    let turtle = String::from_utf8(output.stdout).unwrap();
    assert!(turtle.contains("<http://example.org/Parser>"));
    assert!(!turtle.contains("Ignored"));

    let output = factgraph(&config)
        .args(["export", "--format", "json-ld"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json.to_string().contains("Lexer"));

    let output = factgraph(&config)
        .args(["visualize", "--format", "mermaid"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let diagram = String::from_utf8(output.stdout).unwrap();
    assert!(diagram.starts_with("graph TD"));
}

#[test]
fn invalid_watch_settings_fail_with_messages() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("factgraph.toml");
    std::fs::write(&config, "[watch]\nroots = [\".\"]\nbatch_size = -1\n").unwrap();

    let output = factgraph(&config).arg("stats").output().unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Batch size must be positive"), "{stderr}");
}

#[test]
fn unknown_export_format_is_rejected() {
    let (_dir, config) = workspace();

    let output = factgraph(&config)
        .args(["export", "--format", "yaml"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("yaml"));
}
