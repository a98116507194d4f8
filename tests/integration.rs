use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn orx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("orx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about permits.\n\nIt lists the registers that hold them.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document describes organisations.\n\nContact info@acme.nl for corrections.",
    )
    .unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about publication.\n\nArchived copies are kept for seven years.",
    )
    .unwrap();
    fs::write(files_dir.join("skipped.log"), "not included").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/orx.sqlite"

[chunking]
chunk_size = 1000
chunk_overlap = 200

[entity_recognition]
enabled = true

[connectors.filesystem]
root = "{}/files"
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []
follow_symlinks = false
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("orx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_orx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = orx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run orx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn write_import(dir: &Path) -> PathBuf {
    let path = dir.join("objects.json");
    fs::write(
        &path,
        r#"{
            "schemas": [{"id": 1, "title": "Organisation", "description": "Legal entities"}],
            "registers": [{"id": 2, "title": "Publications"}],
            "objects": [
                {
                    "id": 10,
                    "uuid": "6f1d2f7e-0000-4000-8000-000000000010",
                    "schema": 1,
                    "register": 2,
                    "updated_at": "2024-05-01T12:00:00Z",
                    "data": {"name": "Acme", "address": {"city": "Utrecht"}}
                }
            ]
        }"#,
    )
    .unwrap();
    path
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_orx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_orx(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_orx(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_scan_records_matching_files() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_orx(&config_path, &["scan"]);
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files recorded: 3"), "{}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_scan_idempotent_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    run_orx(&config_path, &["scan"]);
    run_orx(&config_path, &["scan"]);

    let (stdout, _, success) = run_orx(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Sources:           3"), "{}", stdout);
}

#[test]
fn test_pending_extracts_everything_once() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    run_orx(&config_path, &["scan"]);

    let (stdout, stderr, success) = run_orx(&config_path, &["pending"]);
    assert!(success, "pending failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("processed: 3"), "{}", stdout);
    assert!(stdout.contains("failed: 0"));

    let (stdout, _, _) = run_orx(&config_path, &["pending"]);
    assert!(stdout.contains("total: 0"), "second run should find nothing: {}", stdout);
}

#[test]
fn test_pending_picks_up_modified_file() {
    let (tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    run_orx(&config_path, &["scan"]);
    run_orx(&config_path, &["pending"]);

    // Modification times have second precision.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    fs::write(
        tmp.path().join("files").join("alpha.md"),
        "# Alpha Document Updated\n\nThis file was modified.",
    )
    .unwrap();
    run_orx(&config_path, &["scan"]);

    let (stdout, _, _) = run_orx(&config_path, &["pending"]);
    assert!(stdout.contains("processed: 1"), "{}", stdout);
}

#[test]
fn test_extract_then_up_to_date() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    run_orx(&config_path, &["scan"]);

    let (stdout, stderr, success) = run_orx(&config_path, &["extract", "file", "1"]);
    assert!(success, "extract failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("status: extracted"));
    assert!(stdout.contains("chunks: 1"));

    let (stdout, _, success) = run_orx(&config_path, &["extract", "file", "1"]);
    assert!(success);
    assert!(stdout.contains("status: up to date"), "{}", stdout);

    let (stdout, _, success) = run_orx(&config_path, &["extract", "file", "1", "--force"]);
    assert!(success);
    assert!(stdout.contains("status: extracted"));
}

#[test]
fn test_extract_reports_entities() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    run_orx(&config_path, &["scan"]);

    // Files are recorded in path order: alpha, beta, gamma.
    let (stdout, _, success) = run_orx(&config_path, &["extract", "file", "2"]);
    assert!(success);
    assert!(stdout.contains("entities: 1"), "{}", stdout);
}

#[test]
fn test_extract_missing_source() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);

    let (_, stderr, success) = run_orx(&config_path, &["extract", "file", "99"]);
    assert!(!success, "extract of a missing file should fail");
    assert!(stderr.contains("not found"), "Should report not found, got: {}", stderr);
}

#[test]
fn test_extract_unknown_source_type() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    let (_, stderr, success) = run_orx(&config_path, &["extract", "email", "1"]);
    assert!(!success, "Unknown source type should fail");
    assert!(stderr.contains("unknown source type"), "{}", stderr);
}

#[test]
fn test_get_chunks() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    run_orx(&config_path, &["scan"]);
    run_orx(&config_path, &["extract", "file", "1"]);

    let (stdout, _, success) = run_orx(&config_path, &["get", "file", "1"]);
    assert!(success, "get should succeed");
    assert!(stdout.contains("--- file:1 ---"));
    assert!(stdout.contains("[chunk -1]"));
    assert!(stdout.contains("[chunk 0]"));
    assert!(stdout.contains("alpha document about permits"));
}

#[test]
fn test_get_chunks_json() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    run_orx(&config_path, &["scan"]);
    run_orx(&config_path, &["extract", "file", "3"]);

    let (stdout, _, success) = run_orx(&config_path, &["get", "file", "3", "--json"]);
    assert!(success);
    let chunks: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let chunks = chunks.as_array().unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0]["index"], -1);
    assert_eq!(chunks[0]["position"]["type"], "metadata");
    assert_eq!(chunks[1]["position"]["type"], "text-range");
}

#[test]
fn test_get_without_chunks() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);

    let (_, stderr, success) = run_orx(&config_path, &["get", "file", "1"]);
    assert!(!success, "get without chunks should fail");
    assert!(stderr.contains("no chunks"), "got: {}", stderr);
}

#[test]
fn test_import_and_extract_object() {
    let (tmp, config_path) = setup_test_env();
    let import = write_import(tmp.path());

    run_orx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_orx(&config_path, &["import", import.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("objects: 1"));

    let (stdout, _, success) = run_orx(&config_path, &["extract", "object", "10"]);
    assert!(success, "{}", stdout);

    let (stdout, _, _) = run_orx(&config_path, &["get", "object", "10"]);
    assert!(stdout.contains("name: Acme"), "{}", stdout);
    assert!(stdout.contains("address.city: Utrecht"));
    assert!(stdout.contains("Schema: Organisation"));
    assert!(stdout.contains("property-path"));
}

#[test]
fn test_discover_reports_untracked() {
    let (tmp, config_path) = setup_test_env();
    let import = write_import(tmp.path());

    run_orx(&config_path, &["init"]);
    run_orx(&config_path, &["scan"]);
    run_orx(&config_path, &["import", import.to_str().unwrap()]);

    let (stdout, _, success) = run_orx(&config_path, &["discover", "--limit", "10"]);
    assert!(success);
    assert!(stdout.contains("discovered: 4"), "{}", stdout);

    let (stdout, _, _) = run_orx(&config_path, &["pending", "--limit", "1"]);
    assert!(stdout.contains("total: 1"), "{}", stdout);
}

#[test]
fn test_retry_with_empty_ledger() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    let (stdout, _, success) = run_orx(&config_path, &["retry"]);
    assert!(success);
    assert!(stdout.contains("retried: 0"));
    assert!(stdout.contains("total: 0"));
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();

    run_orx(&config_path, &["init"]);
    run_orx(&config_path, &["scan"]);
    run_orx(&config_path, &["pending"]);

    let (stdout, _, success) = run_orx(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Sources:           3"), "{}", stdout);
    assert!(stdout.contains("Chunked:           3 (100%)"), "{}", stdout);
    assert!(stdout.contains("Chunks:            6"), "{}", stdout);
    assert!(stdout.contains("Entities:          1"), "{}", stdout);
}

#[test]
fn test_chunk_without_config() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("input.txt");
    fs::write(&input, "Hello world. This is a test.").unwrap();

    let missing = tmp.path().join("missing.toml");
    let (stdout, stderr, success) = run_orx(
        &missing,
        &[
            "chunk",
            input.to_str().unwrap(),
            "--chunk-size",
            "15",
            "--overlap",
            "0",
            "--strategy",
            "fixed_size",
        ],
    );
    assert!(success, "chunk failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("--- 2 spans"), "{}", stdout);
    assert!(stdout.contains("Hello world."));
}

#[test]
fn test_chunk_rejects_bad_overlap() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("input.txt");
    fs::write(&input, "Some text").unwrap();

    let (_, stderr, success) = run_orx(
        &tmp.path().join("missing.toml"),
        &["chunk", input.to_str().unwrap(), "--chunk-size", "10", "--overlap", "10"],
    );
    assert!(!success);
    assert!(stderr.contains("--overlap"), "{}", stderr);
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_orx(&tmp.path().join("missing.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}
