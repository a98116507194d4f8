//! SQLite store tests: chunk replacement, the untracked query, the
//! failure ledger, statistics and pattern entity recognition.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use openregister_extract::config::{self, Config};
use openregister_extract::extract_cmd::build_service;
use openregister_extract::models::{ExtractionOutcome, FileRecord, SourceKey};
use openregister_extract::sqlite_store::SqliteStore;
use openregister_extract::store::{ChunkStore, CountTarget, FileCatalog};

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn write_config(root: &Path, recognition: bool) -> Config {
    let content = format!(
        r#"[db]
path = "{root}/orx.sqlite"

[entity_recognition]
enabled = {recognition}
"#,
        root = root.display(),
        recognition = recognition
    );
    let path = root.join("orx.toml");
    fs::write(&path, content).unwrap();
    config::load_config(&path).unwrap()
}

async fn setup(recognition: bool) -> (TempDir, Config, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), recognition);
    let store = SqliteStore::open(&config.db.path).await.unwrap();
    (tmp, config, store)
}

async fn add_file(store: &SqliteStore, dir: &Path, name: &str, content: &str) -> i64 {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    store
        .upsert_file(&FileRecord {
            id: 0,
            path: path.to_string_lossy().to_string(),
            name: name.to_string(),
            mime_type: "text/plain".into(),
            size: content.len() as u64,
            modified_at: Some(t0()),
            owner: None,
            organisation: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn extraction_round_trips_through_sqlite() {
    let (tmp, config, store) = setup(false).await;
    let id = add_file(&store, tmp.path(), "notes.txt", &"Register entry text. ".repeat(120)).await;
    let service = build_service(&config, &store);

    let outcome = service.extract_source("file", id, false).await.unwrap();
    let ExtractionOutcome::Extracted { chunks, .. } = outcome else {
        panic!("expected extraction");
    };
    assert!(chunks >= 2);

    let stored = store.chunks_for_source(&SourceKey::file(id)).await.unwrap();
    assert_eq!(stored.len(), chunks + 1);
    assert!(stored[0].is_metadata());
    assert!(stored.iter().all(|c| c.id.is_some()));
    assert!(stored.iter().all(|c| c.created_at == t0()));
    let indices: Vec<i64> = stored.iter().skip(1).map(|c| c.chunk_index).collect();
    assert_eq!(indices, (0..chunks as i64).collect::<Vec<_>>());

    let again = service.extract_source("file", id, false).await.unwrap();
    assert_eq!(again, ExtractionOutcome::UpToDate);
    let unchanged = store.chunks_for_source(&SourceKey::file(id)).await.unwrap();
    assert_eq!(stored, unchanged);
}

#[tokio::test]
async fn failed_replacement_rolls_back() {
    let (tmp, config, store) = setup(false).await;
    let id = add_file(&store, tmp.path(), "a.txt", "Original content of the file.").await;
    let service = build_service(&config, &store);
    service.extract_source("file", id, false).await.unwrap();

    let key = SourceKey::file(id);
    let before = store.chunks_for_source(&key).await.unwrap();

    // Two chunks with the same index violate the unique constraint on insert.
    let mut first = before[1].clone();
    first.uuid = "dup-1".into();
    first.text_content = "replacement".into();
    let mut second = first.clone();
    second.uuid = "dup-2".into();
    let err = store.replace_chunks(&key, &[first, second]).await;
    assert!(err.is_err());

    let after = store.chunks_for_source(&key).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn untracked_sources_follow_modification_time_and_ledger() {
    let (tmp, config, store) = setup(false).await;
    let a = add_file(&store, tmp.path(), "a.txt", "Alpha file content.").await;
    let b = add_file(&store, tmp.path(), "b.txt", "Beta file content.").await;

    let untracked = store.untracked_sources(10).await.unwrap();
    assert_eq!(untracked, vec![SourceKey::file(a), SourceKey::file(b)]);

    let service = build_service(&config, &store);
    service.extract_source("file", a, false).await.unwrap();
    assert_eq!(store.untracked_sources(10).await.unwrap(), vec![SourceKey::file(b)]);

    // Touch `a`: its chunks now predate the source.
    let mut record = store.find_file(a).await.unwrap().unwrap();
    record.modified_at = Some(t0() + Duration::seconds(10));
    store.upsert_file(&record).await.unwrap();
    assert_eq!(
        store.untracked_sources(10).await.unwrap(),
        vec![SourceKey::file(a), SourceKey::file(b)]
    );

    store
        .record_failure(&SourceKey::file(b), "not_extractable: test")
        .await
        .unwrap();
    assert_eq!(store.untracked_sources(10).await.unwrap(), vec![SourceKey::file(a)]);
    assert_eq!(store.untracked_sources(0).await.unwrap(), Vec::<SourceKey>::new());
}

#[tokio::test]
async fn failure_ledger_keeps_first_failure_order() {
    let (_tmp, _config, store) = setup(false).await;
    let first = SourceKey::object(5);
    let second = SourceKey::file(2);

    store.record_failure(&first, "not_found: gone").await.unwrap();
    store.record_failure(&second, "conversion_failed: bad").await.unwrap();
    store.record_failure(&first, "not_found: still gone").await.unwrap();

    assert_eq!(
        store.failed_sources(10).await.unwrap(),
        vec![first.clone(), second.clone()]
    );
    assert_eq!(store.count(CountTarget::FailedSources).await.unwrap(), 2);

    let attempts: i64 = sqlx::query_scalar(
        "SELECT attempts FROM extraction_failures WHERE source_type = 'object' AND source_id = 5",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(attempts, 2);

    store.clear_failure(&first).await.unwrap();
    assert_eq!(store.failed_sources(10).await.unwrap(), vec![second]);
}

#[tokio::test]
async fn stats_survive_missing_entity_tables() {
    let (tmp, config, store) = setup(false).await;
    let id = add_file(&store, tmp.path(), "a.txt", "Some text to count.").await;
    add_file(&store, tmp.path(), "b.txt", "More text to count.").await;

    sqlx::query("DROP TABLE entity_relations")
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("DROP TABLE entities")
        .execute(store.pool())
        .await
        .unwrap();

    let service = build_service(&config, &store);
    service.extract_source("file", id, false).await.unwrap();

    let stats = service.stats().await;
    assert_eq!(stats.total_sources, 2);
    assert_eq!(stats.chunked_sources, 1);
    assert_eq!(stats.untracked_sources, 1);
    assert_eq!(stats.total_chunks, 2);
    assert_eq!(stats.entities, 0);
    assert_eq!(stats.entity_relations, 0);
}

#[tokio::test]
async fn pattern_recognizer_links_entities_to_chunks() {
    let (tmp, config, store) = setup(true).await;
    let id = add_file(
        &store,
        tmp.path(),
        "contact.txt",
        "Questions? Mail info@acme.nl or visit https://acme.nl/contact today.",
    )
    .await;
    let service = build_service(&config, &store);

    let outcome = service.extract_source("file", id, false).await.unwrap();
    let ExtractionOutcome::Extracted { entities, .. } = outcome else {
        panic!("expected extraction");
    };
    let summary = entities.expect("recognition summary");
    assert_eq!(summary.entities_found, 2);
    assert_eq!(summary.relations_created, 2);

    // Forced re-extraction replaces the relations instead of adding to them.
    service.extract_source("file", id, true).await.unwrap();
    assert_eq!(store.count(CountTarget::Entities).await.unwrap(), 2);
    assert_eq!(store.count(CountTarget::EntityRelations).await.unwrap(), 2);
}

#[tokio::test]
async fn unavailable_recognition_method_does_not_fail_extraction() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("orx.toml");
    fs::write(
        &path,
        format!(
            "[db]\npath = \"{}/orx.sqlite\"\n\n[entity_recognition]\nenabled = true\nmethod = \"llm\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();
    let config = config::load_config(&path).unwrap();
    let store = SqliteStore::open(&config.db.path).await.unwrap();
    let id = add_file(&store, tmp.path(), "a.txt", "Mail info@acme.nl").await;

    let outcome = build_service(&config, &store)
        .extract_source("file", id, false)
        .await
        .unwrap();
    match outcome {
        ExtractionOutcome::Extracted { entities, .. } => assert!(entities.is_none()),
        other => panic!("unexpected outcome {:?}", other),
    }
}
