//! Database builder tests
//!
//! Builds indexes over real run directories produced by the logger and
//! checks scanning, schema derivation, index reuse, and refresh.

use std::collections::BTreeMap;
use std::path::Path;

use bitacora::logger::{ArtifactValue, LoggerOptions, RunLogger, RunStatus};
use bitacora::reader::{BuildOptions, Database, FieldType, DATABASE_FILE};
use bitacora::value::Scalar;
use bitacora::Error;

fn log_run(parent: &Path, lr: f64, seed: i64, status: RunStatus) -> u64 {
    let config = serde_json::json!({"lr": lr, "seed": seed});
    let mut logger = RunLogger::create(parent, &config, LoggerOptions::new()).unwrap();
    let mut record = BTreeMap::new();
    record.insert("loss".to_string(), Scalar::Float(lr * 10.0));
    logger.log_metrics(&record, "train").unwrap();
    logger.finalize(status).unwrap();
    logger.run_id()
}

#[test]
fn test_build_indexes_all_runs() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, RunStatus::Complete);
    log_run(parent.path(), 0.2, 2, RunStatus::Failed);

    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();
    assert_eq!(db.len(), 2);
    assert_eq!(db.run_ids(), vec![1, 2]);
    assert!(parent.path().join(DATABASE_FILE).exists());
}

#[test]
fn test_schema_field_types() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, RunStatus::Complete);

    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();
    let fields = db.fields();
    assert_eq!(fields.get("config.lr"), Some(FieldType::Float));
    assert_eq!(fields.get("config.seed"), Some(FieldType::Int));
    assert_eq!(fields.get("info.status"), Some(FieldType::Str));
    assert_eq!(fields.get("train.loss"), Some(FieldType::Metric));

    let searchable = db.searchable();
    assert!(searchable.contains("config.lr"));
    assert!(!searchable.contains("train.loss"));
}

#[test]
fn test_artifact_fields_indexed() {
    let parent = tempfile::tempdir().unwrap();
    let config = serde_json::json!({"lr": 0.1});
    let logger = RunLogger::create(parent.path(), &config, LoggerOptions::new()).unwrap();
    logger
        .log_artifact(
            &ArtifactValue::Json(serde_json::json!({"note": "hi"})),
            "notes",
            "json",
        )
        .unwrap();

    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();
    assert_eq!(db.fields().get("artifacts.json"), Some(FieldType::Artifact));
}

#[test]
fn test_existing_index_is_reused_until_refresh() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, RunStatus::Complete);
    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();
    assert_eq!(db.len(), 1);

    log_run(parent.path(), 0.2, 2, RunStatus::Complete);

    // Stale by design: the persisted index answers until refreshed.
    let stale = Database::build(parent.path(), BuildOptions::new()).unwrap();
    assert_eq!(stale.len(), 1);

    let fresh = Database::build(parent.path(), BuildOptions::new().refresh(true)).unwrap();
    assert_eq!(fresh.len(), 2);
}

#[test]
fn test_dst_dir_keeps_parent_clean() {
    let parent = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, RunStatus::Complete);

    let db = Database::build(parent.path(), BuildOptions::new().dst_dir(dst.path())).unwrap();
    assert_eq!(db.len(), 1);
    assert!(dst.path().join(DATABASE_FILE).exists());
    assert!(!parent.path().join(DATABASE_FILE).exists());
}

#[test]
fn test_scan_skips_directories_without_metadata() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, RunStatus::Complete);
    // A run mid-creation and a stray non-numeric directory.
    std::fs::create_dir(parent.path().join("2")).unwrap();
    std::fs::create_dir(parent.path().join("notes")).unwrap();

    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();
    assert_eq!(db.run_ids(), vec![1]);
}

#[test]
fn test_conflicting_field_types_fail_loudly() {
    let parent = tempfile::tempdir().unwrap();
    let mut a = RunLogger::create(
        parent.path(),
        &serde_json::json!({"tag": "baseline"}),
        LoggerOptions::new(),
    )
    .unwrap();
    a.finalize(RunStatus::Complete).unwrap();
    let mut b = RunLogger::create(
        parent.path(),
        &serde_json::json!({"tag": 3}),
        LoggerOptions::new(),
    )
    .unwrap();
    b.finalize(RunStatus::Complete).unwrap();

    let err = Database::build(parent.path(), BuildOptions::new()).unwrap_err();
    assert!(matches!(err, Error::SchemaConflict { .. }));
}

#[test]
fn test_int_and_float_observations_widen() {
    let parent = tempfile::tempdir().unwrap();
    let mut a = RunLogger::create(
        parent.path(),
        &serde_json::json!({"lr": 1}),
        LoggerOptions::new(),
    )
    .unwrap();
    a.finalize(RunStatus::Complete).unwrap();
    let mut b = RunLogger::create(
        parent.path(),
        &serde_json::json!({"lr": 0.5}),
        LoggerOptions::new(),
    )
    .unwrap();
    b.finalize(RunStatus::Complete).unwrap();

    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();
    assert_eq!(db.fields().get("config.lr"), Some(FieldType::Float));
}

#[test]
fn test_nested_config_is_flattened() {
    let parent = tempfile::tempdir().unwrap();
    let config = serde_json::json!({"optimizer": {"name": "sgd", "momentum": 0.9}});
    let mut logger = RunLogger::create(parent.path(), &config, LoggerOptions::new()).unwrap();
    logger.finalize(RunStatus::Complete).unwrap();

    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();
    assert_eq!(
        db.fields().get("config.optimizer.name"),
        Some(FieldType::Str)
    );
    assert_eq!(
        db.fields().get("config.optimizer.momentum"),
        Some(FieldType::Float)
    );
}
