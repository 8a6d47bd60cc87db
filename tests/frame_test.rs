//! Lazy frame tests over real run directories
//!
//! Verifies that metric streams and artifacts are materialized from disk
//! only on first access and memoized afterwards, and that grouping and
//! aggregation work end to end over logged data.

use std::collections::BTreeMap;
use std::path::Path;

use bitacora::logger::{ArtifactValue, LoggerOptions, RunLogger, RunStatus, METRICS_DIR};
use bitacora::reader::frame::FieldData;
use bitacora::reader::{BuildOptions, Database};
use bitacora::value::Scalar;
use bitacora::Reduction;

fn log_run(parent: &Path, lr: f64, seed: i64, losses: &[f64]) -> u64 {
    let config = serde_json::json!({"lr": lr, "seed": seed});
    let mut logger = RunLogger::create(parent, &config, LoggerOptions::new()).unwrap();
    for loss in losses {
        let mut record = BTreeMap::new();
        record.insert("loss".to_string(), Scalar::Float(*loss));
        logger.log_metrics(&record, "train").unwrap();
    }
    logger.finalize(RunStatus::Complete).unwrap();
    logger.run_id()
}

#[test]
fn test_metric_series_materialized_from_disk() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, &[1.0, 0.5]);
    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();

    let frame = db.all();
    let series = frame.get(0).unwrap().get("train.loss").unwrap();
    assert_eq!(
        series,
        FieldData::Series(vec![Scalar::Float(1.0), Scalar::Float(0.5)])
    );
}

#[test]
fn test_metric_access_is_memoized() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, &[1.0, 0.5]);
    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();

    let frame = db.all();
    let row = frame.get(0).unwrap();
    let first = row.get("train.loss").unwrap();

    // Deleting the backing file proves the second access reads the memo.
    std::fs::remove_file(
        parent
            .path()
            .join("1")
            .join(METRICS_DIR)
            .join("train.jsonl"),
    )
    .unwrap();
    assert_eq!(row.get("train.loss").unwrap(), first);
}

#[test]
fn test_memo_is_shared_with_derived_frames() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, &[1.0]);
    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();

    let frame = db.all();
    frame.get(0).unwrap().get("train.loss").unwrap();
    std::fs::remove_file(
        parent
            .path()
            .join("1")
            .join(METRICS_DIR)
            .join("train.jsonl"),
    )
    .unwrap();

    // Filtering shares rows, and with them the memoized stream.
    let filtered = frame.filter("config.lr == 0.1").unwrap();
    assert_eq!(
        filtered.get(0).unwrap().get("train.loss").unwrap(),
        FieldData::Series(vec![Scalar::Float(1.0)])
    );
}

#[test]
fn test_groupby_aggregate_over_logged_metrics() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, &[1.0, 0.0]);
    log_run(parent.path(), 0.1, 2, &[2.0, 0.0]);
    log_run(parent.path(), 0.01, 1, &[3.0, 1.0]);
    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();

    let summary = db
        .all()
        .groupby(&["config.lr"])
        .unwrap()
        .aggregate(&[(Reduction::Mean, "train.loss")])
        .unwrap();
    assert_eq!(summary.len(), 2);

    let first = summary.get(0).unwrap();
    assert_eq!(
        first.get("config.lr").unwrap(),
        FieldData::Scalar(Scalar::Float(0.1))
    );
    assert_eq!(
        first.get("mean.train.loss").unwrap(),
        FieldData::Series(vec![Scalar::Float(1.5), Scalar::Float(0.0)])
    );
}

#[test]
fn test_filter_with_over_logged_metric_stream() {
    let parent = tempfile::tempdir().unwrap();
    let converged = log_run(parent.path(), 0.1, 1, &[1.0, 0.2, 0.05]);
    log_run(parent.path(), 0.5, 2, &[1.0, 2.0, 4.0]);
    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();

    // Keep runs whose final loss dropped below 0.1; the predicate sees the
    // materialized series, not just indexed metadata.
    let kept = db
        .all()
        .filter_with("train.loss", |data| {
            data.as_series()
                .and_then(|series| series.last())
                .and_then(Scalar::as_f64)
                .is_some_and(|last| last < 0.1)
        })
        .unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept.get(0).unwrap().run_id(), Some(converged));
}

#[test]
fn test_diff_over_indexed_runs() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, &[1.0]);
    log_run(parent.path(), 0.1, 2, &[1.0]);
    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();

    assert_eq!(db.all().diff("config."), vec!["config.seed".to_string()]);
}

#[test]
fn test_artifact_handles_load_lazily() {
    let parent = tempfile::tempdir().unwrap();
    let config = serde_json::json!({"lr": 0.1});
    let mut logger = RunLogger::create(parent.path(), &config, LoggerOptions::new()).unwrap();
    let payload = serde_json::json!({"accuracy": 0.93});
    logger
        .log_artifact(&ArtifactValue::Json(payload.clone()), "metrics_summary", "json")
        .unwrap();
    logger.finalize(RunStatus::Complete).unwrap();

    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();
    let frame = db.all();
    let field = frame.get(0).unwrap().get("artifacts.json").unwrap();
    let handles = field.as_artifacts().unwrap();
    assert_eq!(handles.len(), 1);
    let value = handles["metrics_summary"].load().unwrap();
    assert_eq!(value.as_json().unwrap(), &payload);
}

#[test]
fn test_sort_by_scalar_field() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.2, 1, &[1.0]);
    log_run(parent.path(), 0.05, 2, &[1.0]);
    log_run(parent.path(), 0.1, 3, &[1.0]);
    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();

    let sorted = db.all().sort_by(&["config.lr"], true).unwrap();
    let lrs: Vec<FieldData> = sorted
        .iter()
        .map(|row| row.get("config.lr").unwrap())
        .collect();
    assert_eq!(
        lrs,
        vec![
            FieldData::Scalar(Scalar::Float(0.05)),
            FieldData::Scalar(Scalar::Float(0.1)),
            FieldData::Scalar(Scalar::Float(0.2)),
        ]
    );
}

#[test]
fn test_select_materializes_requested_fields() {
    let parent = tempfile::tempdir().unwrap();
    log_run(parent.path(), 0.1, 1, &[1.0]);
    let db = Database::build(parent.path(), BuildOptions::new()).unwrap();

    let records = db
        .all()
        .select(&["config.seed", "train.loss"])
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0]["config.seed"],
        FieldData::Scalar(Scalar::Int(1))
    );
    assert_eq!(
        records[0]["train.loss"],
        FieldData::Series(vec![Scalar::Float(1.0)])
    );
}
