//! Append-only metric stream writer
//!
//! Each named stream is one JSON-lines file under `metrics/`. A record is a
//! flat dictionary of scalars appended as a single line; prior entries are
//! never rewritten, so a mid-write crash can at worst truncate the last line.
//!
//! For every stream a derived key-schema file `metrics/.keys/<stream>.json`
//! records the union of keys observed so far, together with their scalar
//! kinds. The database builder reads these files instead of scanning whole
//! streams.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::value::{Scalar, ScalarKind};
use crate::{Error, Result};

/// Stream names that would collide with the run directory layout.
pub const RESERVED_STREAM_NAMES: [&str; 4] = ["config", "info", "settings", "artifacts"];

/// File extension of metric stream files.
pub const STREAM_EXT: &str = "jsonl";

/// Name of the derived key-schema directory inside `metrics/`.
pub const KEYS_DIR: &str = ".keys";

/// Writer for the metric streams of a single run.
#[derive(Debug)]
pub struct MetricWriter {
    metrics_dir: PathBuf,
    // Keys already recorded in each stream's key-schema file, so a schema
    // rewrite happens only when a record introduces a new key.
    known_keys: HashMap<String, HashSet<String>>,
}

impl MetricWriter {
    /// Create a writer rooted at a run's `metrics/` directory.
    pub fn new(metrics_dir: impl Into<PathBuf>) -> Self {
        Self {
            metrics_dir: metrics_dir.into(),
            known_keys: HashMap::new(),
        }
    }

    /// Append one record to the named stream.
    ///
    /// Different calls may carry different key sets. The record is written as
    /// one JSON line; the stream's key schema is extended when the record
    /// introduces keys not seen before in this process.
    ///
    /// # Errors
    ///
    /// Fails on reserved or malformed stream names and on filesystem errors.
    /// Write failures are surfaced, never retried.
    pub fn append(&mut self, stream: &str, record: &BTreeMap<String, Scalar>) -> Result<()> {
        if RESERVED_STREAM_NAMES.contains(&stream) {
            return Err(Error::ReservedStreamName(stream.to_string()));
        }
        // Metric fields qualify keys as `<stream>.<key>`, so the stream name
        // itself must stay free of dots and path separators.
        if stream.is_empty() || stream.contains(['.', '/', '\\']) {
            return Err(Error::InvalidStreamName(stream.to_string()));
        }

        self.record_keys(stream, record)?;

        let path = self.stream_path(stream);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    /// Path of the stream file for `stream`.
    #[must_use]
    pub fn stream_path(&self, stream: &str) -> PathBuf {
        self.metrics_dir.join(format!("{stream}.{STREAM_EXT}"))
    }

    fn keys_path(&self, stream: &str) -> PathBuf {
        self.metrics_dir.join(KEYS_DIR).join(format!("{stream}.json"))
    }

    fn record_keys(&mut self, stream: &str, record: &BTreeMap<String, Scalar>) -> Result<()> {
        let new_keys: Vec<String> = {
            let known = self.known_keys.entry(stream.to_string()).or_default();
            record
                .keys()
                .filter(|k| !known.contains(*k))
                .cloned()
                .collect()
        };
        if new_keys.is_empty() {
            return Ok(());
        }

        let keys_path = self.keys_path(stream);
        let mut schema = read_key_schema(&keys_path).unwrap_or_default();
        for key in &new_keys {
            schema.insert(key.clone(), record[key].kind());
        }

        std::fs::create_dir_all(self.metrics_dir.join(KEYS_DIR))?;
        crate::logger::write_json_atomic(&keys_path, &schema)?;

        if let Some(known) = self.known_keys.get_mut(stream) {
            known.extend(new_keys);
        }
        Ok(())
    }
}

/// Read a stream's derived key schema, if present.
pub fn read_key_schema(path: &Path) -> Option<BTreeMap<String, ScalarKind>> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Read a whole stream back as per-key value sequences in append order.
///
/// Keys are returned under their fully qualified field name
/// `<stream>.<key>`. Records missing a key simply contribute nothing to that
/// key's sequence.
///
/// # Errors
///
/// Fails if the stream file cannot be read or a line is not valid JSON.
pub fn read_stream(path: &Path, stream: &str) -> Result<HashMap<String, Vec<Scalar>>> {
    let content = std::fs::read_to_string(path)?;
    let mut out: HashMap<String, Vec<Scalar>> = HashMap::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record: BTreeMap<String, Scalar> = serde_json::from_str(line)?;
        for (key, value) in record {
            out.entry(format!("{stream}.{key}")).or_default().push(value);
        }
    }
    Ok(out)
}
