//! Database builder over a parent directory of run outputs
//!
//! Scans every numeric run directory under a parent log directory, flattens
//! the metadata documents into dotted-path scalar fields (`config.*`,
//! `info.*`), registers placeholder fields for metric streams and artifact
//! types, and persists the result as a single queryable index document
//! (`database.json`).
//!
//! Metric and artifact payloads are never copied into the index; rows hold
//! typed placeholders that the [`frame`] module materializes from disk on
//! first access.
//!
//! The scan is read-only and best-effort: a run directory whose metadata is
//! not yet written (e.g. a concurrently starting run) is skipped, not fatal.

pub mod frame;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::logger::{write_json_atomic, ARTIFACTS_DIR, KEYS_DIR, METADATA_DIR, METRICS_DIR};
use crate::query::Query;
use crate::value::{flatten, Scalar, ScalarKind};
use crate::{Error, Result};
use frame::{DataFrame, Row};

/// File name of the persisted index document.
pub const DATABASE_FILE: &str = "database.json";

/// Dotted-path prefix of configuration fields.
pub const CONFIG_PREFIX: &str = "config.";
/// Dotted-path prefix of run-info fields.
pub const INFO_PREFIX: &str = "info.";

/// Declared type of one database field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Null-valued scalar field
    #[serde(rename = "null")]
    Null,
    /// Boolean scalar field
    #[serde(rename = "bool")]
    Bool,
    /// Integer scalar field
    #[serde(rename = "int")]
    Int,
    /// Float scalar field
    #[serde(rename = "float")]
    Float,
    /// String scalar field
    #[serde(rename = "str")]
    Str,
    /// List-valued scalar field
    #[serde(rename = "list")]
    List,
    /// Placeholder for a metric stream key, materialized lazily
    #[serde(rename = "METRIC")]
    Metric,
    /// Placeholder for an artifact type directory, materialized lazily
    #[serde(rename = "ARTIFACT")]
    Artifact,
}

impl From<ScalarKind> for FieldType {
    fn from(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Null => Self::Null,
            ScalarKind::Bool => Self::Bool,
            ScalarKind::Int => Self::Int,
            ScalarKind::Float => Self::Float,
            ScalarKind::Str => Self::Str,
            ScalarKind::List => Self::List,
        }
    }
}

impl FieldType {
    /// Unify the types of the same field observed in two runs.
    ///
    /// Integer and float observations widen to float; null unifies with
    /// anything. Incompatible kinds yield `None`.
    #[must_use]
    pub fn unify(self, other: Self) -> Option<Self> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Self::Int | Self::Float, Self::Int | Self::Float) => Some(Self::Float),
            (Self::Null, b) => Some(b),
            (a, Self::Null) => Some(a),
            _ => None,
        }
    }
}

/// Mapping from dotted field names to their declared types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    fields: BTreeMap<String, FieldType>,
}

impl FieldSchema {
    /// Whether a field name is eligible to appear in a query predicate.
    ///
    /// Only configuration and run-info fields are backed by a single scalar
    /// per run; metric and artifact fields are list-valued and cannot be
    /// searched.
    #[must_use]
    pub fn is_searchable(name: &str) -> bool {
        name.starts_with(CONFIG_PREFIX) || name.starts_with(INFO_PREFIX)
    }

    /// Whether the schema contains `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Declared type of `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over `(name, type)` pairs sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    /// The searchable subset of this schema.
    #[must_use]
    pub fn searchable(&self) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .filter(|(name, _)| Self::is_searchable(name))
                .map(|(name, ty)| (name.clone(), *ty))
                .collect(),
        }
    }

    // Record an observation of `name` with type `ty`, unifying with any
    // prior observation or failing on incompatible kinds.
    fn observe(&mut self, name: &str, ty: FieldType) -> Result<()> {
        match self.fields.get(name) {
            None => {
                self.fields.insert(name.to_string(), ty);
                Ok(())
            }
            Some(&prior) => match prior.unify(ty) {
                Some(unified) => {
                    self.fields.insert(name.to_string(), unified);
                    Ok(())
                }
                None => Err(Error::SchemaConflict {
                    field: name.to_string(),
                    first: format!("{prior:?}"),
                    second: format!("{ty:?}"),
                }),
            },
        }
    }
}

/// One indexed run: flattened scalars plus lazy field markers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntry {
    /// Unique run id within the parent directory.
    pub run_id: u64,
    /// Run directory name relative to the parent.
    pub dir: String,
    /// Flattened `config.*` and `info.*` scalar fields.
    pub scalars: BTreeMap<String, Scalar>,
    /// Fully qualified metric field names (`<stream>.<key>`).
    pub metrics: BTreeSet<String>,
    /// Artifact field names (`artifacts.<type>`).
    pub artifacts: BTreeSet<String>,
}

#[derive(Serialize, Deserialize)]
struct IndexDocument {
    version: String,
    fields: FieldSchema,
    runs: Vec<RunEntry>,
}

/// Options controlling database construction.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    refresh: bool,
    dst_dir: Option<PathBuf>,
}

impl BuildOptions {
    /// Defaults: reuse an existing index, store it in the parent directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index even if one already exists.
    #[must_use]
    pub const fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Store the index document in a different directory than the parent.
    #[must_use]
    pub fn dst_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dst_dir = Some(dir.into());
        self
    }
}

/// Queryable index over the runs of one parent log directory.
#[derive(Debug)]
pub struct Database {
    parent_dir: PathBuf,
    index_path: PathBuf,
    schema: FieldSchema,
    runs: Vec<RunEntry>,
}

impl Database {
    /// Build (or load) the index for `parent_dir`.
    ///
    /// If an index document already exists at the destination and `refresh`
    /// is not set, it is loaded and returned unchanged. Otherwise every
    /// immediate numeric subdirectory holding a readable
    /// `metadata/config.json` is scanned and the resulting index persisted.
    ///
    /// # Errors
    ///
    /// Fails on filesystem errors, on an unreadable existing index, and with
    /// [`Error::SchemaConflict`] when two runs disagree on a field's type.
    pub fn build(parent_dir: impl AsRef<Path>, options: BuildOptions) -> Result<Self> {
        let parent = parent_dir.as_ref().to_path_buf();
        let dst = options.dst_dir.unwrap_or_else(|| parent.clone());
        std::fs::create_dir_all(&dst)?;
        let index_path = dst.join(DATABASE_FILE);

        if index_path.exists() && !options.refresh {
            debug!(path = %index_path.display(), "loading existing database index");
            return Self::load(parent, index_path);
        }

        let (schema, runs) = scan(&parent)?;
        let db = Self {
            parent_dir: parent,
            index_path,
            schema,
            runs,
        };
        db.persist()?;
        info!(
            runs = db.runs.len(),
            fields = db.schema.len(),
            path = %db.index_path.display(),
            "database index built"
        );
        Ok(db)
    }

    /// Number of indexed runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether the database holds no runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// The full field schema.
    #[must_use]
    pub const fn fields(&self) -> &FieldSchema {
        &self.schema
    }

    /// The searchable subset of the schema.
    #[must_use]
    pub fn searchable(&self) -> FieldSchema {
        self.schema.searchable()
    }

    /// Ids of all indexed runs, ascending.
    #[must_use]
    pub fn run_ids(&self) -> Vec<u64> {
        self.runs.iter().map(|entry| entry.run_id).collect()
    }

    /// A lazy frame over every indexed run.
    #[must_use]
    pub fn all(&self) -> DataFrame {
        DataFrame::new(self.runs.iter().map(|e| self.row(e)).collect())
    }

    /// Evaluate a query and return the matching runs as a lazy frame.
    ///
    /// The empty query matches every run.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::QuerySyntax`] on malformed queries and
    /// [`Error::UnknownField`] when a referenced field is not searchable,
    /// in both cases before any row is evaluated.
    pub fn filter(&self, query_string: &str) -> Result<DataFrame> {
        let query = Query::parse(query_string)?;
        query.validate(&self.schema)?;
        let rows = self
            .runs
            .iter()
            .filter(|entry| query.matches(&entry.scalars))
            .map(|entry| self.row(entry))
            .collect();
        Ok(DataFrame::new(rows))
    }

    fn row(&self, entry: &RunEntry) -> Row {
        Row::from_entry(entry, self.parent_dir.join(&entry.dir))
    }

    fn persist(&self) -> Result<()> {
        let doc = IndexDocument {
            version: env!("CARGO_PKG_VERSION").to_string(),
            fields: self.schema.clone(),
            runs: self.runs.clone(),
        };
        write_json_atomic(&self.index_path, &doc)
    }

    fn load(parent_dir: PathBuf, index_path: PathBuf) -> Result<Self> {
        let bytes = std::fs::read(&index_path)?;
        let doc: IndexDocument = serde_json::from_slice(&bytes)?;
        Ok(Self {
            parent_dir,
            index_path,
            schema: doc.fields,
            runs: doc.runs,
        })
    }
}

fn scan(parent: &Path) -> Result<(FieldSchema, Vec<RunEntry>)> {
    let mut run_dirs: Vec<(u64, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
        {
            run_dirs.push((id, entry.path()));
        }
    }
    run_dirs.sort_unstable_by_key(|(id, _)| *id);

    let mut schema = FieldSchema::default();
    let mut runs = Vec::new();
    for (run_id, dir) in run_dirs {
        match scan_run(run_id, &dir, &mut schema)? {
            Some(entry) => runs.push(entry),
            None => debug!(run_id, "skipping run directory without metadata"),
        }
    }
    Ok((schema, runs))
}

// A run becomes visible to the index only once its config document exists;
// anything else about it is read best-effort.
fn scan_run(run_id: u64, dir: &Path, schema: &mut FieldSchema) -> Result<Option<RunEntry>> {
    let metadata_dir = dir.join(METADATA_DIR);
    let Some(config) = read_json_doc(&metadata_dir.join("config.json")) else {
        return Ok(None);
    };

    let mut scalars = flatten(&config, "config");
    if let Some(info) = read_json_doc(&metadata_dir.join("info.json")) {
        scalars.extend(flatten(&info, "info"));
    }
    for (name, value) in &scalars {
        schema.observe(name, FieldType::from(value.kind()))?;
    }

    let mut metrics = BTreeSet::new();
    let keys_dir = dir.join(METRICS_DIR).join(KEYS_DIR);
    if let Ok(entries) = std::fs::read_dir(&keys_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stream) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(keys) = crate::logger::read_key_schema(&path) else {
                continue;
            };
            for key in keys.keys() {
                let field = format!("{stream}.{key}");
                schema.observe(&field, FieldType::Metric)?;
                metrics.insert(field);
            }
        }
    }

    let mut artifacts = BTreeSet::new();
    let artifacts_dir = dir.join(ARTIFACTS_DIR);
    if let Ok(entries) = std::fs::read_dir(&artifacts_dir) {
        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let field = format!("{ARTIFACTS_DIR}.{name}");
            schema.observe(&field, FieldType::Artifact)?;
            artifacts.insert(field);
        }
    }

    Ok(Some(RunEntry {
        run_id,
        dir: run_id.to_string(),
        scalars,
        metrics,
        artifacts,
    }))
}

fn read_json_doc(path: &Path) -> Option<serde_json::Value> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}
