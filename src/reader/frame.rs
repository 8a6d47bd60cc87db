//! Lazy result frames over indexed runs
//!
//! A [`DataFrame`] holds one [`Row`] per run. Scalar metadata fields are
//! available immediately; metric streams and artifacts are read from disk on
//! first access and memoized, so repeated access never re-reads a file.
//! Frames derived from one another (filters, groups) share rows, and with
//! them the memoized payloads.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::logger::{
    read_stream, ArtifactRegistry, ArtifactValue, ARTIFACTS_DIR, METRICS_DIR, STREAM_EXT,
};
use crate::query::Query;
use crate::value::Scalar;
use crate::{Error, Result};

use super::RunEntry;

/// Lazy pointer to one artifact file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    path: PathBuf,
    format: String,
}

impl ArtifactHandle {
    /// Path of the artifact file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format the artifact was saved under.
    #[must_use]
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Load the artifact using the built-in codecs.
    ///
    /// # Errors
    ///
    /// Fails when the format has no built-in codec or the file cannot be
    /// read back.
    pub fn load(&self) -> Result<ArtifactValue> {
        self.load_with(&ArtifactRegistry::new())
    }

    /// Load the artifact using a caller-supplied codec registry.
    ///
    /// # Errors
    ///
    /// Fails when `registry` has no codec for the format or the file cannot
    /// be read back.
    pub fn load_with(&self, registry: &ArtifactRegistry) -> Result<ArtifactValue> {
        registry.load(&self.format, &self.path)
    }
}

/// Value of one field of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    /// A single metadata scalar
    Scalar(Scalar),
    /// One metric value per logged step, in append order
    Series(Vec<Scalar>),
    /// Artifact name to lazy handle, for one artifact type
    Artifacts(BTreeMap<String, ArtifactHandle>),
}

impl FieldData {
    /// The scalar payload, if this is a scalar field.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// The series payload, if this is a metric field.
    #[must_use]
    pub fn as_series(&self) -> Option<&[Scalar]> {
        match self {
            Self::Series(values) => Some(values),
            _ => None,
        }
    }

    /// The artifact handles, if this is an artifact field.
    #[must_use]
    pub const fn as_artifacts(&self) -> Option<&BTreeMap<String, ArtifactHandle>> {
        match self {
            Self::Artifacts(handles) => Some(handles),
            _ => None,
        }
    }
}

impl From<Scalar> for FieldData {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

/// One run's worth of fields, materialized on demand.
#[derive(Debug)]
pub struct Row {
    run_id: Option<u64>,
    dir: Option<PathBuf>,
    scalars: BTreeMap<String, Scalar>,
    metric_fields: BTreeSet<String>,
    artifact_fields: BTreeSet<String>,
    extras: BTreeMap<String, FieldData>,
    // Memoized metric streams, keyed by stream name.
    stream_cache: RefCell<HashMap<String, HashMap<String, Vec<Scalar>>>>,
    // Memoized artifact listings, keyed by field name.
    artifact_cache: RefCell<HashMap<String, BTreeMap<String, ArtifactHandle>>>,
}

impl Row {
    pub(crate) fn from_entry(entry: &RunEntry, dir: PathBuf) -> Self {
        Self {
            run_id: Some(entry.run_id),
            dir: Some(dir),
            scalars: entry.scalars.clone(),
            metric_fields: entry.metrics.clone(),
            artifact_fields: entry.artifacts.clone(),
            extras: BTreeMap::new(),
            stream_cache: RefCell::new(HashMap::new()),
            artifact_cache: RefCell::new(HashMap::new()),
        }
    }

    // Backs the rows produced by aggregation: no run directory, every field
    // already materialized.
    fn synthetic(extras: BTreeMap<String, FieldData>) -> Self {
        Self {
            run_id: None,
            dir: None,
            scalars: BTreeMap::new(),
            metric_fields: BTreeSet::new(),
            artifact_fields: BTreeSet::new(),
            extras,
            stream_cache: RefCell::new(HashMap::new()),
            artifact_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Run id this row was built from, absent for aggregated rows.
    #[must_use]
    pub const fn run_id(&self) -> Option<u64> {
        self.run_id
    }

    /// All field names visible on this row, sorted.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self.scalars.keys().cloned().collect();
        keys.extend(self.metric_fields.iter().cloned());
        keys.extend(self.artifact_fields.iter().cloned());
        keys.extend(self.extras.keys().cloned());
        keys
    }

    /// The scalar metadata fields of this row.
    #[must_use]
    pub const fn scalars(&self) -> &BTreeMap<String, Scalar> {
        &self.scalars
    }

    /// Fetch one field, reading metric or artifact data from disk on first
    /// access.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownField`] when the row has no such field,
    /// and with an I/O error when an unmaterialized metric stream can no
    /// longer be read.
    pub fn get(&self, field: &str) -> Result<FieldData> {
        if let Some(data) = self.extras.get(field) {
            return Ok(data.clone());
        }
        if let Some(value) = self.scalars.get(field) {
            return Ok(FieldData::Scalar(value.clone()));
        }
        if self.metric_fields.contains(field) {
            return self.metric_series(field).map(FieldData::Series);
        }
        if self.artifact_fields.contains(field) {
            return Ok(FieldData::Artifacts(self.artifact_handles(field)));
        }
        Err(Error::UnknownField(field.to_string()))
    }

    fn metric_series(&self, field: &str) -> Result<Vec<Scalar>> {
        let stream = field.split('.').next().unwrap_or(field);
        let mut cache = self.stream_cache.borrow_mut();
        if !cache.contains_key(stream) {
            let dir = self.dir.as_deref().unwrap_or_else(|| Path::new(""));
            let path = dir
                .join(METRICS_DIR)
                .join(format!("{stream}.{STREAM_EXT}"));
            cache.insert(stream.to_string(), read_stream(&path, stream)?);
        }
        Ok(cache
            .get(stream)
            .and_then(|columns| columns.get(field))
            .cloned()
            .unwrap_or_default())
    }

    fn artifact_handles(&self, field: &str) -> BTreeMap<String, ArtifactHandle> {
        let mut cache = self.artifact_cache.borrow_mut();
        if let Some(handles) = cache.get(field) {
            return handles.clone();
        }
        let format = field
            .strip_prefix(&format!("{ARTIFACTS_DIR}."))
            .unwrap_or(field);
        let mut handles = BTreeMap::new();
        if let Some(dir) = &self.dir {
            collect_artifacts(&dir.join(ARTIFACTS_DIR).join(format), "", format, &mut handles);
        }
        cache.insert(field.to_string(), handles.clone());
        handles
    }
}

fn collect_artifacts(
    dir: &Path,
    rel: &str,
    format: &str,
    out: &mut BTreeMap<String, ArtifactHandle>,
) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        let key = if rel.is_empty() {
            name.clone()
        } else {
            format!("{rel}/{name}")
        };
        let path = entry.path();
        if path.is_dir() {
            collect_artifacts(&path, &key, format, out);
        } else {
            out.insert(
                key,
                ArtifactHandle {
                    path,
                    format: format.to_string(),
                },
            );
        }
    }
}

/// Aggregation applied to one field across the rows of a group.
///
/// Scalar fields reduce to a single scalar. Metric fields reduce
/// element-wise: position `i` of the output aggregates position `i` of every
/// series that is long enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Arithmetic mean
    Mean,
    /// Sum
    Sum,
    /// Minimum
    Min,
    /// Maximum
    Max,
    /// Number of rows in the group
    Count,
    /// Value from the last row of the group
    Last,
}

impl Reduction {
    /// Name used as the output-field prefix (`<name>.<field>`).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Last => "last",
        }
    }

    fn apply(self, field: &str, values: &[FieldData]) -> Result<FieldData> {
        if values
            .iter()
            .any(|v| matches!(v, FieldData::Artifacts(_)))
        {
            return Err(Error::FieldType {
                field: field.to_string(),
                kind: "ARTIFACT".to_string(),
                reason: "artifact fields cannot be aggregated; \
                         select them instead and load the handles you need"
                    .to_string(),
            });
        }
        match self {
            Self::Count => Ok(FieldData::Scalar(Scalar::Int(values.len() as i64))),
            Self::Last => values.last().cloned().ok_or_else(|| Error::FieldType {
                field: field.to_string(),
                kind: "EMPTY".to_string(),
                reason: "cannot aggregate an empty group".to_string(),
            }),
            Self::Mean | Self::Sum | Self::Min | Self::Max => {
                if values.iter().any(|v| matches!(v, FieldData::Series(_))) {
                    self.apply_elementwise(field, values)
                } else {
                    let scalars: Vec<&Scalar> = values
                        .iter()
                        .filter_map(FieldData::as_scalar)
                        .collect();
                    self.reduce_scalars(field, &scalars).map(FieldData::Scalar)
                }
            }
        }
    }

    fn apply_elementwise(self, field: &str, values: &[FieldData]) -> Result<FieldData> {
        let longest = values
            .iter()
            .filter_map(FieldData::as_series)
            .map(<[Scalar]>::len)
            .max()
            .unwrap_or(0);
        let mut out = Vec::with_capacity(longest);
        for index in 0..longest {
            let at_index: Vec<&Scalar> = values
                .iter()
                .filter_map(FieldData::as_series)
                .filter_map(|series| series.get(index))
                .collect();
            out.push(self.reduce_scalars(field, &at_index)?);
        }
        Ok(FieldData::Series(out))
    }

    fn reduce_scalars(self, field: &str, values: &[&Scalar]) -> Result<Scalar> {
        let numbers: Vec<f64> = values
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| Error::FieldType {
                    field: field.to_string(),
                    kind: format!("{:?}", v.kind()),
                    reason: format!("{} requires numeric values", self.name()),
                })
            })
            .collect::<Result<_>>()?;
        if numbers.is_empty() {
            return Err(Error::FieldType {
                field: field.to_string(),
                kind: "EMPTY".to_string(),
                reason: "cannot aggregate an empty group".to_string(),
            });
        }
        let result = match self {
            Self::Mean => numbers.iter().sum::<f64>() / numbers.len() as f64,
            Self::Sum => numbers.iter().sum(),
            Self::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Count | Self::Last => unreachable!("handled in apply"),
        };
        Ok(Scalar::Float(result))
    }
}

/// Ordered collection of lazy rows.
#[derive(Debug, Clone, Default)]
pub struct DataFrame {
    rows: Vec<Rc<Row>>,
}

impl DataFrame {
    pub(crate) fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter().map(Rc::new).collect(),
        }
    }

    fn from_shared(rows: Vec<Rc<Row>>) -> Self {
        Self { rows }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the frame has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index).map(Rc::as_ref)
    }

    /// Iterate over rows in order.
    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().map(Rc::as_ref)
    }

    /// Union of field names over all rows, sorted.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for row in &self.rows {
            keys.extend(row.keys());
        }
        keys
    }

    /// Scalar fields under `prefix` whose value is not identical across all
    /// rows, sorted.
    ///
    /// A field absent from some rows counts as differing.
    #[must_use]
    pub fn diff(&self, prefix: &str) -> Vec<String> {
        let fields: BTreeSet<&String> = self
            .rows
            .iter()
            .flat_map(|row| row.scalars.keys())
            .filter(|name| name.starts_with(prefix))
            .collect();
        fields
            .into_iter()
            .filter(|field| {
                let first = self.rows.first().and_then(|row| row.scalars.get(*field));
                self.rows
                    .iter()
                    .any(|row| row.scalars.get(*field) != first)
            })
            .cloned()
            .collect()
    }

    /// Keep only rows matching `query_string` (evaluated over scalar
    /// fields).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::QuerySyntax`] on malformed queries.
    pub fn filter(&self, query_string: &str) -> Result<Self> {
        let query = Query::parse(query_string)?;
        Ok(Self::from_shared(
            self.rows
                .iter()
                .filter(|row| query.matches(&row.scalars))
                .cloned()
                .collect(),
        ))
    }

    /// Keep only rows for which `predicate` holds on the materialized value
    /// of `field`.
    ///
    /// Unlike [`filter`](Self::filter), the predicate sees metric series and
    /// artifact handles, not just scalar metadata.
    ///
    /// # Errors
    ///
    /// Fails when `field` is unknown on some row or its backing file cannot
    /// be read.
    pub fn filter_with<F>(&self, field: &str, predicate: F) -> Result<Self>
    where
        F: Fn(&FieldData) -> bool,
    {
        let mut rows = Vec::new();
        for row in &self.rows {
            if predicate(&row.get(field)?) {
                rows.push(Rc::clone(row));
            }
        }
        Ok(Self::from_shared(rows))
    }

    /// Stable sort by the scalar fields `fields`, in order of priority.
    ///
    /// Rows missing a sort field order after all rows that have it,
    /// regardless of direction.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::FieldType`] when a sort field is not scalar on
    /// some row.
    pub fn sort_by(&self, fields: &[&str], ascending: bool) -> Result<Self> {
        for row in &self.rows {
            for field in fields {
                if row.metric_fields.contains(*field) || row.artifact_fields.contains(*field) {
                    return Err(Error::FieldType {
                        field: (*field).to_string(),
                        kind: "non-scalar".to_string(),
                        reason: "only scalar metadata fields can be sorted on".to_string(),
                    });
                }
            }
        }
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            for field in fields {
                let left = a.scalars.get(*field);
                let right = b.scalars.get(*field);
                let ordering = match (left, right) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (Some(l), Some(r)) => {
                        let cmp = l.compare(r).unwrap_or(std::cmp::Ordering::Equal);
                        if ascending {
                            cmp
                        } else {
                            cmp.reverse()
                        }
                    }
                };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(Self::from_shared(rows))
    }

    /// Materialize `fields` for every row.
    ///
    /// # Errors
    ///
    /// Fails when a field is unknown on some row or its backing file cannot
    /// be read.
    pub fn select(&self, fields: &[&str]) -> Result<Vec<BTreeMap<String, FieldData>>> {
        self.rows
            .iter()
            .map(|row| {
                fields
                    .iter()
                    .map(|field| Ok(((*field).to_string(), row.get(field)?)))
                    .collect()
            })
            .collect()
    }

    /// Materialize every field of every row.
    ///
    /// # Errors
    ///
    /// Fails when any backing file cannot be read.
    pub fn to_records(&self) -> Result<Vec<BTreeMap<String, FieldData>>> {
        self.rows
            .iter()
            .map(|row| {
                row.keys()
                    .into_iter()
                    .map(|field| {
                        let data = row.get(&field)?;
                        Ok((field, data))
                    })
                    .collect()
            })
            .collect()
    }

    /// Partition rows by the scalar fields `keys`, groups ordered by first
    /// appearance.
    ///
    /// A row missing a group key falls into the group whose key value is
    /// null.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::FieldType`] when a group key names a metric or
    /// artifact field.
    pub fn groupby(&self, keys: &[&str]) -> Result<GroupedFrame> {
        for row in &self.rows {
            for key in keys {
                if row.metric_fields.contains(*key) || row.artifact_fields.contains(*key) {
                    return Err(Error::FieldType {
                        field: (*key).to_string(),
                        kind: "non-scalar".to_string(),
                        reason: "only scalar metadata fields can be grouped on".to_string(),
                    });
                }
            }
        }
        let mut groups: Vec<(Vec<Scalar>, Vec<Rc<Row>>)> = Vec::new();
        for row in &self.rows {
            let group_key: Vec<Scalar> = keys
                .iter()
                .map(|key| row.scalars.get(*key).cloned().unwrap_or(Scalar::Null))
                .collect();
            match groups.iter_mut().find(|(key, _)| *key == group_key) {
                Some((_, members)) => members.push(Rc::clone(row)),
                None => groups.push((group_key, vec![Rc::clone(row)])),
            }
        }
        Ok(GroupedFrame {
            group_keys: keys.iter().map(ToString::to_string).collect(),
            groups: groups
                .into_iter()
                .map(|(key, rows)| (key, Self::from_shared(rows)))
                .collect(),
        })
    }
}

/// A frame partitioned by one or more scalar fields.
#[derive(Debug, Clone)]
pub struct GroupedFrame {
    group_keys: Vec<String>,
    groups: Vec<(Vec<Scalar>, DataFrame)>,
}

impl GroupedFrame {
    /// Fields the frame was grouped by.
    #[must_use]
    pub fn group_keys(&self) -> &[String] {
        &self.group_keys
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The group whose key values equal `key`.
    #[must_use]
    pub fn get(&self, key: &[Scalar]) -> Option<&DataFrame> {
        self.groups
            .iter()
            .find(|(group_key, _)| group_key.as_slice() == key)
            .map(|(_, frame)| frame)
    }

    /// Iterate over `(key, frame)` pairs in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = (&[Scalar], &DataFrame)> {
        self.groups
            .iter()
            .map(|(key, frame)| (key.as_slice(), frame))
    }

    /// Reduce fields across each group into one row per group.
    ///
    /// The output row carries the group-key fields plus one
    /// `<reduction>.<field>` field per requested pair.
    ///
    /// # Errors
    ///
    /// Fails when a field is unknown on some row, is an artifact field, or
    /// holds values the reduction cannot handle.
    pub fn aggregate(&self, reductions: &[(Reduction, &str)]) -> Result<DataFrame> {
        let mut rows = Vec::with_capacity(self.groups.len());
        for (key, frame) in &self.groups {
            let mut fields = BTreeMap::new();
            for (name, value) in self.group_keys.iter().zip(key) {
                fields.insert(name.clone(), FieldData::Scalar(value.clone()));
            }
            for (reduction, field) in reductions {
                let values: Vec<FieldData> = frame
                    .iter()
                    .map(|row| row.get(field))
                    .collect::<Result<_>>()?;
                fields.insert(
                    format!("{}.{field}", reduction.name()),
                    reduction.apply(field, &values)?,
                );
            }
            rows.push(Row::synthetic(fields));
        }
        Ok(DataFrame::new(rows))
    }

    /// Reduce `field` across each group with a caller-supplied function,
    /// storing the result as `<name>.<field>`.
    ///
    /// # Errors
    ///
    /// Fails when the field is unknown on some row or the function fails.
    pub fn aggregate_with<F>(&self, name: &str, field: &str, func: F) -> Result<DataFrame>
    where
        F: Fn(&[FieldData]) -> Result<FieldData>,
    {
        let mut rows = Vec::with_capacity(self.groups.len());
        for (key, frame) in &self.groups {
            let mut fields = BTreeMap::new();
            for (key_name, value) in self.group_keys.iter().zip(key) {
                fields.insert(key_name.clone(), FieldData::Scalar(value.clone()));
            }
            let values: Vec<FieldData> = frame
                .iter()
                .map(|row| row.get(field))
                .collect::<Result<_>>()?;
            fields.insert(format!("{name}.{field}"), func(&values)?);
            rows.push(Row::synthetic(fields));
        }
        Ok(DataFrame::new(rows))
    }

    /// Apply a row filter within every group, dropping groups left empty.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::QuerySyntax`] on malformed queries.
    pub fn filter(&self, query_string: &str) -> Result<Self> {
        let mut groups = Vec::new();
        for (key, frame) in &self.groups {
            let filtered = frame.filter(query_string)?;
            if !filtered.is_empty() {
                groups.push((key.clone(), filtered));
            }
        }
        Ok(Self {
            group_keys: self.group_keys.clone(),
            groups,
        })
    }

    /// Apply [`DataFrame::filter_with`] within every group, dropping groups
    /// left empty.
    ///
    /// # Errors
    ///
    /// Fails when `field` is unknown on some row or its backing file cannot
    /// be read.
    pub fn filter_with<F>(&self, field: &str, predicate: F) -> Result<Self>
    where
        F: Fn(&FieldData) -> bool,
    {
        let mut groups = Vec::new();
        for (key, frame) in &self.groups {
            let filtered = frame.filter_with(field, &predicate)?;
            if !filtered.is_empty() {
                groups.push((key.clone(), filtered));
            }
        }
        Ok(Self {
            group_keys: self.group_keys.clone(),
            groups,
        })
    }

    /// Keep only the groups for which `predicate` returns true.
    #[must_use]
    pub fn filter_bygroups<F>(&self, predicate: F) -> Self
    where
        F: Fn(&DataFrame) -> bool,
    {
        Self {
            group_keys: self.group_keys.clone(),
            groups: self
                .groups
                .iter()
                .filter(|(_, frame)| predicate(frame))
                .cloned()
                .collect(),
        }
    }

    /// Keep only the groups whose key tuple appears in `keys`, preserving
    /// group order.
    #[must_use]
    pub fn select(&self, keys: &[Vec<Scalar>]) -> Self {
        Self {
            group_keys: self.group_keys.clone(),
            groups: self
                .groups
                .iter()
                .filter(|(key, _)| keys.contains(key))
                .cloned()
                .collect(),
        }
    }

    /// Concatenate the groups back into a single frame, in group order.
    #[must_use]
    pub fn ungroup(&self) -> DataFrame {
        DataFrame::from_shared(
            self.groups
                .iter()
                .flat_map(|(_, frame)| frame.rows.iter().cloned())
                .collect(),
        )
    }
}
