//! Run registry and logger
//!
//! Assigns each run a unique integer id within a parent log directory,
//! creates the run's directory tree and exposes logging operations scoped to
//! it:
//!
//! ```text
//! parent_log_dir/<run_id>/
//! ├── metadata/
//! │   ├── config.json    resolved user configuration
//! │   ├── info.json      run id, status, timestamps, host, pid, cmd
//! │   └── settings.json  registry settings snapshot
//! ├── metrics/
//! │   ├── <stream>.jsonl append-only scalar records
//! │   └── .keys/         derived key schema per stream
//! └── artifacts/<format>/<name>
//! ```
//!
//! Id allocation is the only operation needing cross-process coordination:
//! concurrent launches sharing one parent directory race on `max + 1` and
//! are arbitrated solely by exclusive directory creation. Everything else
//! writes inside the run's own subtree.

mod artifacts;
mod metrics;

pub use artifacts::{
    ArtifactRegistry, ArtifactValue, LoadFn, SaveFn, FORMAT_ARRAY, FORMAT_BYTES,
    FORMAT_CHECKPOINT, FORMAT_JSON,
};
pub use metrics::{
    read_key_schema, read_stream, MetricWriter, KEYS_DIR, RESERVED_STREAM_NAMES, STREAM_EXT,
};

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::value::Scalar;
use crate::{Error, Result};

/// Name of the metadata subdirectory.
pub const METADATA_DIR: &str = "metadata";
/// Name of the metrics subdirectory.
pub const METRICS_DIR: &str = "metrics";
/// Name of the artifacts subdirectory.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Default checkpoint artifact name.
pub const DEFAULT_CHECKPOINT_NAME: &str = "last";

// Bounded retries for the id race; each retry rescans the parent, so losing
// the race more than this many times means something else is wrong.
const MAX_ALLOCATION_RETRIES: usize = 1000;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// The run is currently executing.
    Running,
    /// The task function returned normally.
    Complete,
    /// The task function failed.
    Failed,
}

impl RunStatus {
    /// Whether this status is terminal (the run will not resume).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// The run info document persisted at `metadata/info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    /// Unique run id within the parent log directory.
    pub run_id: u64,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// When the run directory was created.
    pub start_time: DateTime<Utc>,
    /// When the run was finalized, if it has been.
    pub end_time: Option<DateTime<Utc>>,
    /// Hostname of the machine executing the run.
    pub host: String,
    /// Process id of the run.
    pub process_id: u32,
    /// Path of the executable.
    pub exe: String,
    /// Full command line.
    pub cmd: Vec<String>,
    /// Working directory the task executes from.
    pub work_dir: String,
}

/// Registry settings snapshot persisted at `metadata/settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggerSettings {
    parent_log_dir: String,
    forced_id: Option<u64>,
    overwrite: bool,
    version: String,
}

/// Options controlling run directory allocation.
#[derive(Debug, Clone, Default)]
pub struct LoggerOptions {
    forced_id: Option<u64>,
    overwrite: bool,
}

impl LoggerOptions {
    /// Allocate a fresh id by scanning the parent directory (the default).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `id` directly instead of allocating a fresh one.
    ///
    /// Forced ids may reuse an existing directory, e.g. to resume an
    /// interrupted run.
    #[must_use]
    pub const fn forced_id(mut self, id: u64) -> Self {
        self.forced_id = Some(id);
        self
    }

    /// Allow a forced id to reuse a directory holding a finalized run with a
    /// different configuration.
    #[must_use]
    pub const fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Logger scoped to one uniquely assigned run directory.
#[derive(Debug)]
pub struct RunLogger {
    run_dir: PathBuf,
    info: RunInfo,
    metrics: MetricWriter,
    artifacts: ArtifactRegistry,
    finalized: bool,
}

impl RunLogger {
    /// Allocate a run directory under `parent_dir` and persist the metadata
    /// documents for `config`.
    ///
    /// Without a forced id, scans the parent for the maximum numeric
    /// subdirectory and claims `max + 1` via exclusive directory creation,
    /// retrying with the next candidate when another process wins the race.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Allocation`] on filesystem permission failures,
    /// exhausted retries, or a forced id of 0, and with
    /// [`Error::Conflict`] when a forced id
    /// targets a finalized run whose stored configuration differs from
    /// `config` (unless `overwrite` is set).
    pub fn create(
        parent_dir: impl AsRef<Path>,
        config: &serde_json::Value,
        options: LoggerOptions,
    ) -> Result<Self> {
        let parent = parent_dir.as_ref();
        std::fs::create_dir_all(parent).map_err(|e| Error::Allocation {
            parent: parent.to_path_buf(),
            reason: e.to_string(),
        })?;

        let (run_id, run_dir) = match options.forced_id {
            Some(id) => prepare_forced_dir(parent, id, config, options.overwrite)?,
            None => allocate_run_dir(parent)?,
        };
        info!(run_id, dir = %run_dir.display(), "allocated run directory");

        let metadata_dir = run_dir.join(METADATA_DIR);
        let metrics_dir = run_dir.join(METRICS_DIR);
        let artifacts_dir = run_dir.join(ARTIFACTS_DIR);
        std::fs::create_dir_all(&metadata_dir)?;
        std::fs::create_dir_all(&metrics_dir)?;
        std::fs::create_dir_all(&artifacts_dir)?;

        let run_info = RunInfo {
            run_id,
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            host: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
            process_id: std::process::id(),
            exe: std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            cmd: std::env::args().collect(),
            work_dir: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        };
        let settings = LoggerSettings {
            parent_log_dir: parent.display().to_string(),
            forced_id: options.forced_id,
            overwrite: options.overwrite,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        write_json_atomic(&metadata_dir.join("config.json"), config)?;
        write_json_atomic(&metadata_dir.join("info.json"), &run_info)?;
        write_json_atomic(&metadata_dir.join("settings.json"), &settings)?;

        Ok(Self {
            run_dir,
            info: run_info,
            metrics: MetricWriter::new(metrics_dir),
            artifacts: ArtifactRegistry::new(),
            finalized: false,
        })
    }

    /// The uniquely assigned id of this run.
    #[must_use]
    pub const fn run_id(&self) -> u64 {
        self.info.run_id
    }

    /// Path of this run's directory.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// A copy of the current run info document.
    #[must_use]
    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    /// Append one record of scalars to the named metric stream.
    ///
    /// Append-only: prior entries are never rewritten. Calls with different
    /// key sets are permitted within one stream.
    ///
    /// # Errors
    ///
    /// Fails on reserved stream names or filesystem errors; write failures
    /// are surfaced to the caller, never retried.
    pub fn log_metrics(&mut self, record: &BTreeMap<String, Scalar>, stream: &str) -> Result<()> {
        self.metrics.append(stream, record)
    }

    /// Save an artifact under `artifacts/<format>/<name>` atomically.
    ///
    /// # Errors
    ///
    /// Fails if the format is unregistered or serialization fails. A failed
    /// save leaves any previous version of the artifact untouched.
    pub fn log_artifact(&self, value: &ArtifactValue, name: &str, format: &str) -> Result<()> {
        if !self.artifacts.contains(format) {
            return Err(Error::UnknownArtifactFormat(format.to_string()));
        }
        let path = self.artifact_path(format, name);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.artifacts.save(format, value, &path)
    }

    /// Load a previously logged artifact.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if the artifact is absent.
    pub fn load_artifact(&self, format: &str, name: &str) -> Result<ArtifactValue> {
        self.artifacts.load(format, &self.artifact_path(format, name))
    }

    /// Save a checkpoint under the dedicated built-in format.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`log_artifact`](Self::log_artifact).
    pub fn log_checkpoint(&self, value: &ArtifactValue) -> Result<()> {
        self.log_artifact(value, DEFAULT_CHECKPOINT_NAME, FORMAT_CHECKPOINT)
    }

    /// Save a named checkpoint.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`log_artifact`](Self::log_artifact).
    pub fn log_checkpoint_named(&self, value: &ArtifactValue, name: &str) -> Result<()> {
        self.log_artifact(value, name, FORMAT_CHECKPOINT)
    }

    /// Load the default checkpoint if one exists.
    ///
    /// Returns `Ok(None)` when no checkpoint has been logged yet; the common
    /// "initialize fresh" case is not an error. True I/O or corruption
    /// failures still fail.
    ///
    /// # Errors
    ///
    /// Fails only on I/O or deserialization failures.
    pub fn load_checkpoint(&self) -> Result<Option<ArtifactValue>> {
        self.load_checkpoint_named(DEFAULT_CHECKPOINT_NAME)
    }

    /// Load a named checkpoint if one exists.
    ///
    /// # Errors
    ///
    /// Fails only on I/O or deserialization failures.
    pub fn load_checkpoint_named(&self, name: &str) -> Result<Option<ArtifactValue>> {
        match self.load_artifact(FORMAT_CHECKPOINT, name) {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Register a custom artifact format for this process.
    ///
    /// Must be called before logging or loading artifacts of that format.
    /// Re-registration under the same name replaces the previous pair.
    pub fn register_artifact_type(&mut self, name: impl Into<String>, save: SaveFn, load: LoadFn) {
        self.artifacts.register(name, save, load);
    }

    /// Record the final status and end time of the run.
    ///
    /// The first call rewrites `metadata/info.json`; subsequent calls are
    /// no-ops so a completion hook and a panic hook cannot double-finalize.
    ///
    /// # Errors
    ///
    /// Fails if the info document cannot be rewritten.
    pub fn finalize(&mut self, status: RunStatus) -> Result<()> {
        if self.finalized {
            debug!(run_id = self.info.run_id, "run already finalized");
            return Ok(());
        }
        self.info.status = status;
        self.info.end_time = Some(Utc::now());
        write_json_atomic(
            &self.run_dir.join(METADATA_DIR).join("info.json"),
            &self.info,
        )?;
        self.finalized = true;
        info!(run_id = self.info.run_id, ?status, "run finalized");
        Ok(())
    }

    fn artifact_path(&self, format: &str, name: &str) -> PathBuf {
        self.run_dir.join(ARTIFACTS_DIR).join(format).join(name)
    }
}

/// Serialize `value` to `path` via a sibling temporary file and rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.tmp-{}", std::process::id()));
    let json = serde_json::to_vec_pretty(value)?;
    if let Err(e) = std::fs::write(&tmp, json) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn allocate_run_dir(parent: &Path) -> Result<(u64, PathBuf)> {
    for _ in 0..MAX_ALLOCATION_RETRIES {
        let id = max_existing_run_id(parent)? + 1;
        let dir = parent.join(id.to_string());
        match std::fs::create_dir(&dir) {
            Ok(()) => return Ok((id, dir)),
            // Lost the race: another process claimed this id. Rescan and
            // take the next candidate.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(id, "run id taken concurrently, retrying");
            }
            Err(e) => {
                return Err(Error::Allocation {
                    parent: parent.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }
    Err(Error::Allocation {
        parent: parent.to_path_buf(),
        reason: format!("exhausted {MAX_ALLOCATION_RETRIES} id allocation retries"),
    })
}

fn max_existing_run_id(parent: &Path) -> Result<u64> {
    let mut max = 0;
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
            max = max.max(id);
        }
    }
    Ok(max)
}

fn prepare_forced_dir(
    parent: &Path,
    run_id: u64,
    config: &serde_json::Value,
    overwrite: bool,
) -> Result<(u64, PathBuf)> {
    // Run ids start at 1; fresh allocation never yields 0 either.
    if run_id == 0 {
        return Err(Error::Allocation {
            parent: parent.to_path_buf(),
            reason: "run ids must be positive; forced id 0 is not allowed".to_string(),
        });
    }
    let dir = parent.join(run_id.to_string());
    if dir.exists() && !overwrite {
        check_resume_compatible(parent, run_id, &dir, config)?;
    }
    std::fs::create_dir_all(&dir).map_err(|e| Error::Allocation {
        parent: parent.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok((run_id, dir))
}

// A forced id may resume an interrupted run freely, but reusing a finalized
// run's directory with a different configuration is refused so two unrelated
// experiments cannot interleave their outputs.
fn check_resume_compatible(
    parent: &Path,
    run_id: u64,
    dir: &Path,
    config: &serde_json::Value,
) -> Result<()> {
    let info_path = dir.join(METADATA_DIR).join("info.json");
    // Absent info document means the prior run died mid-creation; resumable.
    let Ok(bytes) = std::fs::read(&info_path) else {
        return Ok(());
    };
    let prior_info: RunInfo =
        serde_json::from_slice(&bytes).map_err(|e| Error::Metadata {
            run_id,
            path: info_path.clone(),
            reason: e.to_string(),
        })?;
    if !prior_info.status.is_terminal() {
        return Ok(());
    }

    let config_path = dir.join(METADATA_DIR).join("config.json");
    let prior_config: Option<serde_json::Value> = std::fs::read(&config_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok());
    if prior_config.as_ref() == Some(config) {
        return Ok(());
    }
    Err(Error::Conflict {
        run_id,
        parent: parent.to_path_buf(),
    })
}
