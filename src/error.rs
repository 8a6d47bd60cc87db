//! Error types for bitacora
//!
//! Failures carry the run id and file or field involved so that a failing
//! experiment pipeline can be traced back to the offending run directory.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Bitacora error types
#[derive(Error, Debug)]
pub enum Error {
    /// Could not create a unique run directory
    #[error("run directory allocation failed under {parent}: {reason}")]
    Allocation {
        /// Parent log directory being allocated under
        parent: PathBuf,
        /// What went wrong (permission failure, exhausted retries)
        reason: String,
    },

    /// A forced run id points at a finalized run with a different configuration
    #[error(
        "run {run_id} in {parent} is already finalized with a different configuration\n\
         Pass overwrite(true) to reuse the directory anyway"
    )]
    Conflict {
        /// The forced run id
        run_id: u64,
        /// Parent log directory
        parent: PathBuf,
    },

    /// Artifact save or load failed mid-serialization
    #[error("artifact '{name}' (format '{format}') failed to serialize: {reason}")]
    Serialization {
        /// Artifact format name
        format: String,
        /// Artifact file name
        name: String,
        /// Underlying failure
        reason: String,
    },

    /// Artifact format has not been registered
    #[error(
        "artifact format '{0}' is not registered\n\
         Call register_artifact_type() before logging or loading this format"
    )]
    UnknownArtifactFormat(String),

    /// Requested artifact does not exist
    #[error("artifact '{name}' (format '{format}') not found under {dir}")]
    NotFound {
        /// Artifact format name
        format: String,
        /// Artifact file name
        name: String,
        /// Directory searched
        dir: PathBuf,
    },

    /// Metric stream name collides with a reserved directory entry
    #[error("metric stream name '{0}' is reserved; pick a different stream name")]
    ReservedStreamName(String),

    /// Metric stream name cannot be represented in the run layout
    #[error(
        "metric stream name '{0}' is invalid\n\
         Stream names must be non-empty and must not contain '.', '/' or '\\'"
    )]
    InvalidStreamName(String),

    /// Malformed query expression
    #[error("query syntax error: {0}")]
    QuerySyntax(String),

    /// Query or frame operation referenced a field that does not exist or is
    /// not searchable
    #[error("unknown or unsearchable field '{0}'")]
    UnknownField(String),

    /// The same dotted field was observed with incompatible types across runs
    #[error(
        "field '{field}' observed with conflicting types '{first}' and '{second}' across runs\n\
         Run directories under one parent must agree on field types"
    )]
    SchemaConflict {
        /// Dotted field name
        field: String,
        /// Type observed first
        first: String,
        /// Conflicting type observed later
        second: String,
    },

    /// Operation applied to a field of an unsupported type
    #[error("field '{field}' of type '{kind}' does not support this operation: {reason}")]
    FieldType {
        /// Dotted field name
        field: String,
        /// The field's schema type
        kind: String,
        /// Why the operation is rejected
        reason: String,
    },

    /// Run metadata document is missing or unreadable
    #[error("run {run_id}: metadata document {path} is invalid: {reason}")]
    Metadata {
        /// Run id the document belongs to
        run_id: u64,
        /// Path of the offending document
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
