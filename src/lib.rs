//! # Bitacora: Experiment Logging and Querying
//!
//! Bitacora manages the outputs of machine-learning experiment runs: each
//! run gets a uniquely numbered directory holding its configuration,
//! execution info, metric streams, and artifacts, and a reader side indexes
//! those directories into a queryable database with lazy result frames.
//!
//! ## Design Principles
//!
//! - **Collision-free allocation**: run ids are claimed by exclusive
//!   directory creation, safe under concurrent launchers
//! - **Atomic persistence**: metadata and artifacts are written via
//!   temp-file-and-rename, so readers never observe partial files
//! - **Late materialization**: queries touch only indexed metadata; metric
//!   streams and artifacts are read from disk on first access and memoized
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bitacora::logger::{LoggerOptions, RunLogger, RunStatus};
//! use bitacora::reader::{BuildOptions, Database};
//! use bitacora::value::Scalar;
//! use std::collections::BTreeMap;
//!
//! // Log a run
//! let config = serde_json::json!({"lr": 0.1, "seed": 1});
//! let mut logger = RunLogger::create("./logs", &config, LoggerOptions::new())?;
//! let mut record = BTreeMap::new();
//! record.insert("loss".to_string(), Scalar::Float(0.42));
//! logger.log_metrics(&record, "train")?;
//! logger.finalize(RunStatus::Complete)?;
//!
//! // Query it back
//! let db = Database::build("./logs", BuildOptions::new())?;
//! let frame = db.filter("info.status == 'COMPLETE' & config.lr <= 0.1")?;
//! println!("{} matching runs", frame.len());
//! # Ok::<(), bitacora::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod logger;
pub mod query;
pub mod reader;
pub mod value;

pub use error::{Error, Result};
pub use logger::{LoggerOptions, RunLogger, RunStatus};
pub use query::Query;
pub use reader::frame::{DataFrame, FieldData, GroupedFrame, Reduction};
pub use reader::{BuildOptions, Database, FieldSchema, FieldType};
pub use value::Scalar;

/// Install a process-wide log subscriber honoring `RUST_LOG`.
///
/// Intended for experiment binaries; defaults to `bitacora=info` when no
/// filter is set. Calling it twice, or with a subscriber already installed,
/// is a no-op.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitacora=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
