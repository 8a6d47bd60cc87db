//! Typed artifact store with atomic writes
//!
//! Artifacts are arbitrary run outputs (checkpoints, arrays, images) saved
//! under `artifacts/<format>/<name>`. Each format is a registered pair of
//! save/load functions; a small built-in set covers the common cases and
//! users can register their own.
//!
//! Writes go to a sibling temporary file first and are renamed over the
//! final path, so an interrupted serialization never leaves a corrupt or
//! partial artifact visible under its final name.

use std::collections::HashMap;
use std::path::Path;

use crate::{Error, Result};

/// Built-in format for generic JSON-serializable payloads.
pub const FORMAT_JSON: &str = "json";
/// Built-in format dedicated to run checkpoints.
pub const FORMAT_CHECKPOINT: &str = "checkpoint";
/// Built-in format for raw byte payloads (images, opaque blobs).
pub const FORMAT_BYTES: &str = "bytes";
/// Built-in format for numeric arrays.
pub const FORMAT_ARRAY: &str = "array";

/// Payload accepted by the artifact store.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactValue {
    /// Any JSON-serializable structure (checkpoints, nested state)
    Json(serde_json::Value),
    /// Raw bytes (image data, opaque binary blobs)
    Bytes(Vec<u8>),
    /// A flat numeric array
    Floats(Vec<f64>),
}

impl ArtifactValue {
    /// Borrow the JSON payload, if this value is one.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the byte payload, if this value is one.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the numeric payload, if this value is one.
    #[must_use]
    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Self::Floats(f) => Some(f),
            _ => None,
        }
    }
}

/// Save half of a registered artifact format.
pub type SaveFn = Box<dyn Fn(&ArtifactValue, &Path) -> anyhow::Result<()> + Send + Sync>;
/// Load half of a registered artifact format.
pub type LoadFn = Box<dyn Fn(&Path) -> anyhow::Result<ArtifactValue> + Send + Sync>;

struct Codec {
    save: SaveFn,
    load: LoadFn,
}

/// Process-local registry mapping format names to save/load pairs.
///
/// Registration is last-writer-wins and never persisted; a process must
/// register its custom formats before logging or loading artifacts that use
/// them.
pub struct ArtifactRegistry {
    codecs: HashMap<String, Codec>,
}

impl std::fmt::Debug for ArtifactRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.codecs.keys().collect();
        names.sort();
        f.debug_struct("ArtifactRegistry")
            .field("formats", &names)
            .finish()
    }
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactRegistry {
    /// Create a registry holding the built-in formats.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };
        registry.register(FORMAT_JSON, Box::new(save_json), Box::new(load_json));
        registry.register(FORMAT_CHECKPOINT, Box::new(save_json), Box::new(load_json));
        registry.register(FORMAT_BYTES, Box::new(save_bytes), Box::new(load_bytes));
        registry.register(FORMAT_ARRAY, Box::new(save_floats), Box::new(load_floats));
        registry
    }

    /// Register a format, replacing any previous pair under the same name.
    pub fn register(&mut self, name: impl Into<String>, save: SaveFn, load: LoadFn) {
        self.codecs.insert(name.into(), Codec { save, load });
    }

    /// Whether a format name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Registered format names, sorted.
    #[must_use]
    pub fn formats(&self) -> Vec<String> {
        let mut names: Vec<String> = self.codecs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Save `value` to `path` atomically using the named format.
    ///
    /// The payload is serialized to a sibling temporary file which is then
    /// renamed over `path`. If serialization fails the temporary file is
    /// removed and any prior version of the artifact is left untouched.
    ///
    /// # Errors
    ///
    /// Fails if the format is unregistered or serialization fails.
    pub fn save(&self, format: &str, value: &ArtifactValue, path: &Path) -> Result<()> {
        let codec = self
            .codecs
            .get(format)
            .ok_or_else(|| Error::UnknownArtifactFormat(format.to_string()))?;

        let name = file_name_of(path);
        let tmp = tmp_sibling(path);
        if let Err(e) = (codec.save)(value, &tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(Error::Serialization {
                format: format.to_string(),
                name,
                reason: e.to_string(),
            });
        }
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Error::Serialization {
                format: format.to_string(),
                name,
                reason: format!("rename into place failed: {e}"),
            }
        })
    }

    /// Load the artifact at `path` using the named format.
    ///
    /// # Errors
    ///
    /// Fails if the format is unregistered, the file is absent
    /// ([`Error::NotFound`]) or deserialization fails.
    pub fn load(&self, format: &str, path: &Path) -> Result<ArtifactValue> {
        let codec = self
            .codecs
            .get(format)
            .ok_or_else(|| Error::UnknownArtifactFormat(format.to_string()))?;

        if !path.exists() {
            return Err(Error::NotFound {
                format: format.to_string(),
                name: file_name_of(path),
                dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            });
        }
        (codec.load)(path).map_err(|e| Error::Serialization {
            format: format.to_string(),
            name: file_name_of(path),
            reason: e.to_string(),
        })
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let name = file_name_of(path);
    let pid = std::process::id();
    path.with_file_name(format!(".{name}.tmp-{pid}"))
}

fn save_json(value: &ArtifactValue, path: &Path) -> anyhow::Result<()> {
    let json = value
        .as_json()
        .ok_or_else(|| anyhow::anyhow!("payload is not JSON"))?;
    std::fs::write(path, serde_json::to_vec_pretty(json)?)?;
    Ok(())
}

fn load_json(path: &Path) -> anyhow::Result<ArtifactValue> {
    let bytes = std::fs::read(path)?;
    Ok(ArtifactValue::Json(serde_json::from_slice(&bytes)?))
}

fn save_bytes(value: &ArtifactValue, path: &Path) -> anyhow::Result<()> {
    let bytes = value
        .as_bytes()
        .ok_or_else(|| anyhow::anyhow!("payload is not raw bytes"))?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn load_bytes(path: &Path) -> anyhow::Result<ArtifactValue> {
    Ok(ArtifactValue::Bytes(std::fs::read(path)?))
}

fn save_floats(value: &ArtifactValue, path: &Path) -> anyhow::Result<()> {
    let floats = value
        .as_floats()
        .ok_or_else(|| anyhow::anyhow!("payload is not a numeric array"))?;
    std::fs::write(path, serde_json::to_vec(&floats)?)?;
    Ok(())
}

fn load_floats(path: &Path) -> anyhow::Result<ArtifactValue> {
    let bytes = std::fs::read(path)?;
    Ok(ArtifactValue::Floats(serde_json::from_slice(&bytes)?))
}
