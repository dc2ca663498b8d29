// ── Per-instance artifacts ──
//
// Everything the store keeps for one instance lives in the instances
// directory as `<id><suffix>`.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    /// Static record (identity, config, entities, meta).
    Record,
    /// Live entity state document.
    State,
    /// Cached module script for the instance.
    Script,
    /// Script-private state.
    ScriptState,
}

impl Artifact {
    /// Every artifact, in the order deletion removes them.
    pub const ALL: [Self; 4] = [Self::Record, Self::State, Self::Script, Self::ScriptState];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Record => ".instance.json",
            Self::State => ".state.json",
            Self::Script => ".script",
            Self::ScriptState => ".script.state.json",
        }
    }

    /// Parse the `file_type` accepted by `get_instance_file`.
    pub fn from_file_type(file_type: &str) -> Option<Self> {
        match file_type {
            "script" => Some(Self::Script),
            "state" => Some(Self::State),
            _ => None,
        }
    }

    pub(crate) fn path(self, dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}{}", self.suffix()))
    }
}

// ── File helpers ─────────────────────────────────────────────────────

/// Write via a sibling temp file and rename, so readers never observe a
/// half-written artifact.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CoreError::persistence(path, e)
    })
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CoreError> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| CoreError::Internal(format!("serialize {}: {e}", path.display())))?;
    write_atomic(path, &data)
}

/// `Ok(None)` when the file does not exist.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CoreError> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::persistence(path, e)),
    }
}

/// `Ok(None)` when the file does not exist; corrupt JSON is an error.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    let Some(data) = read_optional(path)? else {
        return Ok(None);
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| CoreError::CorruptRecord {
            path: path.to_path_buf(),
            source,
        })
}
