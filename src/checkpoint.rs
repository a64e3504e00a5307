//! Durable progress records for the tokenization and window streaming passes.
//!
//! Both checkpoints are small JSON documents carrying a `version` field. Writes go
//! through [`write_atomic`], so a subsequent load only ever observes a complete file.
//! Loads treat a missing or unparsable file as "no checkpoint", but a readable file
//! written under a different schema version is rejected with
//! [`WikitokError::SchemaMismatch`].

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::encoder::Token;
use crate::error::{Result, WikitokError};

/// Schema version written into every checkpoint.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Progress of the tokenization pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenizeCheckpoint {
    /// Schema version of the record.
    pub version: u32,
    /// Number of blocks fully written to the cache; also the block to resume from.
    pub last_completed_block: usize,
}

impl TokenizeCheckpoint {
    /// Creates a checkpoint at the current schema version.
    #[must_use]
    pub fn new(last_completed_block: usize) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            last_completed_block,
        }
    }

    /// Loads the checkpoint at `path`, returning `None` when absent or unreadable.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        load_versioned(path)
    }

    /// Returns the block to resume from, defaulting to zero.
    pub fn load_or_default(path: &Path) -> Result<usize> {
        Ok(Self::load(path)?.map_or(0, |ckpt| ckpt.last_completed_block))
    }

    /// Atomically overwrites the checkpoint at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_vec(self)?)
    }
}

/// Resume point of the sliding-window reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrainCheckpoint {
    /// Schema version of the record.
    pub version: u32,
    /// Next unread byte offset in the token cache.
    pub cursor_bytes: u64,
    /// Pending tokens already read from before `cursor_bytes`.
    pub buffer: Vec<Token>,
}

impl Default for TrainCheckpoint {
    fn default() -> Self {
        Self::new(0, Vec::new())
    }
}

impl TrainCheckpoint {
    /// Creates a checkpoint at the current schema version.
    #[must_use]
    pub fn new(cursor_bytes: u64, buffer: Vec<Token>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            cursor_bytes,
            buffer,
        }
    }

    /// Loads the checkpoint at `path`, returning `None` when absent or unreadable.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        load_versioned(path)
    }

    /// Loads the checkpoint at `path`, defaulting to the start of the cache.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    /// Atomically overwrites the checkpoint at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_vec(self)?)
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    #[serde(default)]
    version: u32,
}

fn load_versioned<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            warn!("ignoring unreadable checkpoint {}: {err}", path.display());
            return Ok(None);
        }
    };
    let probe: VersionProbe = match serde_json::from_slice(&data) {
        Ok(probe) => probe,
        Err(err) => {
            warn!("ignoring corrupt checkpoint {}: {err}", path.display());
            return Ok(None);
        }
    };
    if probe.version != CHECKPOINT_VERSION {
        return Err(WikitokError::SchemaMismatch {
            path: path.to_path_buf(),
            found: probe.version,
            expected: CHECKPOINT_VERSION,
        });
    }
    match serde_json::from_slice(&data) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!("ignoring corrupt checkpoint {}: {err}", path.display());
            Ok(None)
        }
    }
}

/// Replaces `path` with `contents` via a synced temporary file in the same directory.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|err| WikitokError::io(err, Some(dir.to_path_buf())))?;
    let mut tmp =
        NamedTempFile::new_in(dir).map_err(|err| WikitokError::io(err, Some(dir.to_path_buf())))?;
    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| WikitokError::io(err, Some(tmp.path().to_path_buf())))?;
    tmp.persist(path)
        .map_err(|err| WikitokError::io(err.error, Some(path.to_path_buf())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_checkpoints_default_to_origin() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("absent.json");
        assert_eq!(TokenizeCheckpoint::load_or_default(&path).expect("load"), 0);
        assert_eq!(
            TrainCheckpoint::load_or_default(&path).expect("load"),
            TrainCheckpoint::default()
        );
    }

    #[test]
    fn train_checkpoint_round_trips_buffer_verbatim() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("train.json");
        let ckpt = TrainCheckpoint::new(4096, vec![256, 0, 17, 255, 256]);
        ckpt.save(&path).expect("save");
        assert_eq!(TrainCheckpoint::load(&path).expect("load"), Some(ckpt));
    }

    #[test]
    fn save_overwrites_previous_checkpoint() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state").join("tokenize.json");
        TokenizeCheckpoint::new(10).save(&path).expect("save");
        TokenizeCheckpoint::new(20).save(&path).expect("save");
        assert_eq!(TokenizeCheckpoint::load_or_default(&path).expect("load"), 20);
        let leftovers = fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 1, "temporary files are renamed away");
    }

    #[test]
    fn corrupt_checkpoint_is_treated_as_absent() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("train.json");
        fs::write(&path, b"{\"version\": 1, \"cursor_bytes\": 12, \"buf").expect("write");
        assert_eq!(TrainCheckpoint::load(&path).expect("load"), None);
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tokenize.json");
        fs::write(&path, br#"{"block_idx": 40}"#).expect("write legacy checkpoint");
        let err = TokenizeCheckpoint::load(&path).expect_err("legacy schema rejected");
        assert!(matches!(
            err,
            WikitokError::SchemaMismatch { found: 0, expected: CHECKPOINT_VERSION, .. }
        ));
    }
}
