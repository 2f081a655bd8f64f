//! Batch checkpoints.
//!
//! One JSON file maps batch id to its [`BatchResult`]. It is rewritten whole,
//! through a temp file in the same directory and a rename, after every batch,
//! so a crash leaves either the old or the new file on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::blend::BatchResult;
use crate::error::{Result, SnapshotError};

/// Serializes `value` as pretty JSON and atomically replaces `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let tmp = NamedTempFile::new_in(&dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SnapshotError::Io(e.error))?;
    debug!("[CHECKPOINT] wrote {}", path.display());
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        SnapshotError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read {}: {}", path.display(), e),
        ))
    })?;
    Ok(serde_json::from_str(&content)?)
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    batches: BTreeMap<String, BatchResult>,
}

impl CheckpointStore {
    /// Opens the checkpoint file, treating a missing file as empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let batches = if path.exists() {
            read_json(&path)?
        } else {
            BTreeMap::new()
        };
        info!(
            "[CHECKPOINT] {} batches already recorded in {}",
            batches.len(),
            path.display()
        );
        Ok(Self { path, batches })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, batch_id: &str) -> bool {
        self.batches.contains_key(batch_id)
    }

    pub fn get(&self, batch_id: &str) -> Option<&BatchResult> {
        self.batches.get(batch_id)
    }

    pub fn batches(&self) -> &BTreeMap<String, BatchResult> {
        &self.batches
    }

    /// Records a finished batch and saves. Returns `false`, writing nothing,
    /// if the batch id is already present.
    pub fn record(&mut self, batch_id: &str, result: BatchResult) -> Result<bool> {
        if self.contains(batch_id) {
            info!("[CHECKPOINT] batch {} already recorded, keeping existing result", batch_id);
            return Ok(false);
        }
        self.batches.insert(batch_id.to_string(), result);
        if let Err(e) = write_json_atomic(&self.path, &self.batches) {
            // keep memory in step with disk
            self.batches.remove(batch_id);
            return Err(e);
        }
        info!("[CHECKPOINT] recorded batch {}", batch_id);
        Ok(true)
    }
}
