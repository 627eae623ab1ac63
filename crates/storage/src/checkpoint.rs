use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walletscan_core_types::Checkpoint;

use super::{ensure_parent_dir, write_atomic};

/// File-backed checkpoint for one pipeline instance.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Makes sure the checkpoint can be written at all. A run that cannot
    /// persist progress must not start.
    pub fn prepare(&self) -> Result<()> {
        ensure_parent_dir(&self.path)
            .with_context(|| format!("checkpoint dir not writable for {}", self.path.display()))
    }

    /// Loads the last flushed checkpoint. A missing file starts fresh; an
    /// unreadable or corrupt one is logged and also starts fresh, since the
    /// audit log still holds every emitted record.
    pub fn load(&self, now: DateTime<Utc>) -> Checkpoint {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no checkpoint found, starting fresh");
                return Checkpoint::fresh(now);
            }
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    "failed reading checkpoint, starting fresh"
                );
                return Checkpoint::fresh(now);
            }
        };

        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(mut checkpoint) => {
                checkpoint.absorb_legacy_fields();
                if checkpoint.started_at.is_none() {
                    checkpoint.started_at = Some(now);
                }
                info!(
                    path = %self.path.display(),
                    processed = checkpoint.processed_keys.len(),
                    last_index = checkpoint.last_index,
                    "resuming from checkpoint"
                );
                checkpoint
            }
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    "checkpoint is corrupt, starting fresh"
                );
                Checkpoint::fresh(now)
            }
        }
    }

    pub fn flush(&self, checkpoint: &Checkpoint) -> Result<()> {
        let payload =
            serde_json::to_vec_pretty(checkpoint).context("failed to serialize checkpoint")?;
        write_atomic(&self.path, &payload)
            .with_context(|| format!("failed to flush checkpoint {}", self.path.display()))
    }

    /// Deletes the checkpoint. Returns whether a file was removed.
    pub fn reset(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error)
                .with_context(|| format!("failed to remove checkpoint {}", self.path.display())),
        }
    }
}
