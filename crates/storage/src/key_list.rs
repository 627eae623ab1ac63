use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};
use walletscan_core_types::{KeySet, WalletKey, WALLET_KEY_HEX_LEN};

use super::write_atomic;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub existing: usize,
    pub incoming: usize,
    pub merged: usize,
    pub added: usize,
}

/// Reads a key list file. A missing file is an empty set; header rows, blank
/// lines and anything that is not a key are dropped.
pub fn read_key_list(path: &Path) -> Result<KeySet> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(KeySet::new()),
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read key list {}", path.display()))
        }
    };

    let mut keys = KeySet::new();
    let mut dropped = 0usize;
    for line in raw.lines() {
        // Tolerate multi-column rows by taking the first field.
        let first = line.split(',').next().unwrap_or_default().trim();
        if first.is_empty() {
            continue;
        }
        match WalletKey::parse(first) {
            Some(key) => {
                keys.insert(key);
            }
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(
            path = %path.display(),
            dropped,
            "skipped non-key lines in key list"
        );
    }
    Ok(keys)
}

/// Like [`read_key_list`] but never fails: an unreadable file is logged and
/// treated as empty.
pub fn load_key_set(path: &Path) -> KeySet {
    match read_key_list(path) {
        Ok(keys) => keys,
        Err(error) => {
            warn!(
                path = %path.display(),
                error = %format!("{error:#}"),
                "key list unreadable, treating as empty"
            );
            KeySet::new()
        }
    }
}

/// Atomically replaces `path` with one key per line.
pub fn write_key_list(path: &Path, keys: &KeySet) -> Result<()> {
    let mut contents = String::with_capacity(keys.len() * (WALLET_KEY_HEX_LEN + 3));
    for key in keys {
        contents.push_str(key.as_str());
        contents.push('\n');
    }
    write_atomic(path, contents.as_bytes())
}

/// Unions `incoming` into the key list stored at `path`, writing the result
/// sorted and deduplicated. Merging the same input twice changes nothing.
pub fn merge_into_file(path: &Path, incoming: &KeySet) -> Result<MergeReport> {
    let existing = read_key_list(path)?;
    let merged = KeySet::merge(&existing, incoming);
    write_key_list(path, &merged)?;
    Ok(MergeReport {
        existing: existing.len(),
        incoming: incoming.len(),
        merged: merged.len(),
        added: merged.len().saturating_sub(existing.len()),
    })
}
