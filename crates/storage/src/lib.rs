use anyhow::{anyhow, Context, Result};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const IO_WRITE_MAX_RETRIES: usize = 3;
const IO_WRITE_RETRY_BACKOFF_MS: [u64; IO_WRITE_MAX_RETRIES] = [100, 300, 700];
static IO_WRITE_RETRY_TOTAL: AtomicU64 = AtomicU64::new(0);
static IO_TRANSIENT_ERROR_TOTAL: AtomicU64 = AtomicU64::new(0);

mod checkpoint;
mod io_retry;
mod key_list;
mod result_sink;

pub use checkpoint::CheckpointStore;
pub use io_retry::is_retryable_io_error;
pub use key_list::{load_key_set, merge_into_file, read_key_list, write_key_list, MergeReport};
pub use result_sink::{
    format_audit_line, parse_audit_line, read_audit_log, AppendReport, ResultSink,
    AUDIT_LOG_HEADER,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct IoContentionSnapshot {
    pub write_retry_total: u64,
    pub transient_error_total: u64,
}

pub fn io_contention_snapshot() -> IoContentionSnapshot {
    IoContentionSnapshot {
        write_retry_total: IO_WRITE_RETRY_TOTAL.load(Ordering::Relaxed),
        transient_error_total: IO_TRANSIENT_ERROR_TOTAL.load(Ordering::Relaxed),
    }
}

pub fn note_io_write_retry() {
    IO_WRITE_RETRY_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn note_io_transient_error() {
    IO_TRANSIENT_ERROR_TOTAL.fetch_add(1, Ordering::Relaxed);
}

/// Creates the parent directory of `path` when it has one.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent dir: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn temp_sibling_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("path has no file name: {}", path.display()))?;
    let mut temp_name = OsString::from(file_name);
    temp_name.push(".tmp");
    Ok(path.with_file_name(temp_name))
}

/// Replaces `path` with `contents` so a crash leaves either the previous file
/// or the new one: write a sibling temp file, fsync it, then rename over.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_dir(path)?;
    let temp_path = temp_sibling_path(path)?;
    io_retry::with_retry(|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })
    .with_context(|| format!("failed replacing {}", path.display()))?;
    sync_parent_dir(path);
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

pub(crate) fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
