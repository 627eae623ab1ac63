use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use walletscan_core_types::{
    Classification, EnrichmentMetrics, EnrichmentOutcome, EnrichmentResult, WalletKey,
};

use super::{ensure_parent_dir, open_append};

pub const AUDIT_LOG_HEADER: &str = "wallet_address,classification,eth_balance,transaction_count,last_activity_at,days_since_last_activity,holder_count,activity_score,group,error,check_timestamp";
const AUDIT_LOG_COLUMNS: usize = 11;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendReport {
    pub secondary_failures: usize,
}

/// Append-only result destinations. Every record lands in the primary audit
/// log; passing records are also appended to each secondary key list.
///
/// `append` returns only after the primary write is synced to disk. A failed
/// secondary write is reported but does not fail the append, because the
/// audit log alone is enough to rebuild any secondary list.
#[derive(Debug, Clone)]
pub struct ResultSink {
    audit_log_path: PathBuf,
    passed_list_paths: Vec<PathBuf>,
}

impl ResultSink {
    pub fn open(audit_log_path: impl Into<PathBuf>, passed_list_paths: Vec<PathBuf>) -> Result<Self> {
        let audit_log_path = audit_log_path.into();
        ensure_parent_dir(&audit_log_path)?;
        prepare_audit_log(&audit_log_path)?;
        for path in &passed_list_paths {
            ensure_parent_dir(path)?;
        }
        Ok(Self {
            audit_log_path,
            passed_list_paths,
        })
    }

    pub fn audit_log_path(&self) -> &Path {
        &self.audit_log_path
    }

    pub fn passed_list_paths(&self) -> &[PathBuf] {
        &self.passed_list_paths
    }

    pub fn append(&self, result: &EnrichmentResult) -> Result<AppendReport> {
        let line = format_audit_line(result);
        append_line_synced(&self.audit_log_path, &line).with_context(|| {
            format!(
                "failed to append audit record for {} to {}",
                result.key,
                self.audit_log_path.display()
            )
        })?;

        let mut report = AppendReport::default();
        if !result.is_passing() {
            return Ok(report);
        }
        for path in &self.passed_list_paths {
            if let Err(error) = append_line_synced(path, result.key.as_str()) {
                report.secondary_failures += 1;
                warn!(
                    key = %result.key,
                    path = %path.display(),
                    error = %error,
                    "failed to append passed key to secondary list"
                );
            }
        }
        Ok(report)
    }
}

/// Creates the audit log with its header, or repairs a trailing record that
/// was cut short by a crash so the next append starts on a fresh line.
fn prepare_audit_log(path: &Path) -> Result<()> {
    let len = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(error) if error.kind() == ErrorKind::NotFound => 0,
        Err(error) => {
            return Err(error).with_context(|| format!("failed to stat {}", path.display()))
        }
    };
    if len == 0 {
        return append_line_synced(path, AUDIT_LOG_HEADER)
            .with_context(|| format!("failed to write audit log header {}", path.display()));
    }

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open audit log {}", path.display()))?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        warn!(path = %path.display(), "audit log ends mid-record, terminating it");
        file.write_all(b"\n")?;
        file.sync_data()?;
    }
    Ok(())
}

fn append_line_synced(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = open_append(path)?;
    let mut buffer = String::with_capacity(line.len() + 1);
    buffer.push_str(line);
    buffer.push('\n');
    file.write_all(buffer.as_bytes())?;
    file.sync_data()
}

pub fn format_audit_line(result: &EnrichmentResult) -> String {
    let mut fields: Vec<String> = Vec::with_capacity(AUDIT_LOG_COLUMNS);
    fields.push(result.key.to_string());
    fields.push(result.classification().to_string());
    match &result.outcome {
        EnrichmentOutcome::Classified { metrics, score, .. } => {
            fields.push(
                metrics
                    .balance_eth
                    .map(|balance| format!("{balance:.6}"))
                    .unwrap_or_default(),
            );
            fields.push(optional_field(metrics.transaction_count));
            fields.push(
                metrics
                    .last_activity_at
                    .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default(),
            );
            fields.push(optional_field(
                metrics.days_since_last_activity(result.checked_at),
            ));
            fields.push(optional_field(metrics.holder_count));
            fields.push(optional_field(*score));
            fields.push(sanitize_field(metrics.group.as_deref().unwrap_or_default()));
            fields.push(String::new());
        }
        EnrichmentOutcome::Failed { error } => {
            fields.extend(std::iter::repeat(String::new()).take(7));
            fields.push(sanitize_field(error));
        }
    }
    fields.push(
        result
            .checked_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    fields.join(",")
}

fn optional_field<T: ToString>(value: Option<T>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// Free-text columns cannot carry the separator or line breaks.
fn sanitize_field(raw: &str) -> String {
    raw.chars()
        .map(|ch| match ch {
            ',' => ';',
            '\r' | '\n' => ' ',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Parses one audit log row. Header rows, truncated rows and rows with an
/// unknown classification yield `None`.
pub fn parse_audit_line(line: &str) -> Option<EnrichmentResult> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
    if fields.len() != AUDIT_LOG_COLUMNS {
        return None;
    }
    let key = WalletKey::parse(fields[0])?;
    let classification = Classification::parse(fields[1])?;
    let checked_at = DateTime::parse_from_rfc3339(fields[10].trim())
        .ok()?
        .with_timezone(&Utc);

    if classification == Classification::Error {
        return Some(EnrichmentResult::failed(key, fields[9].trim(), checked_at));
    }

    let metrics = EnrichmentMetrics {
        balance_eth: parse_optional(fields[2])?,
        transaction_count: parse_optional(fields[3])?,
        last_activity_at: match fields[4].trim() {
            "" => None,
            raw => Some(DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc)),
        },
        holder_count: parse_optional(fields[6])?,
        group: Some(fields[8].trim())
            .filter(|group| !group.is_empty())
            .map(str::to_string),
    };
    let score = parse_optional(fields[7])?;
    Some(EnrichmentResult::classified(
        key,
        metrics,
        classification,
        score,
        checked_at,
    ))
}

/// `Some(None)` for an empty field, `None` when the field does not parse.
fn parse_optional<T: std::str::FromStr>(raw: &str) -> Option<Option<T>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(None);
    }
    raw.parse().ok().map(Some)
}

/// Reads every well-formed record of an audit log in file order. A missing
/// log reads as empty.
pub fn read_audit_log(path: &Path) -> Result<Vec<EnrichmentResult>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read audit log {}", path.display()))
        }
    };
    let mut skipped = 0usize;
    let mut records = Vec::new();
    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        match parse_audit_line(line) {
            Some(record) => records.push(record),
            None if line.starts_with("wallet_address") => {}
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped malformed audit log rows");
    }
    Ok(records)
}
