use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;
use walletscan_core_types::WalletKey;

const ARTIST_PREFIX: &str = "ARTIST: ";
const CONTRACT_PREFIX: &str = "Contract:";
const HOLDERS_PREFIX: &str = "Holders:";
const ITEM_INDENT: &str = "  ";

/// One collection listed in a summary report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub artist: String,
    pub collection: String,
    pub contract: WalletKey,
    pub holders: Option<u64>,
}

#[derive(Debug, Default)]
struct PendingItem {
    name: String,
    contract: Option<WalletKey>,
}

/// Parses the plain-text summary report:
///
/// ```text
/// ARTIST: Alice
///   Genesis
///     Contract: 0x...
///     Holders: 1,234
/// ```
///
/// An entry is emitted at its `Holders:` line when an artist, an item name and
/// a contract are all known. Blank and unrecognized lines are skipped. A
/// holders value that is not a number yields `holders: None`.
pub fn parse_summary_report(text: &str) -> Vec<ReportEntry> {
    let mut entries = Vec::new();
    let mut artist: Option<String> = None;
    let mut pending: Option<PendingItem> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(name) = trimmed.strip_prefix(ARTIST_PREFIX) {
            artist = Some(name.trim().to_string());
            pending = None;
            continue;
        }
        let Some(current_artist) = artist.as_deref() else {
            continue;
        };

        if let Some(raw) = trimmed.strip_prefix(CONTRACT_PREFIX) {
            if let Some(item) = pending.as_mut() {
                item.contract = WalletKey::parse(raw);
            }
            continue;
        }
        if let Some(raw) = trimmed.strip_prefix(HOLDERS_PREFIX) {
            let Some(item) = pending.take() else {
                continue;
            };
            match item.contract {
                Some(contract) => entries.push(ReportEntry {
                    artist: current_artist.to_string(),
                    collection: item.name,
                    contract,
                    holders: parse_holder_count(raw),
                }),
                None => debug!(
                    artist = current_artist,
                    collection = %item.name,
                    "report item has no contract, skipping"
                ),
            }
            continue;
        }
        if line.starts_with(ITEM_INDENT)
            && !trimmed.starts_with("ARTIST")
            && !trimmed.starts_with("COLLECTIONS:")
        {
            pending = Some(PendingItem {
                name: trimmed.to_string(),
                contract: None,
            });
        }
    }
    entries
}

/// `"1,234"` → `1234`. Thousands separators are the only non-digits allowed.
fn parse_holder_count(raw: &str) -> Option<u64> {
    let digits: String = raw.trim().chars().filter(|ch| *ch != ',').collect();
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn load_summary_report(path: &Path) -> Result<Vec<ReportEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read summary report {}", path.display()))?;
    Ok(parse_summary_report(&raw))
}

/// Directory name of a collection inside its artist folder: lowercase ASCII
/// letters, digits and dashes.
pub fn collection_folder_name(collection: &str) -> String {
    let kept: String = collection
        .to_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch.is_whitespace())
        .collect();
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .trim_matches('-')
        .to_string()
}
