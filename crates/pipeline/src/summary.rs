use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;
use walletscan_core_types::{Classification, EnrichmentResult, KeySet, WalletKey};
use walletscan_storage::read_audit_log;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupSummary {
    pub total: u64,
    pub passing: u64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: u64,
    pub by_classification: BTreeMap<Classification, u64>,
    pub errors: u64,
    pub passing: u64,
    pub pass_rate: f64,
    pub groups: BTreeMap<String, GroupSummary>,
}

impl RunSummary {
    pub fn count(&self, classification: Classification) -> u64 {
        self.by_classification
            .get(&classification)
            .copied()
            .unwrap_or(0)
    }

    pub fn pass_rate_percent(&self) -> String {
        format!("{:.1}%", self.pass_rate * 100.0)
    }

    pub fn log(&self, label: &str) {
        info!(
            label,
            total = self.total,
            passing = self.passing,
            errors = self.errors,
            active = self.count(Classification::Active),
            inactive = self.count(Classification::Inactive),
            kept = self.count(Classification::Kept),
            eliminated = self.count(Classification::Eliminated),
            pass_rate = %self.pass_rate_percent(),
            groups = self.groups.len(),
            "run summary"
        );
    }
}

fn rate(passing: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    passing as f64 / total as f64
}

fn bump_counter<K: Ord>(counters: &mut BTreeMap<K, u64>, key: K) {
    let entry = counters.entry(key).or_insert(0);
    *entry = entry.saturating_add(1);
}

/// Folds results into a summary. When a key appears more than once the last
/// record wins, so a result appended twice across a crash counts once.
pub fn aggregate<'a, I>(results: I) -> RunSummary
where
    I: IntoIterator<Item = &'a EnrichmentResult>,
{
    let mut latest: HashMap<&'a WalletKey, &'a EnrichmentResult> = HashMap::new();
    let mut order: Vec<&'a WalletKey> = Vec::new();
    for result in results {
        if latest.insert(&result.key, result).is_none() {
            order.push(&result.key);
        }
    }

    let mut summary = RunSummary::default();
    for key in order {
        let Some(result) = latest.get(key) else {
            continue;
        };
        let classification = result.classification();
        summary.total += 1;
        bump_counter(&mut summary.by_classification, classification);
        if classification == Classification::Error {
            summary.errors += 1;
        }
        let passing = classification.is_passing();
        if passing {
            summary.passing += 1;
        }
        if let Some(group) = result.group().filter(|group| !group.trim().is_empty()) {
            let entry = summary.groups.entry(group.to_string()).or_default();
            entry.total += 1;
            if passing {
                entry.passing += 1;
            }
        }
    }

    summary.pass_rate = rate(summary.passing, summary.total);
    for group in summary.groups.values_mut() {
        group.pass_rate = rate(group.passing, group.total);
    }
    summary
}

/// Keys whose latest record is passing, in order of first appearance. This is
/// the content every passed list is rebuilt from.
pub fn passing_keys(records: &[EnrichmentResult]) -> KeySet {
    let mut latest: HashMap<&WalletKey, bool> = HashMap::new();
    for record in records {
        latest.insert(&record.key, record.is_passing());
    }
    records
        .iter()
        .map(|record| &record.key)
        .filter(|key| latest.get(key).copied().unwrap_or(false))
        .cloned()
        .collect()
}

pub fn summarize_audit_log(path: &Path) -> Result<RunSummary> {
    let records = read_audit_log(path)?;
    Ok(aggregate(&records))
}
