use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

pub const WALLET_KEY_HEX_LEN: usize = 40;

pub const COUNTER_PROCESSED: &str = "processed";
pub const COUNTER_PASSED: &str = "passed";
pub const COUNTER_SECONDARY_SINK_FAILURES: &str = "secondary_sink_failures";

/// Normalized EVM-style address: `0x` followed by 40 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletKey(String);

impl WalletKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let hex = normalized.strip_prefix("0x")?;
        if hex.len() != WALLET_KEY_HEX_LEN || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WalletKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid wallet key: {value}"))
    }
}

impl From<WalletKey> for String {
    fn from(value: WalletKey) -> Self {
        value.0
    }
}

/// Duplicate-free key sequence. Iteration follows insertion order until the
/// set is sorted by [`KeySet::sorted`] or produced by [`KeySet::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: Vec<WalletKey>,
    seen: HashSet<WalletKey>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every line as a key, silently dropping blanks and malformed lines.
    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        lines.into_iter().filter_map(WalletKey::parse).collect()
    }

    pub fn insert(&mut self, key: WalletKey) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.keys.push(key);
        true
    }

    pub fn contains(&self, key: &WalletKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WalletKey> {
        self.keys.iter()
    }

    pub fn sorted(&self) -> Self {
        let ordered: BTreeSet<WalletKey> = self.keys.iter().cloned().collect();
        ordered.into_iter().collect()
    }

    /// Union of both sets in lexicographic order.
    pub fn merge(existing: &KeySet, incoming: &KeySet) -> KeySet {
        let ordered: BTreeSet<WalletKey> = existing
            .keys
            .iter()
            .chain(incoming.keys.iter())
            .cloned()
            .collect();
        ordered.into_iter().collect()
    }
}

impl FromIterator<WalletKey> for KeySet {
    fn from_iter<T: IntoIterator<Item = WalletKey>>(iter: T) -> Self {
        let mut set = KeySet::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}

impl<'a> IntoIterator for &'a KeySet {
    type Item = &'a WalletKey;
    type IntoIter = std::slice::Iter<'a, WalletKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentMetrics {
    pub balance_eth: Option<f64>,
    pub transaction_count: Option<u64>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub holder_count: Option<u64>,
    pub group: Option<String>,
}

impl EnrichmentMetrics {
    pub fn days_since_last_activity(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_activity_at
            .map(|last| (now - last).num_days().max(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Active,
    Inactive,
    Kept,
    Eliminated,
    Error,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Kept => "kept",
            Self::Eliminated => "eliminated",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "kept" => Some(Self::Kept),
            "eliminated" => Some(Self::Eliminated),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_passing(self) -> bool {
        matches!(self, Self::Active | Self::Kept)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnrichmentOutcome {
    Classified {
        metrics: EnrichmentMetrics,
        classification: Classification,
        score: Option<u8>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub key: WalletKey,
    pub outcome: EnrichmentOutcome,
    pub checked_at: DateTime<Utc>,
}

impl EnrichmentResult {
    pub fn classified(
        key: WalletKey,
        metrics: EnrichmentMetrics,
        classification: Classification,
        score: Option<u8>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            outcome: EnrichmentOutcome::Classified {
                metrics,
                classification,
                score,
            },
            checked_at,
        }
    }

    pub fn failed(key: WalletKey, error: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            key,
            outcome: EnrichmentOutcome::Failed {
                error: error.into(),
            },
            checked_at,
        }
    }

    pub fn classification(&self) -> Classification {
        match &self.outcome {
            EnrichmentOutcome::Classified { classification, .. } => *classification,
            EnrichmentOutcome::Failed { .. } => Classification::Error,
        }
    }

    pub fn metrics(&self) -> Option<&EnrichmentMetrics> {
        match &self.outcome {
            EnrichmentOutcome::Classified { metrics, .. } => Some(metrics),
            EnrichmentOutcome::Failed { .. } => None,
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.metrics().and_then(|metrics| metrics.group.as_deref())
    }

    pub fn is_passing(&self) -> bool {
        self.classification().is_passing()
    }
}

/// Durable progress of one pipeline instance.
///
/// Every field defaults when absent so older or newer files still load. The
/// camelCase aliases accept progress files written by the earlier scripts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    #[serde(alias = "processedWallets")]
    pub processed_keys: BTreeSet<WalletKey>,
    pub counters: BTreeMap<String, u64>,
    #[serde(alias = "lastIndex")]
    pub last_index: u64,
    #[serde(alias = "lastUpdate")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(alias = "startTime")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "totalCleaned", skip_serializing)]
    legacy_total_cleaned: Option<u64>,
}

impl Checkpoint {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(now),
            ..Self::default()
        }
    }

    /// Folds fields only present in legacy progress files into the current layout.
    pub fn absorb_legacy_fields(&mut self) {
        if let Some(total_cleaned) = self.legacy_total_cleaned.take() {
            self.counters
                .entry(COUNTER_PASSED.to_string())
                .or_insert(total_cleaned);
        }
        if !self.processed_keys.is_empty() {
            self.counters
                .entry(COUNTER_PROCESSED.to_string())
                .or_insert(self.processed_keys.len() as u64);
        }
    }

    pub fn is_processed(&self, key: &WalletKey) -> bool {
        self.processed_keys.contains(key)
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn bump(&mut self, name: &str) {
        let entry = self.counters.entry(name.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    /// Records a processed key. Returns `false` (and changes nothing) when the
    /// key was already marked, so replays never double count.
    pub fn mark_processed(
        &mut self,
        key: WalletKey,
        classification: Classification,
        index: u64,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.processed_keys.insert(key) {
            return false;
        }
        self.bump(COUNTER_PROCESSED);
        self.bump(classification.as_str());
        if classification.is_passing() {
            self.bump(COUNTER_PASSED);
        }
        self.last_index = self.last_index.max(index);
        self.last_update = Some(now);
        true
    }

    /// Keys of `keys` not yet processed, in `keys` order, with their positions.
    pub fn remaining<'a>(&self, keys: &'a KeySet) -> Vec<(usize, &'a WalletKey)> {
        keys.iter()
            .enumerate()
            .filter(|(_, key)| !self.is_processed(key))
            .collect()
    }
}
