use std::collections::HashMap;
use walletscan_core_types::{EnrichmentMetrics, WalletKey};

use crate::{EnrichError, EnrichErrorKind, Enricher};

#[derive(Debug, Clone)]
struct HolderEntry {
    holder_count: Option<u64>,
    group: String,
}

/// Offline enricher answering from holder counts already collected in a
/// summary report. Keys are collection contract addresses.
#[derive(Debug, Clone, Default)]
pub struct HolderCountEnricher {
    entries: HashMap<WalletKey, HolderEntry>,
}

impl HolderCountEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a contract. A contract listed twice keeps its first entry.
    pub fn insert(&mut self, contract: WalletKey, holder_count: Option<u64>, group: impl Into<String>) {
        self.entries.entry(contract).or_insert(HolderEntry {
            holder_count,
            group: group.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Enricher for HolderCountEnricher {
    fn fetch(&self, key: &WalletKey) -> Result<EnrichmentMetrics, EnrichError> {
        let entry = self.entries.get(key).ok_or_else(|| {
            EnrichError::new(
                EnrichErrorKind::NotFound,
                format!("{key} is not listed in the summary report"),
            )
        })?;
        Ok(EnrichmentMetrics {
            holder_count: entry.holder_count,
            group: Some(entry.group.clone()),
            ..EnrichmentMetrics::default()
        })
    }
}
