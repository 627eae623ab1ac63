use chrono::{DateTime, Utc};
use walletscan_config::{ActivityConfig, RunProfileConfig};
use walletscan_core_types::{Classification, EnrichmentMetrics};

const SCORE_BALANCE: u8 = 30;
const SCORE_TRANSACTIONS: u8 = 30;
const SCORE_RECENT: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityThresholds {
    pub min_balance_eth: f64,
    pub min_transaction_count: u64,
    pub max_days_since_last_tx: i64,
}

impl ActivityThresholds {
    pub fn from_config(activity: &ActivityConfig, profile: &RunProfileConfig) -> Self {
        Self {
            min_balance_eth: activity.min_balance_eth,
            min_transaction_count: activity.min_transaction_count,
            max_days_since_last_tx: profile.max_days_since_last_tx,
        }
    }
}

/// Turns enrichment metrics into a classification. Pure: the same metrics,
/// thresholds and `now` always classify the same way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassificationPolicy {
    Activity(ActivityThresholds),
    HolderCount { min_holders: u64 },
}

impl ClassificationPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Activity(_) => "activity",
            Self::HolderCount { .. } => "holder_count",
        }
    }

    pub fn classify(
        &self,
        metrics: &EnrichmentMetrics,
        now: DateTime<Utc>,
    ) -> (Classification, Option<u8>) {
        match self {
            Self::Activity(thresholds) => classify_activity(thresholds, metrics, now),
            Self::HolderCount { min_holders } => {
                let classification = match metrics.holder_count {
                    Some(holders) if holders >= *min_holders => Classification::Kept,
                    _ => Classification::Eliminated,
                };
                (classification, None)
            }
        }
    }
}

fn classify_activity(
    thresholds: &ActivityThresholds,
    metrics: &EnrichmentMetrics,
    now: DateTime<Utc>,
) -> (Classification, Option<u8>) {
    let balance_ok = metrics
        .balance_eth
        .is_some_and(|balance| balance >= thresholds.min_balance_eth);
    let transactions_ok = metrics
        .transaction_count
        .is_some_and(|count| count >= thresholds.min_transaction_count);
    let days_since = metrics.days_since_last_activity(now);
    let recent_ok = days_since.map_or(true, |days| days <= thresholds.max_days_since_last_tx);

    let mut score = 0u8;
    if balance_ok {
        score += SCORE_BALANCE;
    }
    if transactions_ok {
        score += SCORE_TRANSACTIONS;
    }
    if days_since.is_some() && recent_ok {
        score += SCORE_RECENT;
    }

    let classification = if balance_ok && transactions_ok && recent_ok {
        Classification::Active
    } else {
        Classification::Inactive
    };
    (classification, Some(score))
}
