use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub activity: ActivityConfig,
    #[serde(deserialize_with = "deserialize_scan_profile")]
    pub scan: RunProfileConfig,
    #[serde(deserialize_with = "deserialize_check_profile")]
    pub check: RunProfileConfig,
    pub elimination: EliminationConfig,
    pub enricher: EnricherConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            activity: ActivityConfig::default(),
            scan: RunProfileConfig::scan_defaults(),
            check: RunProfileConfig::check_defaults(),
            elimination: EliminationConfig::default(),
            enricher: EnricherConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub env: String,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Thresholds shared by every activity run profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub min_balance_eth: f64,
    pub min_transaction_count: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            min_balance_eth: 0.001,
            min_transaction_count: 5,
        }
    }
}

/// One resumable activity run: where keys come from, where results go, and
/// how often progress is flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunProfileConfig {
    pub input_path: String,
    pub audit_log_path: String,
    pub passed_list_path: String,
    pub checkpoint_path: String,
    pub checkpoint_every: u64,
    pub throttle_ms: u64,
    pub max_days_since_last_tx: i64,
    pub aggregate_summary: bool,
    pub compact_passed_list: bool,
}

impl RunProfileConfig {
    pub fn scan_defaults() -> Self {
        Self {
            input_path: "wallets/master-holders.csv".to_string(),
            audit_log_path: "wallets/wallet-activity.csv".to_string(),
            passed_list_path: "wallets/active-master-list.csv".to_string(),
            checkpoint_path: "wallets/activity-progress.json".to_string(),
            checkpoint_every: 10,
            throttle_ms: 200,
            max_days_since_last_tx: 90,
            aggregate_summary: true,
            compact_passed_list: true,
        }
    }

    pub fn check_defaults() -> Self {
        Self {
            input_path: "wallets/master-holders.csv".to_string(),
            audit_log_path: "wallets/re-master-activity.csv".to_string(),
            passed_list_path: "wallets/re-master-holders.csv".to_string(),
            checkpoint_path: "wallets/re-cleaning-progress.json".to_string(),
            checkpoint_every: 5,
            throttle_ms: 200,
            max_days_since_last_tx: 180,
            aggregate_summary: true,
            compact_passed_list: false,
        }
    }
}

/// Partial profile as written in TOML. Absent keys keep the defaults of the
/// profile the table belongs to, so `[check]` never inherits `[scan]` paths.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RunProfilePatch {
    input_path: Option<String>,
    audit_log_path: Option<String>,
    passed_list_path: Option<String>,
    checkpoint_path: Option<String>,
    checkpoint_every: Option<u64>,
    throttle_ms: Option<u64>,
    max_days_since_last_tx: Option<i64>,
    aggregate_summary: Option<bool>,
    compact_passed_list: Option<bool>,
}

impl RunProfilePatch {
    fn apply(self, base: RunProfileConfig) -> RunProfileConfig {
        RunProfileConfig {
            input_path: self.input_path.unwrap_or(base.input_path),
            audit_log_path: self.audit_log_path.unwrap_or(base.audit_log_path),
            passed_list_path: self.passed_list_path.unwrap_or(base.passed_list_path),
            checkpoint_path: self.checkpoint_path.unwrap_or(base.checkpoint_path),
            checkpoint_every: self.checkpoint_every.unwrap_or(base.checkpoint_every),
            throttle_ms: self.throttle_ms.unwrap_or(base.throttle_ms),
            max_days_since_last_tx: self
                .max_days_since_last_tx
                .unwrap_or(base.max_days_since_last_tx),
            aggregate_summary: self.aggregate_summary.unwrap_or(base.aggregate_summary),
            compact_passed_list: self.compact_passed_list.unwrap_or(base.compact_passed_list),
        }
    }
}

fn deserialize_scan_profile<'de, D>(deserializer: D) -> Result<RunProfileConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RunProfilePatch::deserialize(deserializer)?.apply(RunProfileConfig::scan_defaults()))
}

fn deserialize_check_profile<'de, D>(deserializer: D) -> Result<RunProfileConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RunProfilePatch::deserialize(deserializer)?.apply(RunProfileConfig::check_defaults()))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EliminationConfig {
    pub summary_report_path: String,
    pub wallets_dir: String,
    pub audit_log_path: String,
    pub kept_list_path: String,
    pub compilation_path: String,
    pub checkpoint_path: String,
    pub checkpoint_every: u64,
    pub min_holders: u64,
}

impl Default for EliminationConfig {
    fn default() -> Self {
        Self {
            summary_report_path: "wallets/summary-report.txt".to_string(),
            wallets_dir: "wallets".to_string(),
            audit_log_path: "wallets/eliminator-audit.csv".to_string(),
            kept_list_path: "wallets/kept-collections.csv".to_string(),
            compilation_path: "wallets/compilation.csv".to_string(),
            checkpoint_path: "wallets/eliminator-progress.json".to_string(),
            checkpoint_every: 10,
            min_holders: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnricherConfig {
    pub rpc_url: String,
    pub rpc_url_file: String,
    pub request_timeout_ms: u64,
    pub rps_limit: u64,
    pub rps_burst: u64,
    /// Also look up transfers *to* the wallet when deriving last activity.
    /// Off by default: only outgoing transfers count as activity.
    pub include_incoming_transfers: bool,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://eth-mainnet.g.alchemy.com/v2/REPLACE_ME".to_string(),
            rpc_url_file: String::new(),
            request_timeout_ms: 10_000,
            rps_limit: 25,
            rps_burst: 25,
            include_incoming_transfers: false,
        }
    }
}
