use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::env_parsing::{parse_env_bool, parse_env_number, validate_app_config};
use super::AppConfig;

pub const CONFIG_PATH_ENV: &str = "WALLETSCAN_CONFIG";
pub const API_KEY_ENV: &str = "ALCHEMY_API_KEY";
const API_KEY_PLACEHOLDER: &str = "REPLACE_ME";

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

pub fn load_from_env_or_default(default_path: &Path) -> Result<(AppConfig, PathBuf)> {
    let configured = env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_path.to_path_buf());
    let mut config = load_from_path(&configured)?;

    if let Ok(log_level) = env::var("WALLETSCAN_LOG_LEVEL") {
        let trimmed = log_level.trim();
        if !trimmed.is_empty() {
            config.system.log_level = trimmed.to_string();
        }
    }
    if let Some(log_json) = env::var("WALLETSCAN_LOG_JSON").ok().and_then(parse_env_bool) {
        config.system.log_json = log_json;
    }

    if let Ok(rpc_url) = env::var("WALLETSCAN_RPC_URL") {
        config.enricher.rpc_url = rpc_url.trim().to_string();
    }
    if let Ok(rpc_url_file) = env::var("WALLETSCAN_RPC_URL_FILE") {
        config.enricher.rpc_url_file = rpc_url_file.trim().to_string();
    }
    if let Ok(api_key) = env::var(API_KEY_ENV) {
        let api_key = api_key.trim();
        if !api_key.is_empty()
            && config.enricher.rpc_url_file.trim().is_empty()
            && config.enricher.rpc_url.contains(API_KEY_PLACEHOLDER)
        {
            config.enricher.rpc_url = config
                .enricher
                .rpc_url
                .replace(API_KEY_PLACEHOLDER, api_key);
        }
    }
    if let Some(timeout_ms) = parse_env_number::<u64>("WALLETSCAN_RPC_TIMEOUT_MS")? {
        config.enricher.request_timeout_ms = timeout_ms;
    }
    if let Some(rps_limit) = parse_env_number::<u64>("WALLETSCAN_RPC_RPS_LIMIT")? {
        config.enricher.rps_limit = rps_limit;
    }
    if let Some(include_incoming) = env::var("WALLETSCAN_INCLUDE_INCOMING_TRANSFERS")
        .ok()
        .and_then(parse_env_bool)
    {
        config.enricher.include_incoming_transfers = include_incoming;
    }

    if let Some(min_balance_eth) = parse_env_number::<f64>("WALLETSCAN_ACTIVITY_MIN_BALANCE_ETH")? {
        config.activity.min_balance_eth = min_balance_eth;
    }
    if let Some(min_transaction_count) =
        parse_env_number::<u64>("WALLETSCAN_ACTIVITY_MIN_TRANSACTION_COUNT")?
    {
        config.activity.min_transaction_count = min_transaction_count;
    }

    if let Ok(input_path) = env::var("WALLETSCAN_SCAN_INPUT_PATH") {
        config.scan.input_path = input_path.trim().to_string();
    }
    if let Some(throttle_ms) = parse_env_number::<u64>("WALLETSCAN_SCAN_THROTTLE_MS")? {
        config.scan.throttle_ms = throttle_ms;
    }
    if let Ok(input_path) = env::var("WALLETSCAN_CHECK_INPUT_PATH") {
        config.check.input_path = input_path.trim().to_string();
    }
    if let Some(throttle_ms) = parse_env_number::<u64>("WALLETSCAN_CHECK_THROTTLE_MS")? {
        config.check.throttle_ms = throttle_ms;
    }

    if let Some(min_holders) = parse_env_number::<u64>("WALLETSCAN_ELIMINATION_MIN_HOLDERS")? {
        config.elimination.min_holders = min_holders;
    }

    validate_app_config(&config)?;
    Ok((config, configured))
}
