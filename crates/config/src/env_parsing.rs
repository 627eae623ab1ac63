use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;

use super::{AppConfig, RunProfileConfig};

pub(crate) fn parse_env_bool(value: String) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Reads a numeric override. Unset or blank is `None`; anything unparsable is
/// an error naming the variable.
pub(crate) fn parse_env_number<T>(env_name: &str) -> Result<Option<T>>
where
    T: FromStr,
{
    let Ok(raw) = env::var(env_name) else {
        return Ok(None);
    };
    let trimmed = raw.trim().trim_matches('"').trim_matches('\'');
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|_| anyhow!("{env_name} contains invalid numeric value: {}", trimmed))
}

pub(crate) fn validate_app_config(config: &AppConfig) -> Result<()> {
    let activity = &config.activity;
    if !activity.min_balance_eth.is_finite() || activity.min_balance_eth < 0.0 {
        return Err(anyhow!(
            "activity.min_balance_eth must be a finite non-negative number, got {}",
            activity.min_balance_eth
        ));
    }

    validate_run_profile("scan", &config.scan)?;
    validate_run_profile("check", &config.check)?;

    let elimination = &config.elimination;
    if elimination.checkpoint_every == 0 {
        return Err(anyhow!("elimination.checkpoint_every must be >= 1"));
    }
    for (field, value) in [
        ("summary_report_path", &elimination.summary_report_path),
        ("wallets_dir", &elimination.wallets_dir),
        ("audit_log_path", &elimination.audit_log_path),
        ("kept_list_path", &elimination.kept_list_path),
        ("compilation_path", &elimination.compilation_path),
        ("checkpoint_path", &elimination.checkpoint_path),
    ] {
        if value.trim().is_empty() {
            return Err(anyhow!("elimination.{field} must not be empty"));
        }
    }

    if !config.enricher.rpc_url.trim().is_empty() && !config.enricher.rpc_url_file.trim().is_empty()
    {
        let url_is_placeholder = config.enricher.rpc_url.contains("REPLACE_ME");
        if !url_is_placeholder {
            return Err(anyhow!(
                "enricher.rpc_url and enricher.rpc_url_file cannot be set at the same time"
            ));
        }
    }

    Ok(())
}

fn validate_run_profile(name: &str, profile: &RunProfileConfig) -> Result<()> {
    if profile.checkpoint_every == 0 {
        return Err(anyhow!("{name}.checkpoint_every must be >= 1"));
    }
    if profile.max_days_since_last_tx < 0 {
        return Err(anyhow!(
            "{name}.max_days_since_last_tx must be >= 0, got {}",
            profile.max_days_since_last_tx
        ));
    }
    for (field, value) in [
        ("input_path", &profile.input_path),
        ("audit_log_path", &profile.audit_log_path),
        ("passed_list_path", &profile.passed_list_path),
        ("checkpoint_path", &profile.checkpoint_path),
    ] {
        if value.trim().is_empty() {
            return Err(anyhow!("{name}.{field} must not be empty"));
        }
    }
    if profile.audit_log_path.trim() == profile.passed_list_path.trim() {
        return Err(anyhow!(
            "{name}.audit_log_path and {name}.passed_list_path must be different files"
        ));
    }
    Ok(())
}
