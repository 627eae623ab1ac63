use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walletscan_config::{EnricherConfig, API_KEY_ENV};

const UNCONFIGURED_MARKER: &str = "REPLACE_ME";

/// Final RPC URL for the activity enricher. `enricher.rpc_url_file` wins over
/// the inline URL; relative file paths resolve against the config file.
pub(crate) fn resolve_rpc_url(config: &EnricherConfig, loaded_config_path: &Path) -> Result<String> {
    let url_file = config.rpc_url_file.trim();
    let url = if url_file.is_empty() {
        config.rpc_url.trim().to_string()
    } else {
        let resolved = resolve_secret_file_path(url_file, loaded_config_path);
        read_trimmed_secret_file(resolved.as_path()).with_context(|| {
            format!(
                "failed loading enricher.rpc_url_file from {} (resolved path: {})",
                url_file,
                resolved.display()
            )
        })?
    };
    if url.is_empty() || url.contains(UNCONFIGURED_MARKER) {
        return Err(anyhow!(
            "enricher.rpc_url is not configured: set {API_KEY_ENV}, WALLETSCAN_RPC_URL or enricher.rpc_url_file"
        ));
    }
    Ok(url)
}

fn resolve_secret_file_path(path: &str, loaded_config_path: &Path) -> PathBuf {
    let value = Path::new(path.trim());
    if value.is_absolute() {
        return value.to_path_buf();
    }
    match loaded_config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(value),
        _ => value.to_path_buf(),
    }
}

fn read_trimmed_secret_file(path: &Path) -> Result<String> {
    let value = fs::read_to_string(path)
        .with_context(|| format!("failed reading secret file {}", path.display()))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("secret file {} is empty", path.display()));
    }
    Ok(trimmed.to_string())
}
