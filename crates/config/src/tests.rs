use super::*;
use std::ffi::OsString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

static ENV_LOCK: Mutex<()> = Mutex::new(());
static TEMP_CONFIG_COUNTER: AtomicU64 = AtomicU64::new(0);

#[test]
fn activity_defaults_match_reference_thresholds() {
    let config = AppConfig::default();
    assert!((config.activity.min_balance_eth - 0.001).abs() <= f64::EPSILON);
    assert_eq!(config.activity.min_transaction_count, 5);
    assert_eq!(config.scan.max_days_since_last_tx, 90);
    assert_eq!(config.scan.checkpoint_every, 10);
    assert_eq!(config.check.max_days_since_last_tx, 180);
    assert_eq!(config.check.checkpoint_every, 5);
    assert_eq!(config.elimination.min_holders, 10);
    assert!(!config.enricher.include_incoming_transfers);
}

#[test]
fn empty_file_loads_all_defaults() {
    with_temp_config_file("", |config_path| {
        let cfg = load_from_path(config_path).expect("empty config parses");
        assert_eq!(cfg.scan, RunProfileConfig::scan_defaults());
        assert_eq!(cfg.check, RunProfileConfig::check_defaults());
        assert_eq!(cfg.system.log_level, "info");
    });
}

#[test]
fn partial_check_table_keeps_check_defaults() {
    let toml = r#"
[check]
throttle_ms = 50
"#;
    with_temp_config_file(toml, |config_path| {
        let cfg = load_from_path(config_path).expect("partial check table parses");
        assert_eq!(cfg.check.throttle_ms, 50);
        assert_eq!(cfg.check.passed_list_path, "wallets/re-master-holders.csv");
        assert_eq!(cfg.check.max_days_since_last_tx, 180);
        assert_eq!(cfg.scan, RunProfileConfig::scan_defaults());
    });
}

#[test]
fn unknown_profile_key_is_rejected() {
    let toml = r#"
[scan]
checkpoint_evry = 3
"#;
    with_temp_config_file(toml, |config_path| {
        let err = load_from_path(config_path)
            .expect_err("typo in profile key must fail")
            .to_string();
        assert!(err.contains("failed to parse TOML"), "unexpected error: {err}");
    });
}

#[test]
fn load_from_env_applies_overrides() {
    with_temp_config_file("", |config_path| {
        with_clean_walletscan_env(|| {
            with_env_var("WALLETSCAN_ACTIVITY_MIN_TRANSACTION_COUNT", "12", || {
                with_env_var("WALLETSCAN_SCAN_THROTTLE_MS", "0", || {
                    with_env_var("WALLETSCAN_INCLUDE_INCOMING_TRANSFERS", "yes", || {
                        with_env_var("WALLETSCAN_ELIMINATION_MIN_HOLDERS", "25", || {
                            let (cfg, loaded) = load_from_env_or_default(config_path)
                                .expect("load config with env overrides");
                            assert_eq!(loaded, config_path.to_path_buf());
                            assert_eq!(cfg.activity.min_transaction_count, 12);
                            assert_eq!(cfg.scan.throttle_ms, 0);
                            assert!(cfg.enricher.include_incoming_transfers);
                            assert_eq!(cfg.elimination.min_holders, 25);
                        });
                    });
                });
            });
        });
    });
}

#[test]
fn load_from_env_substitutes_api_key_placeholder() {
    with_temp_config_file("", |config_path| {
        with_clean_walletscan_env(|| {
            with_env_var(API_KEY_ENV, "abc123", || {
                let (cfg, _) =
                    load_from_env_or_default(config_path).expect("load config with api key");
                assert_eq!(
                    cfg.enricher.rpc_url,
                    "https://eth-mainnet.g.alchemy.com/v2/abc123"
                );
            });
        });
    });
}

#[test]
fn load_from_env_rejects_invalid_numeric_override() {
    with_temp_config_file("", |config_path| {
        with_clean_walletscan_env(|| {
            with_env_var("WALLETSCAN_RPC_RPS_LIMIT", "fast", || {
                let err = load_from_env_or_default(config_path)
                    .expect_err("non-numeric override must fail")
                    .to_string();
                assert!(
                    err.contains("WALLETSCAN_RPC_RPS_LIMIT"),
                    "error should mention env var, got: {err}"
                );
                assert!(
                    err.contains("invalid numeric value"),
                    "unexpected error: {err}"
                );
            });
        });
    });
}

#[test]
fn load_from_env_rejects_zero_checkpoint_interval() {
    let toml = r#"
[scan]
checkpoint_every = 0
"#;
    with_temp_config_file(toml, |config_path| {
        with_clean_walletscan_env(|| {
            let err = load_from_env_or_default(config_path)
                .expect_err("zero checkpoint interval must fail")
                .to_string();
            assert!(
                err.contains("scan.checkpoint_every must be >= 1"),
                "unexpected error: {err}"
            );
        });
    });
}

#[test]
fn load_from_env_rejects_shared_audit_and_passed_paths() {
    let toml = r#"
[check]
audit_log_path = "wallets/out.csv"
passed_list_path = "wallets/out.csv"
"#;
    with_temp_config_file(toml, |config_path| {
        with_clean_walletscan_env(|| {
            let err = load_from_env_or_default(config_path)
                .expect_err("shared output path must fail")
                .to_string();
            assert!(err.contains("must be different files"), "unexpected error: {err}");
        });
    });
}

#[test]
fn config_path_env_takes_precedence_over_default() {
    with_temp_config_file("[system]\nlog_level = \"debug\"\n", |env_path| {
        with_clean_walletscan_env(|| {
            let env_path_str = env_path.to_string_lossy().to_string();
            with_env_var(CONFIG_PATH_ENV, &env_path_str, || {
                let (cfg, loaded) = load_from_env_or_default(Path::new("does/not/exist.toml"))
                    .expect("env config path should be used");
                assert_eq!(loaded, env_path.to_path_buf());
                assert_eq!(cfg.system.log_level, "debug");
            });
        });
    });
}

fn with_env_var<T>(key: &'static str, value: &str, run: impl FnOnce() -> T) -> T {
    let previous = std::env::var_os(key);
    std::env::set_var(key, value);
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run));
    restore_env_var(key, previous);
    match outcome {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn restore_env_var(key: &'static str, previous: Option<OsString>) {
    match previous {
        Some(value) => std::env::set_var(key, value),
        None => std::env::remove_var(key),
    }
}

fn with_clean_walletscan_env<T>(run: impl FnOnce() -> T) -> T {
    // Serialize all WALLETSCAN_* env mutations in this test module.
    let _guard = ENV_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let saved: Vec<(OsString, OsString)> = std::env::vars_os()
        .filter(|(key, _)| {
            let key = key.to_string_lossy();
            key.starts_with("WALLETSCAN_") || key == API_KEY_ENV
        })
        .collect();
    for (key, _) in &saved {
        std::env::remove_var(key);
    }
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run));
    for (key, value) in saved {
        std::env::set_var(key, value);
    }
    match outcome {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn with_temp_config_file<T>(contents: &str, run: impl FnOnce(&Path) -> T) -> T {
    let path = unique_temp_path();
    fs::write(&path, contents).expect("write temp config");
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(&path)));
    let _ = fs::remove_file(&path);
    match outcome {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn unique_temp_path() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    let seq = TEMP_CONFIG_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    std::env::temp_dir().join(format!("walletscan-config-test-{pid}-{nanos}-{seq}.toml"))
}
