use anyhow::{Context, Result};
use std::cell::Cell;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use walletscan_config::{ActivityConfig, RunProfileConfig};
use walletscan_core_types::{EnrichmentMetrics, WalletKey, COUNTER_PROCESSED};
use walletscan_enricher::{EnrichError, EnrichErrorKind, Enricher};
use walletscan_pipeline::{run_activity_profile, CancelFlag, RunState};
use walletscan_storage::read_audit_log;

const KEY_COUNT: usize = 6;

fn wallet_key(index: usize) -> WalletKey {
    WalletKey::parse(&format!("0x{:040x}", index + 1)).expect("valid key")
}

/// Even keys are active, odd keys hold no balance, every fifth key fails.
/// Raises the cancel flag once `stop_after` fetches have happened.
struct ParityEnricher {
    fetched: Cell<usize>,
    stop_after: Option<(usize, CancelFlag)>,
}

impl ParityEnricher {
    fn new(stop_after: Option<(usize, CancelFlag)>) -> Self {
        Self {
            fetched: Cell::new(0),
            stop_after,
        }
    }
}

impl Enricher for ParityEnricher {
    fn fetch(&self, key: &WalletKey) -> Result<EnrichmentMetrics, EnrichError> {
        self.fetched.set(self.fetched.get() + 1);
        if let Some((limit, cancel)) = &self.stop_after {
            if self.fetched.get() >= *limit {
                cancel.cancel();
            }
        }
        let index = (0..KEY_COUNT)
            .find(|index| &wallet_key(*index) == key)
            .ok_or_else(|| EnrichError::new(EnrichErrorKind::NotFound, "unknown key"))?;
        if index % 5 == 4 {
            return Err(EnrichError::new(EnrichErrorKind::Transport, "connection reset"));
        }
        Ok(EnrichmentMetrics {
            balance_eth: Some(if index % 2 == 0 { 1.0 } else { 0.0 }),
            transaction_count: Some(20),
            ..EnrichmentMetrics::default()
        })
    }
}

fn profile_in(root: &Path) -> RunProfileConfig {
    let at = |name: &str| root.join(name).to_string_lossy().to_string();
    RunProfileConfig {
        input_path: at("master-holders.csv"),
        audit_log_path: at("wallet-activity.csv"),
        passed_list_path: at("active-master-list.csv"),
        checkpoint_path: at("activity-progress.json"),
        checkpoint_every: 2,
        throttle_ms: 0,
        ..RunProfileConfig::scan_defaults()
    }
}

fn write_input(profile: &RunProfileConfig) -> Result<()> {
    let mut lines = vec!["wallet_address".to_string()];
    lines.extend((0..KEY_COUNT).map(|index| {
        wallet_key(index)
            .to_string()
            .to_uppercase()
            .replace("0X", "0x")
    }));
    lines.push(wallet_key(0).to_string());
    fs::write(&profile.input_path, lines.join("\n") + "\n")?;
    Ok(())
}

#[test]
fn interrupted_runs_resume_to_the_same_result_as_one_pass() -> Result<()> {
    let activity = ActivityConfig::default();

    let single = tempdir().context("failed to create tempdir")?;
    let single_profile = profile_in(single.path());
    write_input(&single_profile)?;
    let single_outcome = run_activity_profile(
        ParityEnricher::new(None),
        &activity,
        &single_profile,
        &CancelFlag::new(),
    )?;
    assert_eq!(single_outcome.state, RunState::Completed);

    let resumed = tempdir().context("failed to create tempdir")?;
    let profile = profile_in(resumed.path());
    write_input(&profile)?;
    let mut runs = 0;
    for stop_after in [1usize, 3] {
        let cancel = CancelFlag::new();
        let outcome = run_activity_profile(
            ParityEnricher::new(Some((stop_after, cancel.clone()))),
            &activity,
            &profile,
            &cancel,
        )?;
        runs += 1;
        assert_eq!(outcome.state, RunState::Interrupted, "run {runs}");
    }
    let final_outcome =
        run_activity_profile(ParityEnricher::new(None), &activity, &profile, &CancelFlag::new())?;
    assert_eq!(final_outcome.state, RunState::Completed);
    assert_eq!(final_outcome.processed_this_run, (KEY_COUNT - 4) as u64);
    assert_eq!(final_outcome.checkpoint.counter(COUNTER_PROCESSED), KEY_COUNT as u64);

    let audit_keys = |path: &str| -> Result<BTreeSet<WalletKey>> {
        Ok(read_audit_log(Path::new(path))?
            .into_iter()
            .map(|record| record.key)
            .collect())
    };
    assert_eq!(audit_keys(&profile.audit_log_path)?.len(), KEY_COUNT);
    assert_eq!(
        audit_keys(&profile.audit_log_path)?,
        audit_keys(&single_profile.audit_log_path)?
    );
    assert_eq!(
        fs::read_to_string(&profile.passed_list_path)?,
        fs::read_to_string(&single_profile.passed_list_path)?
    );
    assert_eq!(final_outcome.summary, single_outcome.summary);

    let summary = final_outcome.summary.expect("summary enabled");
    assert_eq!(summary.total, KEY_COUNT as u64);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.passing, 2);
    Ok(())
}

#[test]
fn missing_input_fails_without_touching_checkpoint() -> Result<()> {
    let temp = tempdir().context("failed to create tempdir")?;
    let profile = profile_in(temp.path());
    let error = run_activity_profile(
        ParityEnricher::new(None),
        &ActivityConfig::default(),
        &profile,
        &CancelFlag::new(),
    )
    .expect_err("empty key set must fail");
    assert!(error.to_string().contains("key set is empty"));
    assert!(!Path::new(&profile.checkpoint_path).exists());
    Ok(())
}
