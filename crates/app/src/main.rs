use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use walletscan_config::{load_from_env_or_default, AppConfig, RunProfileConfig};
use walletscan_core_types::KeySet;
use walletscan_pipeline::{consolidate_holder_lists, summarize_audit_log, CancelFlag};
use walletscan_storage::{load_key_set, merge_into_file, CheckpointStore};

mod secrets;
mod task_spawns;
mod telemetry;

use crate::secrets::resolve_rpc_url;
use crate::task_spawns::{spawn_activity_task, spawn_elimination_task};
use crate::telemetry::{
    format_error_chain, log_consolidation, log_elimination_outcome, log_run_outcome, log_summary,
    print_summary_json,
};

const DEFAULT_CONFIG_PATH: &str = "configs/dev.toml";
const FORCED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "walletscan")]
#[command(about = "Resumable wallet activity and collection holder enrichment")]
#[command(
    after_help = "Each run profile owns its checkpoint file. Running two instances of the same profile at once is not supported."
)]
struct Cli {
    /// Path to configuration file (WALLETSCAN_CONFIG wins when set)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full activity audit of every wallet; writes the active list
    Scan(ActivityArgs),
    /// Activity re-check with the longer lookback; writes the passed list
    Check(ActivityArgs),
    /// Classify collections by holder count and compile holders of kept ones
    Eliminate,
    /// Merge every <group>/<collection>/holders.csv into per-group lists and the master list
    Consolidate {
        /// Directory holding one folder per group (defaults to elimination.wallets_dir)
        #[arg(long)]
        wallets_dir: Option<PathBuf>,
        /// Master list to merge into (defaults to scan.input_path)
        #[arg(long)]
        master: Option<PathBuf>,
    },
    /// Union key lists into a sorted, deduplicated target file
    Merge {
        /// File to merge into (created when missing)
        #[arg(long)]
        into: PathBuf,
        /// Key lists to merge
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Delete the checkpoint of a profile so the next run starts over
    Reset {
        #[arg(value_enum)]
        profile: Profile,
    },
    /// Summarize an audit log
    Summary {
        #[arg(value_enum)]
        profile: Profile,
        /// Read this audit log instead of the profile's
        #[arg(long)]
        audit_log: Option<PathBuf>,
        /// Print the summary as JSON on stdout
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct ActivityArgs {
    /// Key list to process instead of the configured input
    #[arg(long)]
    input: Option<PathBuf>,
    /// Delay between keys in milliseconds
    #[arg(long)]
    throttle_ms: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Scan,
    Check,
    Eliminate,
}

impl Profile {
    fn label(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Check => "check",
            Self::Eliminate => "eliminate",
        }
    }

    fn checkpoint_path(self, config: &AppConfig) -> &str {
        match self {
            Self::Scan => &config.scan.checkpoint_path,
            Self::Check => &config.check.checkpoint_path,
            Self::Eliminate => &config.elimination.checkpoint_path,
        }
    }

    fn audit_log_path(self, config: &AppConfig) -> &str {
        match self {
            Self::Scan => &config.scan.audit_log_path,
            Self::Check => &config.check.audit_log_path,
            Self::Eliminate => &config.elimination.audit_log_path,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, loaded_config_path) = load_from_env_or_default(&cli.config)?;

    init_tracing(&config.system.log_level, config.system.log_json);
    info!(
        config_path = %loaded_config_path.display(),
        env = %config.system.env,
        "configuration loaded"
    );

    let result = run_command(cli.command, config, &loaded_config_path).await;
    if let Err(error) = &result {
        error!(error = %format_error_chain(error), "walletscan failed");
        if error.downcast_ref::<ForcedExit>().is_some() {
            // The runtime would otherwise wait for the blocked worker on shutdown.
            std::process::exit(FORCED_EXIT_CODE);
        }
    }
    result
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .json()
            .compact()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

async fn run_command(command: Command, config: AppConfig, loaded_config_path: &Path) -> Result<()> {
    match command {
        Command::Scan(args) => {
            let profile = apply_activity_args(config.scan.clone(), args);
            run_activity("scan", &config, profile, loaded_config_path).await
        }
        Command::Check(args) => {
            let profile = apply_activity_args(config.check.clone(), args);
            run_activity("check", &config, profile, loaded_config_path).await
        }
        Command::Eliminate => {
            let cancel = CancelFlag::new();
            let task = tokio::task::spawn_blocking(spawn_elimination_task(
                config.elimination.clone(),
                cancel.clone(),
            ));
            let outcome = wait_with_ctrl_c(task, &cancel).await?;
            log_elimination_outcome(&outcome);
            Ok(())
        }
        Command::Consolidate {
            wallets_dir,
            master,
        } => {
            let wallets_dir =
                wallets_dir.unwrap_or_else(|| PathBuf::from(&config.elimination.wallets_dir));
            let master = master.unwrap_or_else(|| PathBuf::from(&config.scan.input_path));
            let report = consolidate_holder_lists(&wallets_dir, &master)?;
            log_consolidation(&master, &report);
            Ok(())
        }
        Command::Merge { into, inputs } => merge_key_lists(&into, &inputs),
        Command::Reset { profile } => {
            let store = CheckpointStore::new(profile.checkpoint_path(&config));
            let removed = store.reset()?;
            info!(
                profile = profile.label(),
                path = %store.path().display(),
                removed,
                "checkpoint reset"
            );
            Ok(())
        }
        Command::Summary {
            profile,
            audit_log,
            json,
        } => {
            let path =
                audit_log.unwrap_or_else(|| PathBuf::from(profile.audit_log_path(&config)));
            if !path.exists() {
                return Err(anyhow!("audit log not found: {}", path.display()));
            }
            let summary = summarize_audit_log(&path)?;
            if json {
                print_summary_json(&summary)
            } else {
                log_summary(profile.label(), &summary);
                Ok(())
            }
        }
    }
}

fn apply_activity_args(mut profile: RunProfileConfig, args: ActivityArgs) -> RunProfileConfig {
    if let Some(input) = args.input {
        profile.input_path = input.to_string_lossy().to_string();
    }
    if let Some(throttle_ms) = args.throttle_ms {
        profile.throttle_ms = throttle_ms;
    }
    profile
}

async fn run_activity(
    label: &'static str,
    config: &AppConfig,
    profile: RunProfileConfig,
    loaded_config_path: &Path,
) -> Result<()> {
    let rpc_url = resolve_rpc_url(&config.enricher, loaded_config_path)?;
    let cancel = CancelFlag::new();
    let task = tokio::task::spawn_blocking(spawn_activity_task(
        label,
        config.enricher.clone(),
        rpc_url,
        config.activity.clone(),
        profile,
        cancel.clone(),
    ));
    let outcome = wait_with_ctrl_c(task, &cancel).await?;
    log_run_outcome(label, &outcome);
    Ok(())
}

/// Returned when a second interrupt arrives before the worker stopped.
#[derive(Debug)]
struct ForcedExit;

impl fmt::Display for ForcedExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("second interrupt received, exiting without waiting for the current key")
    }
}

impl std::error::Error for ForcedExit {}

async fn wait_with_ctrl_c<T>(task: JoinHandle<Result<T>>, cancel: &CancelFlag) -> Result<T> {
    wait_with_interrupts(task, cancel, tokio::signal::ctrl_c).await
}

/// Waits for a blocking worker. The first interrupt asks it to stop after the
/// current key; the worker then flushes its checkpoint and returns normally.
/// A second interrupt gives up on the worker with [`ForcedExit`].
async fn wait_with_interrupts<T, F, Fut>(
    mut task: JoinHandle<Result<T>>,
    cancel: &CancelFlag,
    mut interrupt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    loop {
        tokio::select! {
            joined = &mut task => {
                return joined.context("worker task panicked")?;
            }
            signal = interrupt() => {
                match signal {
                    Ok(()) if !cancel.is_cancelled() => {
                        warn!("interrupt received, stopping after the current key (interrupt again to force exit)");
                        cancel.cancel();
                    }
                    Ok(()) => return Err(ForcedExit.into()),
                    Err(error) => {
                        warn!(error = %error, "failed to listen for interrupt signal");
                        return task.await.context("worker task panicked")?;
                    }
                }
            }
        }
    }
}

fn merge_key_lists(into: &Path, inputs: &[PathBuf]) -> Result<()> {
    let mut incoming = KeySet::new();
    for input in inputs {
        let keys = load_key_set(input);
        info!(path = %input.display(), keys = keys.len(), "loaded key list");
        for key in &keys {
            incoming.insert(key.clone());
        }
    }
    let report = merge_into_file(into, &incoming)
        .with_context(|| format!("failed to merge into {}", into.display()))?;
    info!(
        path = %into.display(),
        existing = report.existing,
        incoming = report.incoming,
        merged = report.merged,
        added = report.added,
        "key lists merged"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn activity_args_override_profile() {
        let cli = Cli::try_parse_from([
            "walletscan",
            "--config",
            "configs/prod.toml",
            "check",
            "--input",
            "wallets/other.csv",
            "--throttle-ms",
            "0",
        ])
        .expect("valid command line");
        assert_eq!(cli.config, PathBuf::from("configs/prod.toml"));
        let Command::Check(args) = cli.command else {
            panic!("expected check subcommand");
        };
        let profile = apply_activity_args(RunProfileConfig::check_defaults(), args);
        assert_eq!(profile.input_path, "wallets/other.csv");
        assert_eq!(profile.throttle_ms, 0);
        assert_eq!(profile.audit_log_path, "wallets/re-master-activity.csv");
    }

    fn spawn_until_cancelled(cancel: &CancelFlag) -> JoinHandle<Result<u32>> {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            while !cancel.is_cancelled() {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            Ok(7)
        })
    }

    #[tokio::test]
    async fn first_interrupt_cancels_and_waits_for_worker() -> Result<()> {
        let cancel = CancelFlag::new();
        let task = spawn_until_cancelled(&cancel);
        let mut interrupts = 0;
        let value = wait_with_interrupts(task, &cancel, || {
            interrupts += 1;
            let first = interrupts == 1;
            async move {
                if !first {
                    std::future::pending::<()>().await;
                }
                Ok::<(), io::Error>(())
            }
        })
        .await?;
        assert_eq!(value, 7);
        assert!(cancel.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn second_interrupt_forces_exit() {
        let cancel = CancelFlag::new();
        let release = CancelFlag::new();
        let task = spawn_until_cancelled(&release);
        let error = wait_with_interrupts(task, &cancel, || async { Ok::<(), io::Error>(()) })
            .await
            .expect_err("second interrupt must not wait for the worker");
        assert!(error.downcast_ref::<ForcedExit>().is_some());
        assert!(cancel.is_cancelled());
        assert!(!release.is_cancelled());
        release.cancel();
    }

    #[test]
    fn consolidate_defaults_to_configured_paths() {
        let cli = Cli::try_parse_from(["walletscan", "consolidate"]).expect("valid command line");
        assert!(matches!(
            cli.command,
            Command::Consolidate {
                wallets_dir: None,
                master: None
            }
        ));
    }

    #[test]
    fn merge_requires_inputs() {
        assert!(Cli::try_parse_from(["walletscan", "merge", "--into", "out.csv"]).is_err());
    }

    #[test]
    fn merge_key_lists_unions_inputs() -> Result<()> {
        let temp = tempdir().context("failed to create tempdir")?;
        let a = format!("0x{}", "a".repeat(40));
        let b = format!("0x{}", "b".repeat(40));
        let first = temp.path().join("first.csv");
        let second = temp.path().join("second.csv");
        let target = temp.path().join("merged.csv");
        fs::write(&first, format!("wallet_address\n{b}\n"))?;
        fs::write(&second, format!("{a}\n{b}\n"))?;

        merge_key_lists(&target, &[first, second, temp.path().join("absent.csv")])?;
        assert_eq!(fs::read_to_string(&target)?, format!("{a}\n{b}\n"));
        Ok(())
    }
}
