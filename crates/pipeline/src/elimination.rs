use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};
use walletscan_config::EliminationConfig;
use walletscan_core_types::KeySet;
use walletscan_enricher::HolderCountEnricher;
use walletscan_storage::{
    merge_into_file, read_audit_log, read_key_list, CheckpointStore, MergeReport, ResultSink,
};

use crate::classify::ClassificationPolicy;
use crate::driver::{
    CancelFlag, DriverOptions, FinishingSteps, PipelineDriver, RunOutcome, RunState,
};
use crate::report_format::{collection_folder_name, load_summary_report, ReportEntry};
use crate::summary::passing_keys;

pub(crate) const HOLDERS_FILE_NAME: &str = "holders.csv";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilationReport {
    pub kept_collections: usize,
    pub missing_holder_files: usize,
    pub holders_read: usize,
    pub merge: MergeReport,
}

#[derive(Debug, Clone)]
pub struct EliminationOutcome {
    pub run: RunOutcome,
    pub compilation: Option<CompilationReport>,
}

pub fn build_holder_enricher(entries: &[ReportEntry]) -> HolderCountEnricher {
    let mut enricher = HolderCountEnricher::new();
    for entry in entries {
        enricher.insert(entry.contract.clone(), entry.holders, entry.artist.clone());
    }
    enricher
}

/// `<wallets_dir>/<artist lowercase>/<collection folder>/holders.csv`
pub fn holders_file_path(wallets_dir: &Path, entry: &ReportEntry) -> PathBuf {
    wallets_dir
        .join(entry.artist.to_lowercase())
        .join(collection_folder_name(&entry.collection))
        .join(HOLDERS_FILE_NAME)
}

/// Unions the holder lists of every kept collection into the compilation file.
pub fn compile_kept_holders(
    wallets_dir: &Path,
    compilation_path: &Path,
    entries: &[ReportEntry],
    kept: &KeySet,
) -> Result<CompilationReport> {
    let mut report = CompilationReport::default();
    let mut holders = KeySet::new();
    for entry in entries.iter().filter(|entry| kept.contains(&entry.contract)) {
        report.kept_collections += 1;
        let path = holders_file_path(wallets_dir, entry);
        if !path.exists() {
            report.missing_holder_files += 1;
            warn!(
                artist = %entry.artist,
                collection = %entry.collection,
                path = %path.display(),
                "no holders file for kept collection"
            );
            continue;
        }
        let collection_holders = read_key_list(&path)?;
        report.holders_read += collection_holders.len();
        debug!(
            artist = %entry.artist,
            collection = %entry.collection,
            holders = collection_holders.len(),
            "collected holders"
        );
        for key in &collection_holders {
            holders.insert(key.clone());
        }
    }
    report.merge = merge_into_file(compilation_path, &holders)
        .with_context(|| format!("failed to write compilation {}", compilation_path.display()))?;
    Ok(report)
}

/// Classifies every collection in the summary report by holder count, then on
/// completion compiles the holders of kept collections into one list.
pub fn run_elimination(
    config: &EliminationConfig,
    cancel: &CancelFlag,
) -> Result<EliminationOutcome> {
    let report_path = Path::new(&config.summary_report_path);
    let entries = match load_summary_report(report_path) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(
                error = %format!("{error:#}"),
                "summary report unreadable, treating as empty"
            );
            Vec::new()
        }
    };
    let keys: KeySet = entries.iter().map(|entry| entry.contract.clone()).collect();
    info!(
        path = %report_path.display(),
        collections = keys.len(),
        min_holders = config.min_holders,
        "loaded summary report"
    );

    let sink = ResultSink::open(
        &config.audit_log_path,
        vec![PathBuf::from(&config.kept_list_path)],
    )?;
    let mut driver = PipelineDriver::new(
        build_holder_enricher(&entries),
        ClassificationPolicy::HolderCount {
            min_holders: config.min_holders,
        },
        sink,
        CheckpointStore::new(&config.checkpoint_path),
        DriverOptions {
            checkpoint_every: config.checkpoint_every,
            throttle: StdDuration::ZERO,
            finishing: FinishingSteps {
                aggregate_summary: true,
                compact_passed_list: true,
            },
        },
    );
    let run = driver.run_from_store(&keys, cancel)?;

    let compilation = if run.state == RunState::Completed {
        let records = read_audit_log(Path::new(&config.audit_log_path))?;
        let kept = passing_keys(&records);
        let report = compile_kept_holders(
            Path::new(&config.wallets_dir),
            Path::new(&config.compilation_path),
            &entries,
            &kept,
        )?;
        info!(
            kept_collections = report.kept_collections,
            missing_holder_files = report.missing_holder_files,
            compiled = report.merge.merged,
            added = report.merge.added,
            path = %config.compilation_path,
            "compilation updated"
        );
        Some(report)
    } else {
        None
    };

    Ok(EliminationOutcome { run, compilation })
}
