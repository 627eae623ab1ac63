use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use tracing::info;
use walletscan_config::{ActivityConfig, RunProfileConfig};
use walletscan_enricher::Enricher;
use walletscan_storage::{load_key_set, CheckpointStore, ResultSink};

mod classify;
mod consolidate;
mod driver;
mod elimination;
mod report_format;
mod summary;

pub use classify::{ActivityThresholds, ClassificationPolicy};
pub use consolidate::{
    consolidate_holder_lists, group_list_path, ConsolidationReport, GroupConsolidation,
};
pub use driver::{
    CancelFlag, DriverOptions, FinishingSteps, PassedListRebuild, PipelineDriver, RunOutcome,
    RunState,
};
pub use elimination::{
    build_holder_enricher, compile_kept_holders, holders_file_path, run_elimination,
    CompilationReport, EliminationOutcome,
};
pub use report_format::{
    collection_folder_name, load_summary_report, parse_summary_report, ReportEntry,
};
pub use summary::{aggregate, passing_keys, summarize_audit_log, GroupSummary, RunSummary};

/// Wires an activity run profile (scan or check) into a driver.
pub fn activity_driver<E: Enricher>(
    enricher: E,
    activity: &ActivityConfig,
    profile: &RunProfileConfig,
) -> Result<PipelineDriver<E>> {
    let sink = ResultSink::open(
        &profile.audit_log_path,
        vec![PathBuf::from(&profile.passed_list_path)],
    )?;
    Ok(PipelineDriver::new(
        enricher,
        ClassificationPolicy::Activity(ActivityThresholds::from_config(activity, profile)),
        sink,
        CheckpointStore::new(&profile.checkpoint_path),
        DriverOptions {
            checkpoint_every: profile.checkpoint_every,
            throttle: StdDuration::from_millis(profile.throttle_ms),
            finishing: FinishingSteps {
                aggregate_summary: profile.aggregate_summary,
                compact_passed_list: profile.compact_passed_list,
            },
        },
    ))
}

/// Loads the profile's key set and runs it to completion or interruption.
pub fn run_activity_profile<E: Enricher>(
    enricher: E,
    activity: &ActivityConfig,
    profile: &RunProfileConfig,
    cancel: &CancelFlag,
) -> Result<RunOutcome> {
    let keys = load_key_set(Path::new(&profile.input_path));
    info!(
        path = %profile.input_path,
        keys = keys.len(),
        "loaded key set"
    );
    activity_driver(enricher, activity, profile)?.run_from_store(&keys, cancel)
}
