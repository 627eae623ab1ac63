use anyhow::{Context, Result};
use tracing::{info, warn};
use std::path::Path;
use walletscan_pipeline::{
    ConsolidationReport, EliminationOutcome, RunOutcome, RunState, RunSummary,
};
use walletscan_storage::io_contention_snapshot;

pub(crate) fn format_error_chain(error: &anyhow::Error) -> String {
    let mut chain = String::new();
    for (idx, cause) in error.chain().enumerate() {
        if idx > 0 {
            chain.push_str(" | ");
        }
        chain.push_str(&cause.to_string());
    }
    chain
}

pub(crate) fn log_run_outcome(label: &str, outcome: &RunOutcome) {
    info!(
        label,
        run_id = %outcome.run_id,
        state = %outcome.state,
        total_keys = outcome.total_keys,
        already_processed = outcome.skipped_already_processed,
        processed_this_run = outcome.processed_this_run,
        errors_this_run = outcome.errors_this_run,
        secondary_sink_failures = outcome.secondary_sink_failures,
        "run finished"
    );
    let contention = io_contention_snapshot();
    if contention.transient_error_total > 0 {
        warn!(
            label,
            write_retries = contention.write_retry_total,
            transient_errors = contention.transient_error_total,
            "file writes hit transient io errors"
        );
    }
    if outcome.state == RunState::Interrupted {
        warn!(
            label,
            remaining = outcome.total_keys.saturating_sub(
                outcome.skipped_already_processed + outcome.processed_this_run as usize
            ),
            "run interrupted, re-run the same command to resume"
        );
    }
    for rebuild in &outcome.rebuilt_passed_lists {
        info!(
            label,
            path = %rebuild.path.display(),
            previous = rebuild.previous,
            keys = rebuild.rebuilt,
            "passed list rebuilt from audit log"
        );
    }
    if let Some(summary) = &outcome.summary {
        log_summary(label, summary);
    }
}

pub(crate) fn log_elimination_outcome(outcome: &EliminationOutcome) {
    log_run_outcome("eliminate", &outcome.run);
    if let Some(compilation) = &outcome.compilation {
        info!(
            kept_collections = compilation.kept_collections,
            missing_holder_files = compilation.missing_holder_files,
            holders_read = compilation.holders_read,
            compiled = compilation.merge.merged,
            added = compilation.merge.added,
            "holder compilation finished"
        );
    }
}

pub(crate) fn log_consolidation(master: &Path, report: &ConsolidationReport) {
    let collections: usize = report.groups.iter().map(|group| group.collections).sum();
    match &report.master {
        Some(merge) => info!(
            groups = report.groups.len(),
            collections,
            master = %master.display(),
            master_keys = merge.merged,
            added = merge.added,
            "consolidation finished"
        ),
        None => warn!(
            master = %master.display(),
            "no collection holders found, master list left untouched"
        ),
    }
}

pub(crate) fn log_summary(label: &str, summary: &RunSummary) {
    summary.log(label);
    for (group, breakdown) in &summary.groups {
        info!(
            label,
            group = %group,
            total = breakdown.total,
            passing = breakdown.passing,
            pass_rate = %format!("{:.1}%", breakdown.pass_rate * 100.0),
            "group summary"
        );
    }
}

pub(crate) fn print_summary_json(summary: &RunSummary) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(summary).context("failed to serialize run summary")?;
    println!("{rendered}");
    Ok(())
}
