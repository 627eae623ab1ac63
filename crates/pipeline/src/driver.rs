use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walletscan_core_types::{
    Checkpoint, EnrichmentResult, KeySet, COUNTER_PASSED, COUNTER_SECONDARY_SINK_FAILURES,
};
use walletscan_enricher::Enricher;
use walletscan_storage::{load_key_set, read_audit_log, write_key_list, CheckpointStore, ResultSink};

use crate::classify::ClassificationPolicy;
use crate::summary::{aggregate, passing_keys, RunSummary};

const CANCEL_POLL_INTERVAL: StdDuration = StdDuration::from_millis(50);

/// Shared stop request. Set from a signal handler, observed by the driver
/// between keys and while throttling.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Interrupted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

/// Work done once the key loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishingSteps {
    /// Fold the audit log into a [`RunSummary`]. Runs after completion and
    /// after interruption.
    pub aggregate_summary: bool,
    /// Rewrite every passed list from the audit log: sorted, deduplicated and
    /// holding exactly the keys whose latest record passes. Completion only.
    pub compact_passed_list: bool,
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub checkpoint_every: u64,
    pub throttle: StdDuration,
    pub finishing: FinishingSteps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassedListRebuild {
    pub path: PathBuf,
    /// Keys the list held before the rebuild.
    pub previous: usize,
    pub rebuilt: usize,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub state: RunState,
    pub checkpoint: Checkpoint,
    pub total_keys: usize,
    pub skipped_already_processed: usize,
    pub processed_this_run: u64,
    pub errors_this_run: u64,
    pub secondary_sink_failures: u64,
    pub summary: Option<RunSummary>,
    pub rebuilt_passed_lists: Vec<PassedListRebuild>,
}

/// Sequential, resumable enrichment loop.
///
/// For every remaining key the result is appended to the sink before the key
/// is marked in the checkpoint, so a crash can at worst re-append a record
/// but never lose one. Only one driver may own a checkpoint at a time.
pub struct PipelineDriver<E> {
    enricher: E,
    policy: ClassificationPolicy,
    sink: ResultSink,
    store: CheckpointStore,
    options: DriverOptions,
    state: RunState,
}

impl<E: Enricher> PipelineDriver<E> {
    pub fn new(
        enricher: E,
        policy: ClassificationPolicy,
        sink: ResultSink,
        store: CheckpointStore,
        options: DriverOptions,
    ) -> Self {
        Self {
            enricher,
            policy,
            sink,
            store,
            options,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }

    /// Loads the persisted checkpoint and runs from it.
    pub fn run_from_store(&mut self, keys: &KeySet, cancel: &CancelFlag) -> Result<RunOutcome> {
        self.store.prepare()?;
        let checkpoint = self.store.load(Utc::now());
        self.run(keys, checkpoint, cancel)
    }

    pub fn run(
        &mut self,
        keys: &KeySet,
        mut checkpoint: Checkpoint,
        cancel: &CancelFlag,
    ) -> Result<RunOutcome> {
        if keys.is_empty() {
            return Err(anyhow!("key set is empty, nothing to process"));
        }
        let run_id = Uuid::new_v4();
        let remaining = checkpoint.remaining(keys);
        let skipped_already_processed = keys.len() - remaining.len();
        let checkpoint_every = self.options.checkpoint_every.max(1);

        self.state = RunState::Running;
        info!(
            run_id = %run_id,
            policy = self.policy.name(),
            total = keys.len(),
            already_processed = skipped_already_processed,
            remaining = remaining.len(),
            audit_log = %self.sink.audit_log_path().display(),
            "pipeline run started"
        );

        let mut processed_this_run = 0u64;
        let mut errors_this_run = 0u64;
        let mut secondary_sink_failures = 0u64;
        let mut interrupted = false;
        let last_position = remaining.len().saturating_sub(1);

        for (position, (index, key)) in remaining.into_iter().enumerate() {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let now = Utc::now();
            let result = match self.enricher.fetch(key) {
                Ok(metrics) => {
                    let (classification, score) = self.policy.classify(&metrics, now);
                    debug!(
                        run_id = %run_id,
                        key = %key,
                        classification = %classification,
                        "key classified"
                    );
                    EnrichmentResult::classified(key.clone(), metrics, classification, score, now)
                }
                Err(error) => {
                    errors_this_run += 1;
                    warn!(
                        run_id = %run_id,
                        key = %key,
                        error = %error,
                        "enrichment failed, recording error result"
                    );
                    EnrichmentResult::failed(key.clone(), error.to_string(), now)
                }
            };

            let report = match self.sink.append(&result) {
                Ok(report) => report,
                Err(error) => {
                    self.flush_before_abort(&checkpoint, run_id);
                    self.state = RunState::Interrupted;
                    return Err(error.context(format!("run {run_id} aborted: result not durable")));
                }
            };
            for _ in 0..report.secondary_failures {
                checkpoint.bump(COUNTER_SECONDARY_SINK_FAILURES);
                secondary_sink_failures += 1;
            }

            checkpoint.mark_processed(key.clone(), result.classification(), index as u64 + 1, now);
            processed_this_run += 1;

            if processed_this_run % checkpoint_every == 0 {
                self.store
                    .flush(&checkpoint)
                    .with_context(|| format!("run {run_id} aborted: checkpoint flush failed"))?;
                info!(
                    run_id = %run_id,
                    processed = checkpoint.processed_keys.len(),
                    total = keys.len(),
                    passed = checkpoint.counter(COUNTER_PASSED),
                    "checkpoint flushed"
                );
            }

            if position < last_position
                && !self.options.throttle.is_zero()
                && sleep_unless_cancelled(self.options.throttle, cancel)
            {
                interrupted = true;
                break;
            }
        }

        self.store
            .flush(&checkpoint)
            .with_context(|| format!("run {run_id} aborted: final checkpoint flush failed"))?;
        self.state = if interrupted {
            RunState::Interrupted
        } else {
            RunState::Completed
        };

        let completed = self.state == RunState::Completed;
        let rebuild = completed && self.options.finishing.compact_passed_list;
        let records = if self.options.finishing.aggregate_summary || rebuild {
            read_audit_log(self.sink.audit_log_path())?
        } else {
            Vec::new()
        };
        let summary = self
            .options
            .finishing
            .aggregate_summary
            .then(|| aggregate(&records));

        let mut rebuilt_passed_lists = Vec::new();
        if rebuild {
            let passing = passing_keys(&records).sorted();
            for path in self.sink.passed_list_paths() {
                let previous = load_key_set(path).len();
                write_key_list(path, &passing)
                    .with_context(|| format!("failed to rebuild passed list {}", path.display()))?;
                rebuilt_passed_lists.push(PassedListRebuild {
                    path: path.clone(),
                    previous,
                    rebuilt: passing.len(),
                });
            }
        }

        info!(
            run_id = %run_id,
            state = %self.state,
            processed_this_run,
            errors_this_run,
            secondary_sink_failures,
            processed_total = checkpoint.processed_keys.len(),
            total = keys.len(),
            "pipeline run finished"
        );

        Ok(RunOutcome {
            run_id,
            state: self.state,
            checkpoint,
            total_keys: keys.len(),
            skipped_already_processed,
            processed_this_run,
            errors_this_run,
            secondary_sink_failures,
            summary,
            rebuilt_passed_lists,
        })
    }

    fn flush_before_abort(&self, checkpoint: &Checkpoint, run_id: Uuid) {
        if let Err(error) = self.store.flush(checkpoint) {
            error!(
                run_id = %run_id,
                error = %format!("{error:#}"),
                "failed to flush checkpoint while aborting"
            );
        }
    }
}

/// Sleeps for `duration`, waking early when cancelled. Returns whether the
/// sleep was cut short.
fn sleep_unless_cancelled(duration: StdDuration, cancel: &CancelFlag) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
    }
}
