use anyhow::{Context, Result};
use tracing::info;
use walletscan_config::{ActivityConfig, EliminationConfig, EnricherConfig, RunProfileConfig};
use walletscan_enricher::RpcActivityEnricher;
use walletscan_pipeline::{
    run_activity_profile, run_elimination, CancelFlag, EliminationOutcome, RunOutcome,
};

/// The blocking HTTP client is built inside the worker thread: it must not be
/// created or dropped on an async runtime thread.
pub(crate) fn spawn_activity_task(
    label: &'static str,
    enricher_config: EnricherConfig,
    rpc_url: String,
    activity: ActivityConfig,
    profile: RunProfileConfig,
    cancel: CancelFlag,
) -> impl FnOnce() -> Result<RunOutcome> {
    move || {
        let enricher = RpcActivityEnricher::from_config(&enricher_config, &rpc_url)
            .with_context(|| format!("failed to initialize enricher for {label}"))?;
        info!(
            label,
            endpoint = enricher.endpoint_label(),
            rps_limit = enricher_config.rps_limit,
            include_incoming_transfers = enricher_config.include_incoming_transfers,
            "activity enricher ready"
        );
        run_activity_profile(enricher, &activity, &profile, &cancel)
    }
}

pub(crate) fn spawn_elimination_task(
    config: EliminationConfig,
    cancel: CancelFlag,
) -> impl FnOnce() -> Result<EliminationOutcome> {
    move || run_elimination(&config, &cancel)
}
