//! Stalled-saga sweeper.
//!
//! Sagas that stopped moving (a lost request, a reply that never came) are
//! republished on a fixed interval until they run out of republishes and
//! are marked ERROR.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::orchestrator::SagaOrchestrator;

/// Run the sweeper loop until `cancel` is triggered.
pub async fn run(orchestrator: Arc<SagaOrchestrator>, config: PipelineConfig, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(config.saga_sweep_interval);
    tracing::info!(
        interval_secs = config.saga_sweep_interval.as_secs(),
        stall_threshold_secs = config.saga_stall_threshold.num_seconds(),
        max_republishes = config.saga_max_republishes,
        "Saga sweeper started",
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Saga sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                let older_than = Utc::now() - config.saga_stall_threshold;
                match orchestrator
                    .sweep_stalled(older_than, config.saga_sweep_batch, config.saga_max_republishes)
                    .await
                {
                    Ok(report) if report.republished + report.failed > 0 => {
                        tracing::info!(
                            republished = report.republished,
                            failed = report.failed,
                            "Stalled sagas swept",
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Saga sweep failed"),
                }
            }
        }
    }
}
