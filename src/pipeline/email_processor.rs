//! Background email processor: runs the pipeline on a timer.
//!
//! Each tick runs one full pipeline pass over the configured criteria and
//! forwards the report to an optional channel. Emails already processed on
//! an earlier tick are skipped by the Filter stage, so re-running is safe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::pipeline::processor::PipelineOrchestrator;
use crate::pipeline::types::PipelineReport;

/// Default processing interval: 15 minutes.
pub const DEFAULT_PROCESS_INTERVAL_SECS: u64 = 900;

/// What each tick processes.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub criteria: String,
    pub limit: usize,
    pub interval: Duration,
}

/// Spawn a background task that runs the pipeline every `config.interval`.
///
/// The first run starts immediately. Returns a `JoinHandle` and shutdown flag.
pub fn spawn_email_processor(
    orchestrator: Arc<PipelineOrchestrator>,
    config: RunnerConfig,
    reports: Option<mpsc::Sender<PipelineReport>>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            criteria = %config.criteria,
            "Email processor started, processing every {}s",
            config.interval.as_secs()
        );

        let mut tick = tokio::time::interval(config.interval);

        // Run immediately on first tick
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Email processor shutting down");
                return;
            }

            let report = orchestrator.run(&config.criteria, config.limit).await;
            if let Some(ref tx) = reports
                && tx.send(report).await.is_err()
            {
                warn!("Report receiver dropped, stopping email processor");
                return;
            }
        }
    });

    (handle, shutdown_flag)
}
