use crate::application::settlement::SettlementCoordinator;
use crate::application::sweep::ExpirySweep;
use crate::config::EngineConfig;
use log::*;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Starts the background worker. The sweep runs every `sweep_interval`; every
/// `settlement_interval` the sweep runs once more and settlement follows it, so
/// settlement never sees a group the sweep has not had a chance to close.
/// Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_settlement_worker(
    sweep: Arc<ExpirySweep>,
    settlement: Arc<SettlementCoordinator>,
    config: &EngineConfig,
) -> JoinHandle<()> {
    let (sweep_every, settle_every) = (config.sweep_interval, config.settlement_interval);
    tokio::spawn(async move {
        let mut sweep_timer = tokio::time::interval(sweep_every);
        let mut settle_timer = tokio::time::interval(settle_every);
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        settle_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("🕰️ Settlement worker started: sweep every {sweep_every:?}, settle every {settle_every:?}");
        loop {
            tokio::select! {
                _ = settle_timer.tick() => run_once(&sweep, &settlement).await,
                _ = sweep_timer.tick() => run_sweep(&sweep).await,
            }
        }
    })
}

async fn run_sweep(sweep: &ExpirySweep) {
    match sweep.run().await {
        Ok(report) => debug!(
            "🕰️ Sweep closed {} groups ({} errors)",
            report.completed.len() + report.failed.len(),
            report.errors.len()
        ),
        Err(e) => error!("🕰️ Error running the expiry sweep: {e}"),
    }
}

/// One sweep followed by one settlement run. Settlement runs even if the sweep failed,
/// so groups closed earlier are still settled.
pub async fn run_once(sweep: &ExpirySweep, settlement: &SettlementCoordinator) {
    run_sweep(sweep).await;
    match settlement.run().await {
        Ok(report) if report.already_running => debug!("🕰️ Settlement still busy from a previous tick"),
        Ok(report) => debug!(
            "🕰️ Settlement captured {} and released {} orders ({} failures)",
            report.captured,
            report.released,
            report.failures.len()
        ),
        Err(e) => error!("🕰️ Error running settlement: {e}"),
    }
}
