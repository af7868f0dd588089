use crate::application::lifecycle::{GroupLifecycleManager, GroupStatusChange};
use crate::domain::clock::ClockHandle;
use crate::domain::group::{GroupId, GroupStatus};
use crate::domain::ports::GroupStore;
use crate::error::Result;
use log::*;

#[derive(Debug, Default)]
pub struct SweepReport {
    pub completed: Vec<GroupStatusChange>,
    pub failed: Vec<GroupStatusChange>,
    /// Groups another caller moved first. Nothing was done to them.
    pub unchanged: Vec<GroupId>,
    pub errors: Vec<(GroupId, String)>,
}

impl SweepReport {
    pub fn processed(&self) -> usize {
        self.completed.len() + self.failed.len() + self.unchanged.len() + self.errors.len()
    }
}

/// Moves active groups past their deadline to `completed` or `failed`.
///
/// Safe to re-run: every transition is a compare-and-swap on `active`, so a group that
/// has already moved is reported as unchanged. Whether a group completes or fails is
/// read under the store's lock at the swap, not from the scan.
pub struct ExpirySweep {
    lifecycle: GroupLifecycleManager,
    clock: ClockHandle,
}

impl ExpirySweep {
    pub fn new(lifecycle: GroupLifecycleManager, clock: ClockHandle) -> Self {
        Self { lifecycle, clock }
    }

    pub async fn run(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let expired = self.lifecycle.store().expired_active_groups(now).await?;
        let mut report = SweepReport::default();
        debug!("🧹️ {} expired groups to sweep", expired.len());

        // The scan only nominates groups; the outcome is decided on the live headcount.
        for group in expired {
            match self.lifecycle.close_expired(group.id).await {
                Ok(change) if !change.changed() => report.unchanged.push(group.id),
                Ok(change) if change.new_status == GroupStatus::Completed => report.completed.push(change),
                Ok(change) => report.failed.push(change),
                Err(e) => {
                    warn!("🧹️ Could not close expired group #{}: {e}", group.id);
                    report.errors.push((group.id, e.to_string()));
                }
            }
        }
        if report.processed() > 0 {
            info!(
                "🧹️ Sweep: {} completed, {} failed, {} already closed, {} errors",
                report.completed.len(),
                report.failed.len(),
                report.unchanged.len(),
                report.errors.len()
            );
        }
        Ok(report)
    }
}
