//! Startup recovery of jobs left behind by a previous run.

use chrono::Utc;

use super::JobService;
use crate::error::Result;

/// What the recovery scanner found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Waiting jobs re-driven through the execution pipeline.
    pub restarted: usize,
    /// InProgress jobs older than the stale cutoff, marked Failure.
    pub failed_stale: u64,
}

impl JobService {
    /// Scans the store once, typically at service startup.
    ///
    /// Stale InProgress jobs (started before the configured cutoff by a
    /// process that is gone) are failed first. Every Waiting job is
    /// then re-driven through the full pipeline. The claim update makes
    /// this idempotent at the job level: running the scanner twice
    /// starts nothing twice.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.stale_job_secs as i64);
        let failed_stale = self.jobs.fail_stale_in_progress(cutoff).await?;
        if failed_stale > 0 {
            log::warn!("Failed {} stale in-progress jobs", failed_stale);
        }

        let waiting = self.jobs.waiting().await?;
        if !waiting.is_empty() {
            log::info!("Re-driving {} waiting jobs", waiting.len());
        }
        let restarted = waiting.len();
        for model in waiting {
            self.spawn_execution(model.id);
        }

        Ok(RecoveryReport {
            restarted,
            failed_stale,
        })
    }
}
