use crate::config::RetentionConfig;
use crate::models::job::JobId;
use crate::services::job_store::JobStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub expired: Vec<JobId>,
    pub evicted: Vec<JobId>,
}

#[derive(Clone)]
pub struct RetentionService {
    store: JobStore,
    retention_days: u32,
    sweep_interval: Duration,
}

impl RetentionService {
    pub fn new(store: JobStore, config: &RetentionConfig) -> Self {
        Self {
            store,
            retention_days: config.retention_days,
            sweep_interval: config.sweep_interval,
        }
    }

    /// Sweeps the store every `sweep_interval` until `cancel` fires.
    pub async fn start_background_sweep(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.sweep_interval.max(Duration::from_secs(1)));

        info!(
            "Starting retention sweep: {} day retention, every {:?}",
            self.retention_days, self.sweep_interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Retention sweep stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.run_sweep_at(Utc::now()).await;
                }
            }
        }
    }

    /// Marks elapsed artifacts expired, then drops terminal records that
    /// finished more than `retention_days` ago.
    pub async fn run_sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let expired = self.store.expire_elapsed(now).await;
        let evicted = match chrono::TimeDelta::try_days(i64::from(self.retention_days))
            .and_then(|retention| now.checked_sub_signed(retention))
        {
            Some(cutoff) => self.store.evict_finished_before(cutoff).await,
            None => {
                warn!("Retention window of {} days is out of range, skipping eviction", self.retention_days);
                Vec::new()
            }
        };

        if expired.is_empty() && evicted.is_empty() {
            info!("Retention sweep found nothing to do");
        } else {
            info!(
                "Retention sweep completed - {} jobs expired, {} records evicted",
                expired.len(),
                evicted.len()
            );
        }

        SweepReport { expired, evicted }
    }

    /// Runs one sweep immediately.
    pub async fn run_sweep(&self) -> SweepReport {
        info!("Running immediate retention sweep");
        self.run_sweep_at(Utc::now()).await
    }
}
