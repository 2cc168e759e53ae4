//! Recovery Worker
//!
//! Scans for payouts whose driver was lost (process crash between commit
//! and gateway call, or a retry timer that died with the process) and
//! re-drives them through the orchestrator. Everything needed is persisted
//! on the payout row: `attempts`, `next_retry_at`, `updated_at`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::EscrowError;
use crate::release::{ReleaseOrchestrator, ReleaseOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub scan_interval_secs: u64,
    /// How long a payout must be untouched (or overdue) to be recovered
    pub stale_threshold_secs: u64,
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
        }
    }
}

impl RecoveryConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }
}

pub struct RecoveryWorker {
    orchestrator: Arc<ReleaseOrchestrator>,
    config: RecoveryConfig,
}

impl RecoveryWorker {
    pub fn new(orchestrator: Arc<ReleaseOrchestrator>, config: RecoveryConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Scan forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            stale_threshold_secs = self.config.stale_threshold_secs,
            "Starting payout recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Payout recovery scan failed");
            }
            tokio::time::sleep(self.config.scan_interval()).await;
        }
    }

    /// One scan; returns the number of payouts that were moved forward
    pub async fn scan_and_recover(&self) -> Result<usize, EscrowError> {
        let stale = self
            .orchestrator
            .ledger()
            .recoverable_payouts(Utc::now(), self.config.stale_threshold(), self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No payouts to recover");
            return Ok(0);
        }
        info!(count = stale.len(), "Found payouts to recover");

        let mut recovered = 0;
        for payout in stale {
            debug!(
                payout_id = %payout.id,
                status = %payout.status,
                attempts = payout.attempts,
                "Recovering payout"
            );
            match self.orchestrator.drive(payout.id).await {
                Ok(outcome) => {
                    let advanced = !matches!(
                        outcome,
                        ReleaseOutcome::InFlight { .. }
                            | ReleaseOutcome::RecipientPending { .. }
                            | ReleaseOutcome::OnHold { .. }
                    );
                    if advanced {
                        recovered += 1;
                    }
                    info!(payout_id = %payout.id, outcome = ?outcome, "Payout re-driven");
                }
                Err(e) => {
                    error!(payout_id = %payout.id, error = %e, "Failed to recover payout");
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered payouts this scan");
        }
        Ok(recovered)
    }
}
