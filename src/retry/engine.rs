//! Retry Engine
//!
//! Failed transfers are handed over through an unbounded channel; each
//! retry then runs as its own deferred tokio task that sleeps out the
//! backoff and re-drives the payout through the orchestrator. The delay and
//! attempt count are persisted on the payout before scheduling, so a lost
//! timer is picked up by the recovery worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core_types::PayoutId;
use crate::release::ReleaseOrchestrator;

/// Scheduled re-attempt of a payout transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub payout_id: PayoutId,
    /// Transfer calls already made
    pub attempt: i32,
    pub delay: Duration,
}

/// Sender side, held by the orchestrator
#[derive(Clone)]
pub struct RetryHandle {
    tx: mpsc::UnboundedSender<RetryRequest>,
}

impl RetryHandle {
    /// Queue a retry; `false` if the engine has stopped
    pub fn schedule(&self, payout_id: PayoutId, attempt: i32, delay: Duration) -> bool {
        debug!(
            payout_id = %payout_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling transfer retry"
        );
        match self.tx.send(RetryRequest {
            payout_id,
            attempt,
            delay,
        }) {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    payout_id = %payout_id,
                    "Retry engine stopped; recovery worker will pick the payout up"
                );
                false
            }
        }
    }
}

/// Receiver side, consumed by [`RetryEngine`]
pub struct RetryReceiver {
    rx: mpsc::UnboundedReceiver<RetryRequest>,
}

impl RetryReceiver {
    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<RetryRequest> {
        self.rx.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<RetryRequest> {
        self.rx.recv().await
    }
}

/// Create a new retry channel pair
pub fn retry_channel() -> (RetryHandle, RetryReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RetryHandle { tx }, RetryReceiver { rx })
}

/// Spawns one deferred task per scheduled retry
pub struct RetryEngine {
    receiver: RetryReceiver,
    orchestrator: Arc<ReleaseOrchestrator>,
}

impl RetryEngine {
    pub fn new(receiver: RetryReceiver, orchestrator: Arc<ReleaseOrchestrator>) -> Self {
        Self {
            receiver,
            orchestrator,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until every [`RetryHandle`] is dropped
    pub async fn run(mut self) {
        info!("Starting retry engine");

        while let Some(request) = self.receiver.recv().await {
            let orchestrator = self.orchestrator.clone();
            tokio::spawn(async move {
                tokio::time::sleep(request.delay).await;
                match orchestrator.drive(request.payout_id).await {
                    Ok(outcome) => info!(
                        payout_id = %request.payout_id,
                        attempt = request.attempt + 1,
                        outcome = ?outcome,
                        "Transfer retry finished"
                    ),
                    Err(e) => error!(
                        payout_id = %request.payout_id,
                        attempt = request.attempt + 1,
                        error = %e,
                        "Transfer retry failed"
                    ),
                }
            });
        }

        info!("Retry engine stopped");
    }
}
