//! Release Orchestrator
//!
//! Saga that moves escrowed funds to the provider:
//!
//! 1. require the payment to be escrow-held (ESCROW online, CASH_RECEIVED cash)
//! 2. create the payout and move the payment to PROCESSING_RELEASE in one commit
//! 3. register the provider as a transfer recipient if needed
//! 4. claim an attempt (persist-before-call), call `CreateTransfer`, record
//!    the transfer reference and wait for the `transfer.success` webhook
//!
//! Every step re-reads persisted state, so the saga can be re-entered after a
//! crash or by the Retry Engine. An existing non-terminal payout makes
//! re-invocation a no-op, which is what prevents a second transfer.
//!
//! Cash payments skip the gateway: verification records a COMPLETED payout
//! and moves the payment to CASH_VERIFIED.

pub mod events;
pub mod orchestrator;

pub use orchestrator::ReleaseOrchestrator;

use std::time::Duration;

use serde::Serialize;

use crate::core_types::PayoutId;

/// Where a release stands after an orchestrator call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseOutcome {
    /// Transfer accepted by the gateway; awaiting `transfer.success`
    TransferSubmitted {
        payout_id: PayoutId,
        transfer_reference: String,
    },
    /// Another driver owns the payout right now
    InFlight { payout_id: PayoutId },
    /// Recipient registration failed; payment stays PROCESSING_RELEASE
    RecipientPending { payout_id: PayoutId, reason: String },
    /// Transfer failed; a retry is scheduled
    RetryScheduled {
        payout_id: PayoutId,
        attempt: i32,
        #[serde(skip)]
        retry_in: Duration,
    },
    /// No further automatic retries; operators were notified
    PermanentlyFailed { payout_id: PayoutId },
    /// Booking is disputed; no transfer until an admin resolves it
    OnHold { payout_id: PayoutId },
    /// Payout already completed
    Released { payout_id: PayoutId },
    /// Cash payment verified and settled
    CashSettled { payout_id: PayoutId },
}

impl ReleaseOutcome {
    pub fn payout_id(&self) -> PayoutId {
        match self {
            ReleaseOutcome::TransferSubmitted { payout_id, .. }
            | ReleaseOutcome::InFlight { payout_id }
            | ReleaseOutcome::RecipientPending { payout_id, .. }
            | ReleaseOutcome::RetryScheduled { payout_id, .. }
            | ReleaseOutcome::PermanentlyFailed { payout_id }
            | ReleaseOutcome::OnHold { payout_id }
            | ReleaseOutcome::Released { payout_id }
            | ReleaseOutcome::CashSettled { payout_id } => *payout_id,
        }
    }
}
