//! Transfer webhooks (`transfer.success`, `transfer.failed`, `transfer.reversed`)
//!
//! The webhook is authoritative for the outcome of a transfer. Events for
//! an attempt that is no longer current are acknowledged as no-ops.

use tracing::{info, warn};

use super::ReleaseOrchestrator;
use crate::core_types::PayoutId;
use crate::error::EscrowError;
use crate::escrow::events::{EventDisposition, ignore_event};
use crate::ledger::{LedgerError, LedgerWrite, WebhookOutcome};
use crate::payment::{PaymentEvent, PaymentStatus, Payout, PayoutStatus};
use crate::webhook::event::{GatewayEvent, GatewayEventKind};

/// Split a `{payoutId}-{seq}` transfer reference
pub fn parse_transfer_key(reference: &str) -> Option<(PayoutId, i32)> {
    let (payout, seq) = reference.rsplit_once('-')?;
    let seq = seq.parse::<i32>().ok().filter(|n| *n > 0)?;
    Some((payout.parse().ok()?, seq))
}

impl ReleaseOrchestrator {
    async fn payout_for_event(
        &self,
        event: &GatewayEvent,
    ) -> Result<Option<(Payout, Option<i32>)>, EscrowError> {
        let key = event.reference.as_deref().and_then(parse_transfer_key);
        if let Some((payout_id, seq)) = key
            && let Some(payout) = self.ledger().payout(payout_id).await?
        {
            return Ok(Some((payout, Some(seq))));
        }
        if let Some(code) = event.transfer_code.as_deref()
            && let Some(payout) = self.ledger().payout_by_transfer_reference(code).await?
        {
            return Ok(Some((payout, None)));
        }
        Ok(None)
    }

    /// Apply a deduplicated transfer event; the event is marked processed in
    /// the same commit as the payout/payment change.
    pub async fn apply_transfer_event(
        &self,
        event: &GatewayEvent,
    ) -> Result<EventDisposition, EscrowError> {
        let Some((payout, seq)) = self.payout_for_event(event).await? else {
            return ignore_event(self.ledger().as_ref(), event, "unknown transfer reference").await;
        };

        let result = match &event.kind {
            GatewayEventKind::TransferSuccess => self.transfer_succeeded(event, payout).await,
            GatewayEventKind::TransferFailed | GatewayEventKind::TransferReversed => {
                self.transfer_failed(event, payout, seq).await
            }
            _ => ignore_event(self.ledger().as_ref(), event, "not a transfer event").await,
        };

        match result {
            Err(EscrowError::Ledger(LedgerError::AlreadyProcessed(_))) => {
                Ok(EventDisposition::Duplicate)
            }
            other => other,
        }
    }

    async fn transfer_succeeded(
        &self,
        event: &GatewayEvent,
        payout: Payout,
    ) -> Result<EventDisposition, EscrowError> {
        if payout.status == PayoutStatus::Completed {
            return ignore_event(self.ledger().as_ref(), event, "payout already completed").await;
        }

        let payment = self
            .ledger()
            .payment(payout.payment_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("payment", payout.payment_id))?;

        // A late success for an attempt that was already failed over still
        // moved the money; finalize from ESCROW as well.
        let next_payment = match payment.status {
            PaymentStatus::ProcessingRelease => payment.apply(PaymentEvent::TransferSucceeded)?,
            PaymentStatus::Escrow => payment
                .apply(PaymentEvent::ReleaseStarted)?
                .apply(PaymentEvent::TransferSucceeded)?,
            other => {
                self.notifier().alert(
                    "transfer after settlement",
                    &format!(
                        "payout {} transfer succeeded but payment {} is {}",
                        payout.id, payment.id, other
                    ),
                );
                return ignore_event(
                    self.ledger().as_ref(),
                    event,
                    "payment no longer awaiting release",
                )
                .await;
            }
        };

        let mut completed = payout.complete();
        if completed.transfer_reference.is_none() {
            completed.transfer_reference = event.transfer_code.clone();
        }

        let write = LedgerWrite::new()
            .update_payout(completed)
            .update_payment(next_payment)
            .mark_event(&event.id, WebhookOutcome::Processed);
        self.ledger().commit(write).await?;

        info!(
            event_id = %event.id,
            payout_id = %payout.id,
            payment_id = %payment.id,
            booking_id = %payment.booking_id,
            amount = %payout.amount,
            "Payout completed, payment released"
        );
        Ok(EventDisposition::Processed)
    }

    async fn transfer_failed(
        &self,
        event: &GatewayEvent,
        payout: Payout,
        seq: Option<i32>,
    ) -> Result<EventDisposition, EscrowError> {
        if payout.status == PayoutStatus::Completed {
            if event.kind == GatewayEventKind::TransferReversed {
                self.notifier().alert(
                    "transfer reversed",
                    &format!(
                        "payout {} was completed but the gateway reversed the transfer",
                        payout.id
                    ),
                );
            }
            return ignore_event(self.ledger().as_ref(), event, "payout already completed").await;
        }

        let same_key = seq == Some(payout.transfer_seq);
        if payout.status == PayoutStatus::Failed && same_key {
            // A timed-out attempt turned out to have failed: the retry
            // already scheduled must not reuse its key
            let write = LedgerWrite::new()
                .update_payout(payout.retire_key())
                .mark_event(&event.id, WebhookOutcome::Processed);
            self.ledger().commit(write).await?;
            info!(
                event_id = %event.id,
                payout_id = %payout.id,
                transfer_seq = payout.transfer_seq,
                "Unknown transfer outcome resolved as failed"
            );
            return Ok(EventDisposition::Processed);
        }

        let current = payout.status == PayoutStatus::Processing && (seq.is_none() || same_key);
        if !current {
            warn!(
                event_id = %event.id,
                payout_id = %payout.id,
                payout_status = %payout.status,
                event_seq = ?seq,
                transfer_seq = payout.transfer_seq,
                "Transfer failure for a superseded attempt"
            );
            return ignore_event(self.ledger().as_ref(), event, "superseded transfer attempt").await;
        }

        let payment = self
            .ledger()
            .payment(payout.payment_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("payment", payout.payment_id))?;

        let reason = event
            .reason
            .clone()
            .unwrap_or_else(|| event.event_type.clone());
        let plan = self.plan_failure(&payout, &payment, &reason, true, true)?;
        let outcome = self
            .commit_failure(
                plan,
                LedgerWrite::new().mark_event(&event.id, WebhookOutcome::Processed),
            )
            .await?;

        info!(
            event_id = %event.id,
            payout_id = %payout.id,
            payment_id = %payment.id,
            outcome = ?outcome,
            "Transfer failure recorded"
        );
        Ok(EventDisposition::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transfer_key() {
        let id = PayoutId::new();
        assert_eq!(parse_transfer_key(&format!("{}-2", id)), Some((id, 2)));
        assert_eq!(parse_transfer_key(&format!("{}-0", id)), None);
        assert_eq!(parse_transfer_key(&id.to_string()), None);
        assert_eq!(parse_transfer_key("garbage-1"), None);
    }
}
