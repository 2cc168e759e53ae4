//! ApplyGatewayEvent
//!
//! Consumes a deduplicated gateway event. State changes and the event's
//! processed-mark commit together; events that match no legal transition
//! are acknowledged as `Ignored` with a warning and change nothing else.

use tracing::{info, warn};

use super::EscrowService;
use crate::booking::BookingEvent;
use crate::error::EscrowError;
use crate::ledger::{LedgerError, LedgerStore, LedgerWrite, WebhookOutcome};
use crate::payment::{PaymentEvent, PaymentMethod, PaymentStatus};
use crate::webhook::event::{GatewayEvent, GatewayEventKind};

/// How an event was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDisposition {
    /// State changed and event marked processed
    Processed,
    /// Acknowledged without effect
    Ignored(String),
    /// Another delivery already finished this event
    Duplicate,
}

/// Mark `event` ignored; nothing else is written
pub(crate) async fn ignore_event(
    ledger: &dyn LedgerStore,
    event: &GatewayEvent,
    reason: &str,
) -> Result<EventDisposition, EscrowError> {
    warn!(
        event_id = %event.id,
        event_type = %event.event_type,
        reference = ?event.reference,
        reason,
        "Gateway event ignored"
    );
    match ledger
        .commit(LedgerWrite::new().mark_event(&event.id, WebhookOutcome::Ignored))
        .await
    {
        Ok(_) => Ok(EventDisposition::Ignored(reason.to_string())),
        Err(LedgerError::AlreadyProcessed(_)) => Ok(EventDisposition::Duplicate),
        Err(e) => Err(e.into()),
    }
}

impl EscrowService {
    pub async fn apply_gateway_event(
        &self,
        event: &GatewayEvent,
    ) -> Result<EventDisposition, EscrowError> {
        match &event.kind {
            GatewayEventKind::ChargeSuccess | GatewayEventKind::ChargeFailed => {
                self.apply_charge_event(event).await
            }
            GatewayEventKind::TransferSuccess
            | GatewayEventKind::TransferFailed
            | GatewayEventKind::TransferReversed => {
                self.orchestrator.apply_transfer_event(event).await
            }
            GatewayEventKind::Other(_) => {
                ignore_event(self.ledger.as_ref(), event, "unhandled event type").await
            }
        }
    }

    async fn apply_charge_event(
        &self,
        event: &GatewayEvent,
    ) -> Result<EventDisposition, EscrowError> {
        let ledger = self.ledger.as_ref();
        let Some(reference) = event.reference.as_deref() else {
            return ignore_event(ledger, event, "missing reference").await;
        };
        let Some(payment) = ledger.payment_by_reference(reference).await? else {
            return ignore_event(ledger, event, "unknown payment reference").await;
        };
        if payment.method == PaymentMethod::Cash {
            return ignore_event(ledger, event, "charge event for cash payment").await;
        }

        let payment_event = match event.kind {
            GatewayEventKind::ChargeSuccess => PaymentEvent::ChargeSucceeded,
            _ => PaymentEvent::ChargeFailed,
        };

        if payment_event == PaymentEvent::ChargeSucceeded {
            if let Some(amount) = event.amount {
                if amount != payment.amount {
                    self.orchestrator.notifier().alert(
                        "charge amount mismatch",
                        &format!(
                            "payment {} expected {} but gateway reported {}",
                            payment.id, payment.amount, amount
                        ),
                    );
                    return ignore_event(ledger, event, "amount mismatch").await;
                }
            }
            if payment.status == PaymentStatus::Failed {
                // Money captured after the booking was abandoned
                self.orchestrator.notifier().alert(
                    "charge after failure",
                    &format!(
                        "payment {} is FAILED but the gateway captured the charge; refund manually",
                        payment.id
                    ),
                );
            }
        }

        let next_payment = match payment.apply(payment_event) {
            Ok(next) => next,
            Err(e) => {
                return ignore_event(ledger, event, &e.to_string()).await;
            }
        };

        let mut write = LedgerWrite::new().update_payment(next_payment.clone());

        if payment_event == PaymentEvent::ChargeSucceeded {
            let booking = self.load_booking(payment.booking_id).await?;
            let ctx = Self::guard_for(&booking, Some(&next_payment));
            match booking.apply(BookingEvent::PaymentEscrowed, &ctx) {
                Ok(next_booking) => write = write.booking(next_booking),
                Err(e) => warn!(
                    booking_id = %booking.id,
                    payment_id = %payment.id,
                    error = %e,
                    "Payment escrowed but booking not advanced"
                ),
            }
        }

        let write = write.mark_event(&event.id, WebhookOutcome::Processed);
        match ledger.commit(write).await {
            Ok(_) => {}
            Err(LedgerError::AlreadyProcessed(_)) => return Ok(EventDisposition::Duplicate),
            Err(e) => return Err(e.into()),
        }

        info!(
            event_id = %event.id,
            payment_id = %payment.id,
            booking_id = %payment.booking_id,
            reference,
            from = %payment.status,
            to = %next_payment.status,
            "Charge event applied"
        );
        Ok(EventDisposition::Processed)
    }
}
