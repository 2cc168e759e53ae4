//! Charge initialization (online) and cash commitment

use serde::Serialize;
use tracing::{info, warn};

use super::EscrowService;
use crate::booking::{Booking, BookingEvent, BookingStatus};
use crate::core_types::PaymentId;
use crate::error::EscrowError;
use crate::ledger::{LedgerError, LedgerWrite};
use crate::payment::{Payment, PaymentError, PaymentMethod, PaymentStatus};

/// Prefix of online charge references
pub const CHARGE_REFERENCE_PREFIX: &str = "PAY-";

/// Result of initiating a payment
///
/// `Existing` is the idempotent answer when the booking already has a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeOutcome {
    Created {
        payment_id: PaymentId,
        reference: String,
        authorization_url: Option<String>,
    },
    Existing {
        payment_id: PaymentId,
        reference: String,
        authorization_url: Option<String>,
    },
}

impl ChargeOutcome {
    pub fn reference(&self) -> &str {
        match self {
            ChargeOutcome::Created { reference, .. }
            | ChargeOutcome::Existing { reference, .. } => reference,
        }
    }

    pub fn payment_id(&self) -> PaymentId {
        match self {
            ChargeOutcome::Created { payment_id, .. }
            | ChargeOutcome::Existing { payment_id, .. } => *payment_id,
        }
    }

    pub fn authorization_url(&self) -> Option<&str> {
        match self {
            ChargeOutcome::Created {
                authorization_url, ..
            }
            | ChargeOutcome::Existing {
                authorization_url, ..
            } => authorization_url.as_deref(),
        }
    }

    fn existing(payment: &Payment) -> Self {
        ChargeOutcome::Existing {
            payment_id: payment.id,
            reference: payment.gateway_reference.clone(),
            authorization_url: payment.authorization_url.clone(),
        }
    }
}

fn new_charge_reference() -> String {
    format!("{}{}", CHARGE_REFERENCE_PREFIX, ulid::Ulid::new())
}

impl EscrowService {
    /// InitializeCharge
    ///
    /// The PENDING payment (and its reference) is persisted before the
    /// gateway is called, so a crash or gateway failure leaves a payment the
    /// next call resumes instead of a second charge.
    pub async fn initialize_charge(&self, booking: &Booking) -> Result<ChargeOutcome, EscrowError> {
        if let Some(existing) = self.ledger.payment_for_booking(booking.id).await? {
            return self.resume_charge(existing).await;
        }

        let payment = Payment::online(booking, new_charge_reference())?;
        let payment = match self
            .ledger
            .commit(LedgerWrite::new().insert_payment(payment))
            .await
        {
            Ok(committed) => committed
                .payment
                .ok_or_else(|| EscrowError::Internal("payment missing from commit".to_string()))?,
            Err(LedgerError::Conflict(_)) => {
                let existing = self
                    .ledger
                    .payment_for_booking(booking.id)
                    .await?
                    .ok_or_else(|| EscrowError::not_found("payment for booking", booking.id))?;
                return Ok(ChargeOutcome::existing(&existing));
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            booking_id = %booking.id,
            payment_id = %payment.id,
            reference = %payment.gateway_reference,
            amount = %payment.amount,
            escrow = %payment.escrow_amount,
            fee = %payment.platform_fee,
            "Payment created"
        );

        let payment = self.attach_authorization_url(payment).await?;
        Ok(ChargeOutcome::Created {
            payment_id: payment.id,
            reference: payment.gateway_reference,
            authorization_url: payment.authorization_url,
        })
    }

    /// Existing payment: hand back its reference, fetching a checkout URL if
    /// the earlier gateway call never completed.
    async fn resume_charge(&self, existing: Payment) -> Result<ChargeOutcome, EscrowError> {
        if existing.method == PaymentMethod::Online
            && existing.status == PaymentStatus::Pending
            && existing.authorization_url.is_none()
        {
            let payment = self.attach_authorization_url(existing).await?;
            return Ok(ChargeOutcome::existing(&payment));
        }
        Ok(ChargeOutcome::existing(&existing))
    }

    async fn attach_authorization_url(&self, payment: Payment) -> Result<Payment, EscrowError> {
        let session = self
            .gateway
            .initialize_charge(payment.amount, &payment.gateway_reference)
            .await
            .inspect_err(|e| {
                warn!(
                    payment_id = %payment.id,
                    reference = %payment.gateway_reference,
                    error = %e,
                    "Charge initialization failed"
                )
            })?;

        let mut updated = payment.clone();
        updated.authorization_url = Some(session.authorization_url.clone());
        match self
            .ledger
            .commit(LedgerWrite::new().update_payment(updated))
            .await
        {
            Ok(committed) => Ok(committed.payment.unwrap_or(payment)),
            Err(LedgerError::StaleState { .. }) => {
                // The charge webhook won the race; the URL is still valid for the caller
                let mut current = self
                    .ledger
                    .payment(payment.id)
                    .await?
                    .ok_or_else(|| EscrowError::not_found("payment", payment.id))?;
                current.authorization_url = Some(session.authorization_url);
                Ok(current)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cash commitment: CASH_PENDING payment and `PaymentEscrowed` on the
    /// booking in one commit, no gateway involved.
    pub async fn commit_cash(&self, booking: &Booking) -> Result<ChargeOutcome, EscrowError> {
        if let Some(existing) = self.ledger.payment_for_booking(booking.id).await? {
            return Ok(ChargeOutcome::existing(&existing));
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(PaymentError::InvalidBookingStatus(booking.status).into());
        }

        let payment = Payment::cash(booking)?;
        let next = booking.apply(
            BookingEvent::PaymentEscrowed,
            &Self::guard_for(booking, Some(&payment)),
        )?;

        let write = LedgerWrite::new().booking(next).insert_payment(payment);
        match self.ledger.commit(write).await {
            Ok(committed) => {
                let payment = committed.payment.ok_or_else(|| {
                    EscrowError::Internal("payment missing from commit".to_string())
                })?;
                info!(
                    booking_id = %booking.id,
                    payment_id = %payment.id,
                    amount = %payment.amount,
                    "Cash payment committed"
                );
                Ok(ChargeOutcome::Created {
                    payment_id: payment.id,
                    reference: payment.gateway_reference,
                    authorization_url: None,
                })
            }
            Err(LedgerError::Conflict(_)) => {
                let existing = self
                    .ledger
                    .payment_for_booking(booking.id)
                    .await?
                    .ok_or_else(|| EscrowError::not_found("payment for booking", booking.id))?;
                Ok(ChargeOutcome::existing(&existing))
            }
            Err(e) => Err(e.into()),
        }
    }
}
