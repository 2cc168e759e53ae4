//! Payment and Payout records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::machine::{PaymentError, PaymentEvent, transition};
use super::state::{PaymentMethod, PaymentStatus, PayoutStatus};
use crate::booking::{Booking, BookingStatus};
use crate::core_types::{BookingId, PaymentId, PayoutId, UserId};
use crate::money::{Amount, EscrowSplit};

/// Prefix of the synthetic reference given to cash payments
pub const CASH_REFERENCE_PREFIX: &str = "CASH-";

/// One payment per booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub amount: Amount,
    /// Unique across all payments; idempotency anchor for the charge
    pub gateway_reference: String,
    pub status: PaymentStatus,
    pub escrow_amount: Amount,
    pub platform_fee: Amount,
    pub paid_at: Option<DateTime<Utc>>,
    pub method: PaymentMethod,
    pub authorization_url: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    fn validate_booking(booking: &Booking) -> Result<EscrowSplit, PaymentError> {
        if !booking.total_amount.is_positive() {
            return Err(PaymentError::InvalidAmount);
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(PaymentError::InvalidBookingStatus(booking.status));
        }
        Ok(booking.split()?)
    }

    fn build(
        booking: &Booking,
        split: EscrowSplit,
        reference: String,
        method: PaymentMethod,
        status: PaymentStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            booking_id: booking.id,
            amount: split.total,
            gateway_reference: reference,
            status,
            escrow_amount: split.escrow,
            platform_fee: split.platform_fee,
            paid_at: None,
            method,
            authorization_url: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// New PENDING online payment for a CONFIRMED booking
    pub fn online(booking: &Booking, reference: String) -> Result<Self, PaymentError> {
        let split = Self::validate_booking(booking)?;
        Ok(Self::build(
            booking,
            split,
            reference,
            PaymentMethod::Online,
            PaymentStatus::Pending,
        ))
    }

    /// New CASH_PENDING payment for a CONFIRMED booking
    pub fn cash(booking: &Booking) -> Result<Self, PaymentError> {
        let split = Self::validate_booking(booking)?;
        let reference = format!("{}{}", CASH_REFERENCE_PREFIX, booking.id);
        Ok(Self::build(
            booking,
            split,
            reference,
            PaymentMethod::Cash,
            PaymentStatus::CashPending,
        ))
    }

    /// Return a copy advanced by `event`; `self` is left untouched on error.
    pub fn apply(&self, event: PaymentEvent) -> Result<Payment, PaymentError> {
        let status = transition(self.status, event)?;
        let now = Utc::now();
        let mut next = self.clone();
        next.status = status;
        next.updated_at = now;
        if matches!(event, PaymentEvent::ChargeSucceeded | PaymentEvent::CashReceived) {
            next.paid_at = Some(now);
        }
        Ok(next)
    }

    /// Escrow-held state from which a release may start
    pub fn is_releasable(&self) -> bool {
        match self.method {
            PaymentMethod::Online => self.status == PaymentStatus::Escrow,
            PaymentMethod::Cash => self.status == PaymentStatus::CashReceived,
        }
    }

    pub fn split(&self) -> EscrowSplit {
        EscrowSplit {
            total: self.amount,
            platform_fee: self.platform_fee,
            escrow: self.escrow_amount,
        }
    }
}

/// Marker recorded when the retry budget is exhausted
pub const TRANSFER_PERMANENTLY_FAILED: &str = "TRANSFER_PERMANENTLY_FAILED";

/// One payout per payment; written only by the Release Orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub id: PayoutId,
    pub payment_id: PaymentId,
    pub provider_id: UserId,
    /// Always equals the payment's escrow amount
    pub amount: Amount,
    pub transfer_reference: Option<String>,
    pub recipient_code: Option<String>,
    pub status: PayoutStatus,
    /// Transfer calls claimed so far (persisted before each call)
    pub attempts: i32,
    /// Suffix of the transfer idempotency key; advances only once the
    /// gateway has definitely failed the transfer sent under it
    pub transfer_seq: i32,
    pub permanently_failed: bool,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    /// New PENDING payout; the payment must be escrow-held.
    pub fn for_payment(payment: &Payment, provider_id: UserId) -> Result<Self, PaymentError> {
        if !payment.is_releasable() {
            return Err(PaymentError::InvalidPaymentState(payment.status));
        }

        let now = Utc::now();
        Ok(Self {
            id: PayoutId::new(),
            payment_id: payment.id,
            provider_id,
            amount: payment.escrow_amount,
            transfer_reference: None,
            recipient_code: None,
            status: PayoutStatus::Pending,
            attempts: 0,
            transfer_seq: 1,
            permanently_failed: false,
            last_error: None,
            next_retry_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Idempotency key sent with the next transfer call
    ///
    /// Attempts whose outcome is unknown (timeouts) share a key, so the
    /// gateway collapses a retry onto a transfer that already went through.
    pub fn transfer_key(&self) -> String {
        format!("{}-{}", self.id, self.transfer_seq)
    }

    /// Claim a new transfer attempt (persist-before-call)
    pub fn begin_attempt(&self, recipient_code: &str) -> Payout {
        let mut next = self.clone();
        next.status = PayoutStatus::Processing;
        next.attempts += 1;
        next.recipient_code = Some(recipient_code.to_string());
        next.transfer_reference = None;
        next.next_retry_at = None;
        next.updated_at = Utc::now();
        next
    }

    pub fn record_transfer(&self, transfer_reference: String) -> Payout {
        let mut next = self.clone();
        next.transfer_reference = Some(transfer_reference);
        next.last_error = None;
        next.updated_at = Utc::now();
        next
    }

    /// The transfer under the current key definitely failed; the next
    /// attempt gets a fresh key
    pub fn retire_key(&self) -> Payout {
        let mut next = self.clone();
        next.transfer_seq += 1;
        next.updated_at = Utc::now();
        next
    }

    pub fn complete(&self) -> Payout {
        let mut next = self.clone();
        next.status = PayoutStatus::Completed;
        next.permanently_failed = false;
        next.last_error = None;
        next.next_retry_at = None;
        next.updated_at = Utc::now();
        next
    }

    /// Re-claim an interrupted attempt without consuming a new one
    pub fn touch(&self) -> Payout {
        let mut next = self.clone();
        next.updated_at = Utc::now();
        next
    }

    /// Mark the current attempt failed
    ///
    /// `next_retry_at = None` with `permanent = false` leaves scheduling to
    /// the caller; `permanent = true` stops all automatic retries.
    pub fn fail(
        &self,
        error: &str,
        permanent: bool,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Payout {
        let mut next = self.clone();
        next.status = PayoutStatus::Failed;
        next.permanently_failed = permanent;
        next.last_error = Some(if permanent {
            format!("{}: {}", TRANSFER_PERMANENTLY_FAILED, error)
        } else {
            error.to_string()
        });
        next.next_retry_at = if permanent { None } else { next_retry_at };
        next.updated_at = Utc::now();
        next
    }

    /// Still owned by the saga or the retry engine
    pub fn is_in_flight(&self) -> bool {
        match self.status {
            PayoutStatus::Pending | PayoutStatus::Processing => true,
            PayoutStatus::Failed => !self.permanently_failed,
            PayoutStatus::Completed => false,
        }
    }
}
