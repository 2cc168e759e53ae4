//! Booking record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::machine::{BookingError, GuardContext, transition};
use super::state::{BookingEvent, BookingStatus, DisputeResolution};
use crate::core_types::{BookingId, ServiceId, UserId};
use crate::money::{Amount, EscrowSplit, MoneyError};

/// A client's request for a provider's service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub client_id: UserId,
    pub provider_id: UserId,
    pub service_id: ServiceId,
    pub scheduled_date: DateTime<Utc>,
    pub duration_minutes: i32,
    /// Immutable once a payment exists
    pub total_amount: Amount,
    /// Immutable once a payment exists
    pub platform_fee: Amount,
    pub address: String,
    pub status: BookingStatus,
    pub dispute_reason: Option<String>,
    pub dispute_resolution: Option<DisputeResolution>,
    /// Optimistic concurrency version, bumped by every committed write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a client requests a booking
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub client_id: UserId,
    pub provider_id: UserId,
    pub service_id: ServiceId,
    pub scheduled_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub total_amount: Amount,
    pub platform_fee: Amount,
    pub address: String,
}

impl Booking {
    /// Create a PENDING booking; the fee split must balance.
    pub fn create(new: NewBooking) -> Result<Self, MoneyError> {
        EscrowSplit::new(new.total_amount, new.platform_fee)?;

        let now = Utc::now();
        Ok(Self {
            id: BookingId::new(),
            client_id: new.client_id,
            provider_id: new.provider_id,
            service_id: new.service_id,
            scheduled_date: new.scheduled_date,
            duration_minutes: new.duration_minutes,
            total_amount: new.total_amount,
            platform_fee: new.platform_fee,
            address: new.address,
            status: BookingStatus::Pending,
            dispute_reason: None,
            dispute_resolution: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Return a copy advanced by `event`; `self` is left untouched on error.
    pub fn apply(&self, event: BookingEvent, ctx: &GuardContext) -> Result<Booking, BookingError> {
        let status = transition(self.status, event, ctx)?;
        let mut next = self.clone();
        next.status = status;
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// Guard context fragment derived from this booking
    pub fn guard(&self, mut ctx: GuardContext) -> GuardContext {
        ctx.dispute_resolved = self.dispute_resolution.is_some();
        ctx
    }

    /// Fee split recorded on the booking
    pub fn split(&self) -> Result<EscrowSplit, MoneyError> {
        EscrowSplit::new(self.total_amount, self.platform_fee)
    }
}

#[cfg(test)]
pub(crate) fn sample_booking(total: i64, fee: i64) -> Booking {
    Booking::create(NewBooking {
        client_id: 1001,
        provider_id: 2002,
        service_id: 7,
        scheduled_date: Utc::now(),
        duration_minutes: 90,
        total_amount: Amount::from_minor(total),
        platform_fee: Amount::from_minor(fee),
        address: "12 Marina Road".to_string(),
    })
    .unwrap()
}
