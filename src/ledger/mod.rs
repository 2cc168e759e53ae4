//! Ledger Store
//!
//! Durable storage for bookings, payments, payouts, provider payout
//! accounts and inbound webhook events.
//!
//! # Consistency
//!
//! Every multi-entity change goes through [`LedgerStore::commit`], which
//! applies a [`LedgerWrite`] in ONE transaction:
//! - updates are guarded by the row `version` (optimistic CAS); a mismatch
//!   rolls back the whole unit with [`LedgerError::StaleState`]
//! - inserts honour the unique constraints (`payments.booking_id`,
//!   `payments.gateway_reference`, `payouts.payment_id`); a violation rolls
//!   back with [`LedgerError::Conflict`]
//! - a webhook processed-mark succeeds only once per event id; otherwise the
//!   unit rolls back with [`LedgerError::AlreadyProcessed`]

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::booking::Booking;
use crate::core_types::{BookingId, PaymentId, PayoutId, UserId};
use crate::payment::{Payment, Payout, UnknownStatus};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Stale {entity} {id}: expected version {expected}")]
    StaleState {
        entity: &'static str,
        id: String,
        expected: i64,
    },

    #[error("Webhook event {0} already processed")]
    AlreadyProcessed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Connection loss and similar infrastructure failures
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

impl From<UnknownStatus> for LedgerError {
    fn from(e: UnknownStatus) -> Self {
        LedgerError::Corrupt(e.to_string())
    }
}

// ============================================================================
// Webhook events
// ============================================================================

/// Processing outcome of an inbound webhook event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookOutcome {
    /// Recorded, not yet successfully handled
    Received,
    /// Handled and its state changes committed
    Processed,
    /// Handled as a no-op (out-of-order, unknown type, unknown reference)
    Ignored,
    /// Last handling attempt failed; gateway will redeliver
    Failed,
    /// Payload could not be parsed; kept for audit only
    Malformed,
}

impl WebhookOutcome {
    /// Final outcomes are never reprocessed
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            WebhookOutcome::Processed | WebhookOutcome::Ignored | WebhookOutcome::Malformed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Received => "RECEIVED",
            WebhookOutcome::Processed => "PROCESSED",
            WebhookOutcome::Ignored => "IGNORED",
            WebhookOutcome::Failed => "FAILED",
            WebhookOutcome::Malformed => "MALFORMED",
        }
    }
}

impl fmt::Display for WebhookOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WebhookOutcome {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(WebhookOutcome::Received),
            "PROCESSED" => Ok(WebhookOutcome::Processed),
            "IGNORED" => Ok(WebhookOutcome::Ignored),
            "FAILED" => Ok(WebhookOutcome::Failed),
            "MALFORMED" => Ok(WebhookOutcome::Malformed),
            _ => Err(UnknownStatus {
                kind: "webhook outcome",
                value: s.to_string(),
            }),
        }
    }
}

/// Audit row for every inbound webhook delivery (deduplication key: `event_id`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub raw_payload: String,
    pub outcome: WebhookOutcome,
    pub error: Option<String>,
    /// Handling attempts that ended in `Failed`
    pub failures: i32,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    pub fn received(event_id: String, event_type: String, raw_payload: String) -> Self {
        Self {
            event_id,
            event_type,
            raw_payload,
            outcome: WebhookOutcome::Received,
            error: None,
            failures: 0,
            received_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn malformed(event_id: String, raw_payload: String, error: String) -> Self {
        Self {
            event_id,
            event_type: "unknown".to_string(),
            raw_payload,
            outcome: WebhookOutcome::Malformed,
            error: Some(error),
            failures: 0,
            received_at: Utc::now(),
            processed_at: Some(Utc::now()),
        }
    }
}

// ============================================================================
// Provider payout accounts
// ============================================================================

/// Provider bank details and the gateway transfer recipient registered for them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub provider_id: UserId,
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
    pub recipient_code: Option<String>,
}

// ============================================================================
// Atomic write unit
// ============================================================================

/// Insert or version-guarded update of one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowWrite<T> {
    Insert(T),
    /// Applied only if the stored version equals `row.version`
    Update(T),
}

impl<T> RowWrite<T> {
    pub fn row(&self) -> &T {
        match self {
            RowWrite::Insert(r) | RowWrite::Update(r) => r,
        }
    }
}

/// Changes that must commit together or not at all
#[derive(Debug, Clone, Default)]
pub struct LedgerWrite {
    pub booking: Option<Booking>,
    pub payment: Option<RowWrite<Payment>>,
    pub payout: Option<RowWrite<Payout>>,
    pub processed_event: Option<(String, WebhookOutcome)>,
}

impl LedgerWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn booking(mut self, booking: Booking) -> Self {
        self.booking = Some(booking);
        self
    }

    pub fn insert_payment(mut self, payment: Payment) -> Self {
        self.payment = Some(RowWrite::Insert(payment));
        self
    }

    pub fn update_payment(mut self, payment: Payment) -> Self {
        self.payment = Some(RowWrite::Update(payment));
        self
    }

    pub fn insert_payout(mut self, payout: Payout) -> Self {
        self.payout = Some(RowWrite::Insert(payout));
        self
    }

    pub fn update_payout(mut self, payout: Payout) -> Self {
        self.payout = Some(RowWrite::Update(payout));
        self
    }

    pub fn mark_event(mut self, event_id: &str, outcome: WebhookOutcome) -> Self {
        self.processed_event = Some((event_id.to_string(), outcome));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.booking.is_none()
            && self.payment.is_none()
            && self.payout.is_none()
            && self.processed_event.is_none()
    }
}

/// Rows as persisted by a successful commit (versions bumped)
#[derive(Debug, Clone, Default)]
pub struct Committed {
    pub booking: Option<Booking>,
    pub payment: Option<Payment>,
    pub payout: Option<Payout>,
}

pub(crate) fn bumped<T: Clone>(write: &RowWrite<T>, version: impl Fn(&mut T)) -> T {
    match write {
        RowWrite::Insert(r) => r.clone(),
        RowWrite::Update(r) => {
            let mut r = r.clone();
            version(&mut r);
            r
        }
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Ledger persistence seam
///
/// Implementations must make [`LedgerStore::commit`] atomic and serializable
/// with respect to other commits touching the same rows.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &'static str;

    async fn insert_booking(&self, booking: &Booking) -> Result<(), LedgerError>;
    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, LedgerError>;

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, LedgerError>;
    async fn payment_for_booking(&self, id: BookingId) -> Result<Option<Payment>, LedgerError>;
    async fn payment_by_reference(&self, reference: &str)
    -> Result<Option<Payment>, LedgerError>;

    async fn payout(&self, id: PayoutId) -> Result<Option<Payout>, LedgerError>;
    async fn payout_for_payment(&self, id: PaymentId) -> Result<Option<Payout>, LedgerError>;
    async fn payout_by_transfer_reference(
        &self,
        transfer_reference: &str,
    ) -> Result<Option<Payout>, LedgerError>;

    /// Payouts whose driver was lost: PENDING/PROCESSING without a transfer
    /// reference untouched for `stale_after`, or retryable FAILED payouts whose
    /// `next_retry_at` is more than `stale_after` in the past.
    async fn recoverable_payouts(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        limit: usize,
    ) -> Result<Vec<Payout>, LedgerError>;

    async fn provider_account(
        &self,
        provider_id: UserId,
    ) -> Result<Option<ProviderAccount>, LedgerError>;
    /// Upsert bank details; a stored recipient code survives only while the
    /// account number and bank code are unchanged.
    async fn save_provider_account(&self, account: &ProviderAccount) -> Result<(), LedgerError>;
    /// Persist the recipient code unless one is already stored; returns the stored code.
    async fn set_recipient_code(
        &self,
        provider_id: UserId,
        recipient_code: &str,
    ) -> Result<String, LedgerError>;

    /// `INSERT .. ON CONFLICT DO NOTHING`; `true` if this call inserted the row.
    async fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<bool, LedgerError>;
    async fn webhook_event(&self, event_id: &str) -> Result<Option<WebhookEvent>, LedgerError>;
    /// Record a failed handling attempt; no effect on a final event.
    async fn record_webhook_failure(&self, event_id: &str, error: &str)
    -> Result<(), LedgerError>;

    /// Apply `write` atomically.
    async fn commit(&self, write: LedgerWrite) -> Result<Committed, LedgerError>;
}
