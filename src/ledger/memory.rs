//! In-memory ledger
//!
//! Same contract as the PostgreSQL store. A single mutex serializes every
//! commit, so each [`LedgerWrite`] is trivially atomic. Backs
//! `storage: memory` and the test suite.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    Committed, LedgerError, LedgerStore, LedgerWrite, ProviderAccount, RowWrite, WebhookEvent,
    WebhookOutcome, bumped,
};
use crate::booking::Booking;
use crate::core_types::{BookingId, PaymentId, PayoutId, UserId};
use crate::payment::{Payment, Payout, PayoutStatus};

#[derive(Default)]
struct Inner {
    bookings: HashMap<BookingId, Booking>,
    payments: HashMap<PaymentId, Payment>,
    payment_by_booking: HashMap<BookingId, PaymentId>,
    payment_by_reference: HashMap<String, PaymentId>,
    payouts: HashMap<PayoutId, Payout>,
    payout_by_payment: HashMap<PaymentId, PayoutId>,
    providers: HashMap<UserId, ProviderAccount>,
    events: HashMap<String, WebhookEvent>,
}

/// Mutex-backed [`LedgerStore`]
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
    /// Remaining commits to fail with a transient error (fault injection)
    failing_commits: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` commits as if the database connection dropped
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Commits validate before applying, so a poisoned map is still consistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn stale(entity: &'static str, id: impl ToString, expected: i64) -> LedgerError {
    LedgerError::StaleState {
        entity,
        id: id.to_string(),
        expected,
    }
}

impl Inner {
    fn validate(&self, write: &LedgerWrite) -> Result<(), LedgerError> {
        if let Some(booking) = &write.booking {
            let stored = self
                .bookings
                .get(&booking.id)
                .ok_or_else(|| LedgerError::not_found("booking", booking.id))?;
            if stored.version != booking.version {
                return Err(stale("booking", booking.id, booking.version));
            }
        }

        match &write.payment {
            Some(RowWrite::Insert(p)) => {
                if self.payments.contains_key(&p.id)
                    || self.payment_by_booking.contains_key(&p.booking_id)
                {
                    return Err(LedgerError::Conflict(format!(
                        "payment for booking {} already exists",
                        p.booking_id
                    )));
                }
                if self.payment_by_reference.contains_key(&p.gateway_reference) {
                    return Err(LedgerError::Conflict(format!(
                        "gateway reference {} already used",
                        p.gateway_reference
                    )));
                }
            }
            Some(RowWrite::Update(p)) => {
                let stored = self
                    .payments
                    .get(&p.id)
                    .ok_or_else(|| LedgerError::not_found("payment", p.id))?;
                if stored.version != p.version {
                    return Err(stale("payment", p.id, p.version));
                }
            }
            None => {}
        }

        match &write.payout {
            Some(RowWrite::Insert(p)) => {
                if self.payouts.contains_key(&p.id)
                    || self.payout_by_payment.contains_key(&p.payment_id)
                {
                    return Err(LedgerError::Conflict(format!(
                        "payout for payment {} already exists",
                        p.payment_id
                    )));
                }
            }
            Some(RowWrite::Update(p)) => {
                let stored = self
                    .payouts
                    .get(&p.id)
                    .ok_or_else(|| LedgerError::not_found("payout", p.id))?;
                if stored.version != p.version {
                    return Err(stale("payout", p.id, p.version));
                }
            }
            None => {}
        }

        if let Some((event_id, _)) = &write.processed_event {
            let stored = self
                .events
                .get(event_id)
                .ok_or_else(|| LedgerError::not_found("webhook event", event_id))?;
            if stored.outcome.is_final() {
                return Err(LedgerError::AlreadyProcessed(event_id.clone()));
            }
        }

        Ok(())
    }

    fn apply(&mut self, write: LedgerWrite) -> Committed {
        let mut committed = Committed::default();

        if let Some(mut booking) = write.booking {
            booking.version += 1;
            self.bookings.insert(booking.id, booking.clone());
            committed.booking = Some(booking);
        }

        if let Some(payment_write) = &write.payment {
            let payment = bumped(payment_write, |p: &mut Payment| p.version += 1);
            self.payment_by_booking.insert(payment.booking_id, payment.id);
            self.payment_by_reference
                .insert(payment.gateway_reference.clone(), payment.id);
            self.payments.insert(payment.id, payment.clone());
            committed.payment = Some(payment);
        }

        if let Some(payout_write) = &write.payout {
            let payout = bumped(payout_write, |p: &mut Payout| p.version += 1);
            self.payout_by_payment.insert(payout.payment_id, payout.id);
            self.payouts.insert(payout.id, payout.clone());
            committed.payout = Some(payout);
        }

        if let Some((event_id, outcome)) = write.processed_event
            && let Some(event) = self.events.get_mut(&event_id)
        {
            event.outcome = outcome;
            event.error = None;
            event.processed_at = Some(Utc::now());
        }

        committed
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.bookings.contains_key(&booking.id) {
            return Err(LedgerError::Conflict(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        inner.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, LedgerError> {
        Ok(self.lock().bookings.get(&id).cloned())
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, LedgerError> {
        Ok(self.lock().payments.get(&id).cloned())
    }

    async fn payment_for_booking(&self, id: BookingId) -> Result<Option<Payment>, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .payment_by_booking
            .get(&id)
            .and_then(|pid| inner.payments.get(pid))
            .cloned())
    }

    async fn payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .payment_by_reference
            .get(reference)
            .and_then(|pid| inner.payments.get(pid))
            .cloned())
    }

    async fn payout(&self, id: PayoutId) -> Result<Option<Payout>, LedgerError> {
        Ok(self.lock().payouts.get(&id).cloned())
    }

    async fn payout_for_payment(&self, id: PaymentId) -> Result<Option<Payout>, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .payout_by_payment
            .get(&id)
            .and_then(|pid| inner.payouts.get(pid))
            .cloned())
    }

    async fn payout_by_transfer_reference(
        &self,
        transfer_reference: &str,
    ) -> Result<Option<Payout>, LedgerError> {
        Ok(self
            .lock()
            .payouts
            .values()
            .find(|p| p.transfer_reference.as_deref() == Some(transfer_reference))
            .cloned())
    }

    async fn recoverable_payouts(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        limit: usize,
    ) -> Result<Vec<Payout>, LedgerError> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| LedgerError::Corrupt(format!("invalid stale threshold: {}", e)))?;
        let cutoff = now - stale_after;

        let inner = self.lock();
        let mut payouts: Vec<Payout> = inner
            .payouts
            .values()
            .filter(|p| match p.status {
                PayoutStatus::Pending | PayoutStatus::Processing => {
                    p.transfer_reference.is_none() && p.updated_at < cutoff
                }
                PayoutStatus::Failed => {
                    !p.permanently_failed && p.next_retry_at.is_some_and(|at| at < cutoff)
                }
                PayoutStatus::Completed => false,
            })
            .cloned()
            .collect();
        payouts.sort_by_key(|p| p.updated_at);
        payouts.truncate(limit);
        Ok(payouts)
    }

    async fn provider_account(
        &self,
        provider_id: UserId,
    ) -> Result<Option<ProviderAccount>, LedgerError> {
        Ok(self.lock().providers.get(&provider_id).cloned())
    }

    async fn save_provider_account(&self, account: &ProviderAccount) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let recipient_code = inner
            .providers
            .get(&account.provider_id)
            .filter(|a| {
                a.account_number == account.account_number && a.bank_code == account.bank_code
            })
            .and_then(|a| a.recipient_code.clone())
            .or_else(|| account.recipient_code.clone());
        let mut account = account.clone();
        account.recipient_code = recipient_code;
        inner.providers.insert(account.provider_id, account);
        Ok(())
    }

    async fn set_recipient_code(
        &self,
        provider_id: UserId,
        recipient_code: &str,
    ) -> Result<String, LedgerError> {
        let mut inner = self.lock();
        let account = inner
            .providers
            .get_mut(&provider_id)
            .ok_or_else(|| LedgerError::not_found("provider account", provider_id))?;
        Ok(account
            .recipient_code
            .get_or_insert_with(|| recipient_code.to_string())
            .clone())
    }

    async fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<bool, LedgerError> {
        let mut inner = self.lock();
        if inner.events.contains_key(&event.event_id) {
            return Ok(false);
        }
        inner.events.insert(event.event_id.clone(), event.clone());
        Ok(true)
    }

    async fn webhook_event(&self, event_id: &str) -> Result<Option<WebhookEvent>, LedgerError> {
        Ok(self.lock().events.get(event_id).cloned())
    }

    async fn record_webhook_failure(
        &self,
        event_id: &str,
        error: &str,
    ) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if let Some(event) = inner.events.get_mut(event_id)
            && !event.outcome.is_final()
        {
            event.outcome = WebhookOutcome::Failed;
            event.error = Some(error.to_string());
            event.failures += 1;
        }
        Ok(())
    }

    async fn commit(&self, write: LedgerWrite) -> Result<Committed, LedgerError> {
        if self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut inner = self.lock();
        inner.validate(&write)?;
        let committed = inner.apply(write);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::BookingStatus;
    use crate::booking::types::sample_booking;
    use crate::payment::PaymentEvent;

    async fn seeded() -> (MemoryLedger, Booking, Payment) {
        let ledger = MemoryLedger::new();
        let mut booking = sample_booking(50_000, 5_000);
        booking.status = BookingStatus::Confirmed;
        ledger.insert_booking(&booking).await.unwrap();
        let payment = Payment::online(&booking, "R1".into()).unwrap();
        ledger
            .commit(LedgerWrite::new().insert_payment(payment.clone()))
            .await
            .unwrap();
        (ledger, booking, payment)
    }

    #[tokio::test]
    async fn test_commit_bumps_versions() {
        let (ledger, booking, payment) = seeded().await;
        let escrowed = payment.apply(PaymentEvent::ChargeSucceeded).unwrap();

        let mut next = booking.clone();
        next.status = BookingStatus::PendingExecution;
        let committed = ledger
            .commit(LedgerWrite::new().booking(next).update_payment(escrowed))
            .await
            .unwrap();

        assert_eq!(committed.booking.unwrap().version, booking.version + 1);
        assert_eq!(committed.payment.unwrap().version, payment.version + 1);
    }

    #[tokio::test]
    async fn test_stale_write_rolls_back_everything() {
        let (ledger, booking, payment) = seeded().await;

        // First writer wins
        let mut first = booking.clone();
        first.status = BookingStatus::Cancelled;
        ledger.commit(LedgerWrite::new().booking(first)).await.unwrap();

        // Second writer holds the old version
        let escrowed = payment.apply(PaymentEvent::ChargeSucceeded).unwrap();
        let mut second = booking.clone();
        second.status = BookingStatus::PendingExecution;
        let err = ledger
            .commit(LedgerWrite::new().booking(second).update_payment(escrowed))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StaleState { entity: "booking", .. }));

        // Payment untouched
        let stored = ledger.payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, payment.status);
        assert_eq!(stored.version, payment.version);
    }

    #[tokio::test]
    async fn test_unique_payment_per_booking() {
        let (ledger, booking, _) = seeded().await;
        let dup = Payment::online(&booking, "R2".into()).unwrap();
        let err = ledger
            .commit(LedgerWrite::new().insert_payment(dup))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unique_payout_per_payment() {
        let (ledger, _, payment) = seeded().await;
        let charged = payment.apply(PaymentEvent::ChargeSucceeded).unwrap();
        let escrowed = ledger
            .commit(LedgerWrite::new().update_payment(charged))
            .await
            .unwrap()
            .payment
            .unwrap();

        let first = Payout::for_payment(&escrowed, 2002).unwrap();
        let second = Payout::for_payment(&escrowed, 2002).unwrap();
        ledger
            .commit(LedgerWrite::new().insert_payout(first))
            .await
            .unwrap();
        assert!(matches!(
            ledger.commit(LedgerWrite::new().insert_payout(second)).await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_event_marked_once() {
        let ledger = MemoryLedger::new();
        let event = WebhookEvent::received("evt_1".into(), "charge.success".into(), "{}".into());

        assert!(ledger.insert_webhook_event(&event).await.unwrap());
        assert!(!ledger.insert_webhook_event(&event).await.unwrap());

        ledger
            .commit(LedgerWrite::new().mark_event("evt_1", WebhookOutcome::Processed))
            .await
            .unwrap();
        let err = ledger
            .commit(LedgerWrite::new().mark_event("evt_1", WebhookOutcome::Processed))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyProcessed(_)));

        // Failures after processing are ignored
        ledger.record_webhook_failure("evt_1", "boom").await.unwrap();
        let stored = ledger.webhook_event("evt_1").await.unwrap().unwrap();
        assert_eq!(stored.outcome, WebhookOutcome::Processed);
        assert_eq!(stored.failures, 0);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let (ledger, booking, _) = seeded().await;
        ledger.fail_next_commits(1);
        let err = ledger
            .commit(LedgerWrite::new().booking(booking.clone()))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        ledger.commit(LedgerWrite::new().booking(booking)).await.unwrap();
    }

    #[tokio::test]
    async fn test_recipient_code_set_once() {
        let ledger = MemoryLedger::new();
        ledger
            .save_provider_account(&ProviderAccount {
                provider_id: 2002,
                account_name: "Ada".into(),
                account_number: "0123456789".into(),
                bank_code: "058".into(),
                recipient_code: None,
            })
            .await
            .unwrap();

        assert_eq!(ledger.set_recipient_code(2002, "RCP_1").await.unwrap(), "RCP_1");
        assert_eq!(ledger.set_recipient_code(2002, "RCP_2").await.unwrap(), "RCP_1");
    }

    #[tokio::test]
    async fn test_recipient_code_reset_on_new_account() {
        let ledger = MemoryLedger::new();
        let mut account = ProviderAccount {
            provider_id: 2002,
            account_name: "Ada".into(),
            account_number: "0123456789".into(),
            bank_code: "058".into(),
            recipient_code: None,
        };
        ledger.save_provider_account(&account).await.unwrap();
        ledger.set_recipient_code(2002, "RCP_1").await.unwrap();

        ledger.save_provider_account(&account).await.unwrap();
        let stored = ledger.provider_account(2002).await.unwrap().unwrap();
        assert_eq!(stored.recipient_code.as_deref(), Some("RCP_1"));

        account.account_number = "9876543210".into();
        ledger.save_provider_account(&account).await.unwrap();
        let stored = ledger.provider_account(2002).await.unwrap().unwrap();
        assert_eq!(stored.recipient_code, None);
    }
}
