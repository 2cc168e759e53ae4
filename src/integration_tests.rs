//! End-to-end flows over the in-memory ledger and a scripted gateway

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::booking::{BookingStatus, DisputeResolution};
use crate::core_types::{BookingId, PayoutId};
use crate::error::EscrowError;
use crate::escrow::actions::CreateBooking;
use crate::escrow::{Actor, EscrowService, Role};
use crate::gateway::mock::MockGateway;
use crate::gateway::{BankDetails, GatewayError};
use crate::ledger::{LedgerStore, LedgerWrite, MemoryLedger, WebhookOutcome};
use crate::money::Amount;
use crate::notify::recording::RecordingNotifier;
use crate::payment::{Payment, PaymentMethod, PaymentStatus, Payout, PayoutStatus};
use crate::release::{ReleaseOrchestrator, ReleaseOutcome};
use crate::retry::{
    RecoveryConfig, RecoveryWorker, RetryEngine, RetryPolicy, RetryReceiver, retry_channel,
};
use crate::webhook::event::body_event_id;
use crate::webhook::{IngestOutcome, WebhookError, WebhookIngestor, signature};

const SECRET: &str = "whsec_integration";
const CLIENT_ID: i64 = 1001;
const PROVIDER_ID: i64 = 2002;

fn client() -> Actor {
    Actor::new(CLIENT_ID, Role::Client)
}

fn provider() -> Actor {
    Actor::new(PROVIDER_ID, Role::Provider)
}

fn admin() -> Actor {
    Actor::new(1, Role::Admin)
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay_ms: 1,
        max_delay_ms: 5,
        max_jitter_ms: 0,
        max_attempts: 3,
    }
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    gateway: Arc<MockGateway>,
    notifier: Arc<RecordingNotifier>,
    escrow: Arc<EscrowService>,
    ingestor: WebhookIngestor,
    retries: RetryReceiver,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(fast_policy())
    }

    fn with_policy(policy: RetryPolicy) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let gateway = Arc::new(MockGateway::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let store: Arc<dyn LedgerStore> = ledger.clone();

        let (handle, retries) = retry_channel();
        let orchestrator = Arc::new(ReleaseOrchestrator::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            handle,
            policy,
        ));
        let escrow = Arc::new(EscrowService::new(
            store.clone(),
            gateway.clone(),
            orchestrator,
            1_000,
        ));
        let ingestor = WebhookIngestor::new(SECRET.to_string(), store, escrow.clone());

        Self {
            ledger,
            gateway,
            notifier,
            escrow,
            ingestor,
            retries,
        }
    }

    fn orchestrator(&self) -> Arc<ReleaseOrchestrator> {
        self.escrow.orchestrator().clone()
    }

    async fn deliver(&self, body: serde_json::Value) -> Result<IngestOutcome, WebhookError> {
        let raw = serde_json::to_vec(&body).unwrap();
        let sig = signature::sign(SECRET, &raw).unwrap();
        self.ingestor.receive(&raw, Some(&sig)).await
    }

    async fn register_account(&self) {
        self.escrow
            .register_payout_account(
                &provider(),
                BankDetails {
                    account_name: "Ada Provider".into(),
                    account_number: "0123456789".into(),
                    bank_code: "058".into(),
                },
            )
            .await
            .unwrap();
    }

    /// CONFIRMED booking of `total_minor`
    async fn confirmed(&self, total_minor: i64) -> BookingId {
        let snapshot = self
            .escrow
            .create_booking(
                &client(),
                CreateBooking {
                    provider_id: PROVIDER_ID,
                    service_id: 7,
                    scheduled_date: chrono::Utc::now() + chrono::Duration::days(2),
                    duration_minutes: 120,
                    total_amount: Amount::from_minor(total_minor),
                    address: "12 Marina Road".into(),
                },
            )
            .await
            .unwrap();
        let id = snapshot.booking.id;
        self.escrow.accept_booking(&provider(), id).await.unwrap();
        id
    }

    /// Online payment charged and escrowed; returns the payment
    async fn escrowed(&self, total_minor: i64) -> (BookingId, Payment) {
        let id = self.confirmed(total_minor).await;
        let charge = self
            .escrow
            .initiate_payment(&client(), id, PaymentMethod::Online)
            .await
            .unwrap();
        let outcome = self
            .deliver(charge_success("evt_charge_1", charge.reference(), total_minor))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Processed { .. }));
        (id, self.payment(id).await)
    }

    /// Escrowed booking in AWAITING_CONFIRMATION
    async fn awaiting_confirmation(&self, total_minor: i64) -> (BookingId, Payment) {
        let (id, payment) = self.escrowed(total_minor).await;
        self.escrow.start_job(&provider(), id).await.unwrap();
        self.escrow.complete_job(&provider(), id).await.unwrap();
        (id, payment)
    }

    async fn booking_status(&self, id: BookingId) -> BookingStatus {
        self.ledger.booking(id).await.unwrap().unwrap().status
    }

    async fn payment(&self, id: BookingId) -> Payment {
        self.ledger.payment_for_booking(id).await.unwrap().unwrap()
    }

    async fn payout(&self, id: BookingId) -> Payout {
        let payment = self.payment(id).await;
        self.ledger.payout_for_payment(payment.id).await.unwrap().unwrap()
    }
}

fn charge_success(id: &str, reference: &str, amount: i64) -> serde_json::Value {
    json!({
        "id": id,
        "event": "charge.success",
        "data": {"reference": reference, "status": "success", "amount": amount}
    })
}

fn transfer_event(
    id: &str,
    event: &str,
    payout: &Payout,
    transfer_code: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "event": event,
        "data": {
            "reference": payout.transfer_key(),
            "transfer_code": transfer_code,
            "amount": payout.amount.minor()
        }
    })
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// Happy paths
// ============================================================================

#[tokio::test]
async fn test_online_booking_end_to_end() {
    let h = Harness::new();
    h.register_account().await;

    // 500.00 with a 10% fee: 450.00 to the provider
    let (id, payment) = h.awaiting_confirmation(50_000).await;
    assert_eq!(payment.status, PaymentStatus::Escrow);
    assert_eq!(payment.escrow_amount.minor(), 45_000);
    assert_eq!(payment.platform_fee.minor(), 5_000);
    assert!(payment.paid_at.is_some());

    let snapshot = h.escrow.confirm_completion(&client(), id).await.unwrap();
    assert_eq!(snapshot.booking.status, BookingStatus::Completed);
    assert!(matches!(
        snapshot.release,
        Some(ReleaseOutcome::TransferSubmitted { .. })
    ));
    assert_eq!(
        snapshot.payment.as_ref().unwrap().status,
        PaymentStatus::ProcessingRelease
    );

    let transfers = h.gateway.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount.minor(), 45_000);
    assert_eq!(transfers[0].recipient_code, "RCP_0123456789");
    assert_eq!(h.gateway.recipient_count(), 1);

    let payout = h.payout(id).await;
    assert_eq!(payout.status, PayoutStatus::Processing);
    assert_eq!(payout.attempts, 1);
    let code = payout.transfer_reference.clone().unwrap();

    let outcome = h
        .deliver(transfer_event("evt_trf_1", "transfer.success", &payout, &code))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Processed { .. }));

    let payment = h.payment(id).await;
    assert_eq!(payment.status, PaymentStatus::Released);
    assert_eq!(
        payment.escrow_amount.minor() + payment.platform_fee.minor(),
        payment.amount.minor()
    );
    let payout = h.payout(id).await;
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(h.booking_status(id).await, BookingStatus::Completed);
    assert_eq!(h.notifier.alert_count(), 0);
}

#[tokio::test]
async fn test_cash_booking_end_to_end() {
    let h = Harness::new();
    let id = h.confirmed(20_000).await;

    let charge = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Cash)
        .await
        .unwrap();
    assert!(charge.authorization_url().is_none());
    assert_eq!(h.booking_status(id).await, BookingStatus::PendingExecution);
    assert_eq!(h.payment(id).await.status, PaymentStatus::CashPending);

    h.escrow.start_job(&provider(), id).await.unwrap();
    h.escrow.complete_job(&provider(), id).await.unwrap();

    // No completion before the provider has the cash
    let err = h.escrow.confirm_completion(&client(), id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");

    h.escrow.confirm_cash_received(&provider(), id).await.unwrap();
    assert_eq!(h.payment(id).await.status, PaymentStatus::CashReceived);

    let snapshot = h.escrow.confirm_completion(&client(), id).await.unwrap();
    assert_eq!(snapshot.booking.status, BookingStatus::Completed);

    let err = h.escrow.verify_cash(&client(), id).await.unwrap_err();
    assert!(matches!(err, EscrowError::Forbidden(_)));

    let snapshot = h.escrow.verify_cash(&admin(), id).await.unwrap();
    assert!(matches!(
        snapshot.release,
        Some(ReleaseOutcome::CashSettled { .. })
    ));
    assert_eq!(snapshot.payment.unwrap().status, PaymentStatus::CashVerified);
    assert_eq!(snapshot.payout.unwrap().status, PayoutStatus::Completed);
    assert_eq!(h.gateway.charge_count(), 0);
    assert_eq!(h.gateway.transfer_count(), 0);

    // Verifying twice is a no-op
    let again = h.escrow.verify_cash(&admin(), id).await.unwrap();
    assert!(matches!(again.release, Some(ReleaseOutcome::Released { .. })));
    assert_eq!(again.payment.unwrap().status, PaymentStatus::CashVerified);
}

/// Cash booking with the payment arranged, still PENDING_EXECUTION
async fn cash_booking(h: &Harness) -> BookingId {
    let id = h.confirmed(20_000).await;
    h.escrow
        .initiate_payment(&client(), id, PaymentMethod::Cash)
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn test_cash_received_only_after_job_starts() {
    let h = Harness::new();
    let id = cash_booking(&h).await;

    let err = h
        .escrow
        .confirm_cash_received(&provider(), id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_BOOKING_STATUS");
    assert_eq!(h.payment(id).await.status, PaymentStatus::CashPending);

    // The booking can still start, and cash is taken from there
    h.escrow.start_job(&provider(), id).await.unwrap();
    assert_eq!(h.booking_status(id).await, BookingStatus::InProgress);
    h.escrow.confirm_cash_received(&provider(), id).await.unwrap();
    assert_eq!(h.payment(id).await.status, PaymentStatus::CashReceived);

    h.escrow.complete_job(&provider(), id).await.unwrap();
    let snapshot = h.escrow.confirm_completion(&client(), id).await.unwrap();
    assert_eq!(snapshot.booking.status, BookingStatus::Completed);
}

#[tokio::test]
async fn test_cash_verification_waits_for_client_confirmation() {
    let h = Harness::new();
    let id = cash_booking(&h).await;
    h.escrow.start_job(&provider(), id).await.unwrap();
    h.escrow.confirm_cash_received(&provider(), id).await.unwrap();

    let err = h.escrow.verify_cash(&admin(), id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_BOOKING_STATUS");

    h.escrow.complete_job(&provider(), id).await.unwrap();
    let err = h.escrow.verify_cash(&admin(), id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_BOOKING_STATUS");

    let payment = h.payment(id).await;
    assert_eq!(payment.status, PaymentStatus::CashReceived);
    assert!(h.ledger.payout_for_payment(payment.id).await.unwrap().is_none());

    h.escrow.confirm_completion(&client(), id).await.unwrap();
    let snapshot = h.escrow.verify_cash(&admin(), id).await.unwrap();
    assert!(matches!(
        snapshot.release,
        Some(ReleaseOutcome::CashSettled { .. })
    ));
    assert_eq!(snapshot.payment.unwrap().status, PaymentStatus::CashVerified);
}

#[tokio::test]
async fn test_initiate_payment_is_idempotent() {
    let h = Harness::new();
    let id = h.confirmed(10_000).await;

    let first = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap();
    let second = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap();

    assert_eq!(first.reference(), second.reference());
    assert_eq!(first.payment_id(), second.payment_id());
    assert!(first.reference().starts_with("PAY-"));
    assert_eq!(h.gateway.charge_count(), 1);
}

#[tokio::test]
async fn test_charge_retry_after_gateway_failure() {
    let h = Harness::new();
    let id = h.confirmed(10_000).await;

    h.gateway
        .set_fail_charge(Some(GatewayError::Unavailable("502".into())));
    let err = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Gateway(_)));
    // The reference was persisted before the call
    let pending = h.payment(id).await;
    assert_eq!(pending.status, PaymentStatus::Pending);
    assert!(pending.authorization_url.is_none());

    h.gateway.set_fail_charge(None);
    let retried = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap();
    assert_eq!(retried.reference(), pending.gateway_reference);
    assert!(retried.authorization_url().is_some());
}

// ============================================================================
// Webhook idempotency
// ============================================================================

#[tokio::test]
async fn test_duplicate_charge_success_applies_once() {
    let h = Harness::new();
    let id = h.confirmed(30_000).await;
    let charge = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap();
    let event = charge_success("evt_dup", charge.reference(), 30_000);

    let first = h.deliver(event.clone()).await.unwrap();
    assert!(matches!(first, IngestOutcome::Processed { .. }));
    let after_first = h.payment(id).await;

    let second = h.deliver(event).await.unwrap();
    assert!(matches!(second, IngestOutcome::Duplicate { .. }));
    let after_second = h.payment(id).await;
    assert_eq!(after_first.version, after_second.version);
    assert_eq!(after_first.updated_at, after_second.updated_at);

    // Same charge under a new event id: no legal transition, acknowledged
    let third = h
        .deliver(charge_success("evt_other", charge.reference(), 30_000))
        .await
        .unwrap();
    assert!(matches!(third, IngestOutcome::Ignored { .. }));
    assert_eq!(h.payment(id).await.version, after_first.version);
    assert_eq!(h.booking_status(id).await, BookingStatus::PendingExecution);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries() {
    let h = Arc::new(Harness::new());
    let id = h.confirmed(30_000).await;
    let charge = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap();
    let event = charge_success("evt_race", charge.reference(), 30_000);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        let event = event.clone();
        tasks.push(tokio::spawn(async move { h.deliver(event).await }));
    }
    let mut processed = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            IngestOutcome::Processed { .. } => processed += 1,
            IngestOutcome::Duplicate { .. } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(processed, 1);
    assert_eq!(h.payment(id).await.status, PaymentStatus::Escrow);
    assert_eq!(h.booking_status(id).await, BookingStatus::PendingExecution);
}

#[tokio::test]
async fn test_bad_signature_changes_nothing() {
    let h = Harness::new();
    let id = h.confirmed(30_000).await;
    let charge = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap();
    let forged_event = charge_success("evt_forged", charge.reference(), 30_000);
    let raw = serde_json::to_vec(&forged_event).unwrap();
    let forged = signature::sign("not-the-secret", &raw).unwrap();

    assert_eq!(
        h.ingestor.receive(&raw, Some(&forged)).await,
        Err(WebhookError::BadSignature)
    );
    assert_eq!(
        h.ingestor.receive(&raw, None).await,
        Err(WebhookError::MissingSignature)
    );
    assert_eq!(h.payment(id).await.status, PaymentStatus::Pending);
    assert!(h.ledger.webhook_event("evt_forged").await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_payload_recorded() {
    let h = Harness::new();
    let raw = b"{not json".to_vec();
    let sig = signature::sign(SECRET, &raw).unwrap();

    let err = h.ingestor.receive(&raw, Some(&sig)).await.unwrap_err();
    assert!(matches!(err, WebhookError::Malformed(_)));

    let stored = h
        .ledger
        .webhook_event(&body_event_id(&raw))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.outcome, WebhookOutcome::Malformed);
}

#[tokio::test]
async fn test_amount_mismatch_ignored_with_alert() {
    let h = Harness::new();
    let id = h.confirmed(30_000).await;
    let charge = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap();

    let outcome = h
        .deliver(charge_success("evt_short", charge.reference(), 100))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Ignored { .. }));
    assert_eq!(h.payment(id).await.status, PaymentStatus::Pending);
    assert_eq!(h.notifier.alert_count(), 1);
}

#[tokio::test]
async fn test_handler_failure_then_redelivery() {
    let h = Harness::new();
    let id = h.confirmed(30_000).await;
    let charge = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap();
    let event = charge_success("evt_flaky", charge.reference(), 30_000);

    h.ledger.fail_next_commits(1);
    let err = h.deliver(event.clone()).await.unwrap_err();
    assert!(matches!(err, WebhookError::Processing(_)));
    assert_eq!(h.payment(id).await.status, PaymentStatus::Pending);
    let stored = h.ledger.webhook_event("evt_flaky").await.unwrap().unwrap();
    assert_eq!(stored.outcome, WebhookOutcome::Failed);
    assert_eq!(stored.failures, 1);

    let outcome = h.deliver(event).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Processed { .. }));
    assert_eq!(h.payment(id).await.status, PaymentStatus::Escrow);
}

// ============================================================================
// State machine integrity
// ============================================================================

#[tokio::test]
async fn test_illegal_transition_leaves_state_unchanged() {
    let h = Harness::new();
    let id = h.confirmed(10_000).await;
    let before = h.ledger.booking(id).await.unwrap().unwrap();

    // No payment yet: cannot start or confirm
    let err = h.escrow.start_job(&provider(), id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
    let err = h.escrow.confirm_completion(&client(), id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");

    let after = h.ledger.booking(id).await.unwrap().unwrap();
    assert_eq!(before.status, after.status);
    assert_eq!(before.version, after.version);
    assert_eq!(before.updated_at, after.updated_at);
}

#[tokio::test]
async fn test_actions_check_ownership() {
    let h = Harness::new();
    let id = h.confirmed(10_000).await;
    let stranger = Actor::new(9_999, Role::Provider);

    let err = h.escrow.start_job(&stranger, id).await.unwrap_err();
    assert!(matches!(err, EscrowError::Forbidden(_)));
    let err = h.escrow.cancel_booking(&provider(), id).await.unwrap_err();
    assert!(matches!(err, EscrowError::Forbidden(_)));
    let err = h.escrow.get_booking(&stranger, id).await.unwrap_err();
    assert!(matches!(err, EscrowError::Forbidden(_)));
}

#[tokio::test]
async fn test_cancel_abandons_pending_payment() {
    let h = Harness::new();
    let id = h.confirmed(10_000).await;
    let charge = h
        .escrow
        .initiate_payment(&client(), id, PaymentMethod::Online)
        .await
        .unwrap();

    let snapshot = h.escrow.cancel_booking(&client(), id).await.unwrap();
    assert_eq!(snapshot.booking.status, BookingStatus::Cancelled);
    assert_eq!(snapshot.payment.unwrap().status, PaymentStatus::Failed);

    // Money captured after abandonment is flagged for a manual refund
    let outcome = h
        .deliver(charge_success("evt_late", charge.reference(), 10_000))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Ignored { .. }));
    assert_eq!(h.payment(id).await.status, PaymentStatus::Failed);
    assert_eq!(h.notifier.alert_count(), 1);
}

// ============================================================================
// Release saga
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_release_pays_once() {
    let h = Harness::new();
    h.register_account().await;
    let (_, payment) = h.awaiting_confirmation(50_000).await;
    h.gateway.set_transfer_delay(Duration::from_millis(20));

    let orchestrator = h.orchestrator();
    let payment_id = payment.id;
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(
            async move { orchestrator.release(payment_id, None).await },
        ));
    }

    let mut payout_ids: Vec<PayoutId> = Vec::new();
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        payout_ids.push(outcome.payout_id());
    }
    payout_ids.dedup();
    assert_eq!(payout_ids.len(), 1);
    assert_eq!(h.gateway.transfer_count(), 1);
}

#[tokio::test]
async fn test_confirm_twice_is_noop() {
    let h = Harness::new();
    h.register_account().await;
    let (id, _) = h.awaiting_confirmation(50_000).await;

    h.escrow.confirm_completion(&client(), id).await.unwrap();
    let err = h.escrow.confirm_completion(&client(), id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");

    let payment = h.payment(id).await;
    let again = h.orchestrator().release(payment.id, None).await.unwrap();
    assert!(matches!(again, ReleaseOutcome::InFlight { .. }));
    assert_eq!(h.gateway.transfer_count(), 1);
}

#[tokio::test]
async fn test_retry_bound_then_permanent_failure() {
    let mut h = Harness::new();
    h.register_account().await;
    let (id, _) = h.awaiting_confirmation(50_000).await;
    h.gateway
        .set_fail_transfer(Some(GatewayError::Unavailable("503".into())));

    let (_, idle) = retry_channel();
    let receiver = std::mem::replace(&mut h.retries, idle);
    RetryEngine::new(receiver, h.orchestrator()).spawn();

    let snapshot = h.escrow.confirm_completion(&client(), id).await.unwrap();
    assert!(matches!(
        snapshot.release,
        Some(ReleaseOutcome::RetryScheduled { attempt: 1, .. })
    ));

    let ledger = h.ledger.clone();
    let payment_id = snapshot.payment.unwrap().id;
    wait_for(|| {
        let ledger = ledger.clone();
        async move {
            ledger
                .payout_for_payment(payment_id)
                .await
                .unwrap()
                .is_some_and(|p| p.permanently_failed)
        }
    })
    .await;

    let payout = h.payout(id).await;
    assert_eq!(payout.status, PayoutStatus::Failed);
    assert_eq!(payout.attempts, 3);
    assert!(payout.last_error.unwrap().contains("TRANSFER_PERMANENTLY_FAILED"));
    assert_eq!(h.gateway.transfer_count(), 3);
    assert_eq!(h.notifier.failed_count(), 1);
    // The money is still held for manual handling
    assert_eq!(h.payment(id).await.status, PaymentStatus::Escrow);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let outcome = h.orchestrator().drive(payout.id).await.unwrap();
    assert!(matches!(outcome, ReleaseOutcome::PermanentlyFailed { .. }));
    assert_eq!(h.gateway.transfer_count(), 3);
}

#[tokio::test]
async fn test_rejected_transfer_not_retried() {
    let mut h = Harness::new();
    h.register_account().await;
    let (id, _) = h.awaiting_confirmation(50_000).await;
    h.gateway
        .set_fail_transfer(Some(GatewayError::Rejected("account closed".into())));

    let snapshot = h.escrow.confirm_completion(&client(), id).await.unwrap();
    assert!(matches!(
        snapshot.release,
        Some(ReleaseOutcome::PermanentlyFailed { .. })
    ));
    assert!(h.retries.try_recv().is_none());
    assert_eq!(h.gateway.transfer_count(), 1);
    assert_eq!(h.notifier.failed_count(), 1);
}

#[tokio::test]
async fn test_transfer_failed_webhook_schedules_retry() {
    let mut h = Harness::new();
    h.register_account().await;
    let (id, _) = h.awaiting_confirmation(50_000).await;
    h.escrow.confirm_completion(&client(), id).await.unwrap();

    let first = h.payout(id).await;
    let code = first.transfer_reference.clone().unwrap();
    let outcome = h
        .deliver(transfer_event("evt_fail_1", "transfer.failed", &first, &code))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Processed { .. }));

    let failed = h.payout(id).await;
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert!(!failed.permanently_failed);
    assert!(failed.next_retry_at.is_some());
    assert_eq!(h.payment(id).await.status, PaymentStatus::Escrow);
    let request = h.retries.try_recv().unwrap();
    assert_eq!(request.payout_id, first.id);
    assert_eq!(request.attempt, 1);

    // Second attempt uses a fresh idempotency key
    let outcome = h.orchestrator().drive(first.id).await.unwrap();
    assert!(matches!(outcome, ReleaseOutcome::TransferSubmitted { .. }));
    let transfers = h.gateway.transfers();
    assert_eq!(transfers.len(), 2);
    assert_eq!(transfers[0].reference, format!("{}-1", first.id));
    assert_eq!(transfers[1].reference, format!("{}-2", first.id));

    // A failure report for the superseded attempt changes nothing
    let outcome = h
        .deliver(transfer_event("evt_fail_old", "transfer.failed", &first, &code))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Ignored { .. }));
    assert_eq!(h.payout(id).await.status, PayoutStatus::Processing);
}

#[tokio::test]
async fn test_timeout_retry_reuses_transfer_key() {
    let mut h = Harness::new();
    h.register_account().await;
    let (id, _) = h.awaiting_confirmation(50_000).await;
    h.gateway
        .set_fail_transfer(Some(GatewayError::Timeout("30s".into())));

    let snapshot = h.escrow.confirm_completion(&client(), id).await.unwrap();
    assert!(matches!(
        snapshot.release,
        Some(ReleaseOutcome::RetryScheduled { attempt: 1, .. })
    ));
    assert!(h.retries.try_recv().is_some());
    let failed = h.payout(id).await;
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.transfer_seq, 1);

    // The first transfer may have gone through; the retry must collapse onto it
    h.gateway.set_fail_transfer(None);
    let outcome = h.orchestrator().drive(failed.id).await.unwrap();
    assert!(matches!(outcome, ReleaseOutcome::TransferSubmitted { .. }));

    let key = format!("{}-1", failed.id);
    let references: Vec<_> = h
        .gateway
        .transfers()
        .into_iter()
        .map(|t| t.reference)
        .collect();
    assert_eq!(references, vec![key.clone(), key]);
    assert_eq!(h.payout(id).await.attempts, 2);
}

#[tokio::test]
async fn test_failure_report_after_timeout_retires_key() {
    let mut h = Harness::new();
    h.register_account().await;
    let (id, _) = h.awaiting_confirmation(50_000).await;
    h.gateway
        .set_fail_transfer(Some(GatewayError::Unavailable("503".into())));
    h.escrow.confirm_completion(&client(), id).await.unwrap();
    assert!(h.retries.try_recv().is_some());

    let failed = h.payout(id).await;
    let outcome = h
        .deliver(transfer_event("evt_fail_t", "transfer.failed", &failed, "TRF_unknown"))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Processed { .. }));

    let retired = h.payout(id).await;
    assert_eq!(retired.status, PayoutStatus::Failed);
    assert!(!retired.permanently_failed);
    assert_eq!(retired.transfer_seq, 2);
    assert_eq!(retired.attempts, 1);

    h.gateway.set_fail_transfer(None);
    h.orchestrator().drive(failed.id).await.unwrap();
    let transfers = h.gateway.transfers();
    assert_eq!(transfers.len(), 2);
    assert_eq!(transfers[0].reference, format!("{}-1", failed.id));
    assert_eq!(transfers[1].reference, format!("{}-2", failed.id));
}

#[tokio::test]
async fn test_late_success_after_failover() {
    let h = Harness::new();
    h.register_account().await;
    let (id, _) = h.awaiting_confirmation(50_000).await;
    h.escrow.confirm_completion(&client(), id).await.unwrap();

    let first = h.payout(id).await;
    let code = first.transfer_reference.clone().unwrap();
    h.deliver(transfer_event("evt_f", "transfer.failed", &first, &code))
        .await
        .unwrap();
    assert_eq!(h.payment(id).await.status, PaymentStatus::Escrow);

    // The money moved after all
    let outcome = h
        .deliver(transfer_event("evt_s", "transfer.success", &first, &code))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Processed { .. }));
    assert_eq!(h.payment(id).await.status, PaymentStatus::Released);
    assert_eq!(h.payout(id).await.status, PayoutStatus::Completed);

    let outcome = h.orchestrator().drive(first.id).await.unwrap();
    assert!(matches!(outcome, ReleaseOutcome::Released { .. }));
    assert_eq!(h.gateway.transfer_count(), 1);
}

// ============================================================================
// Disputes
// ============================================================================

#[tokio::test]
async fn test_dispute_resolved_as_release() {
    let h = Harness::new();
    h.register_account().await;
    let (id, _) = h.awaiting_confirmation(50_000).await;

    let snapshot = h
        .escrow
        .file_dispute(&client(), id, "work left unfinished")
        .await
        .unwrap();
    assert_eq!(snapshot.booking.status, BookingStatus::Disputed);
    assert_eq!(
        snapshot.booking.dispute_reason.as_deref(),
        Some("work left unfinished")
    );

    let err = h.escrow.confirm_completion(&client(), id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
    let err = h
        .escrow
        .resolve_dispute(&client(), id, DisputeResolution::Release)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Forbidden(_)));

    let snapshot = h
        .escrow
        .resolve_dispute(&admin(), id, DisputeResolution::Release)
        .await
        .unwrap();
    assert_eq!(
        snapshot.booking.dispute_resolution,
        Some(DisputeResolution::Release)
    );
    assert!(matches!(
        snapshot.release,
        Some(ReleaseOutcome::TransferSubmitted { .. })
    ));
    assert_eq!(h.gateway.transfer_count(), 1);

    let err = h
        .escrow
        .resolve_dispute(&admin(), id, DisputeResolution::Refund)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_dispute_resolved_as_refund() {
    let h = Harness::new();
    h.register_account().await;
    let (id, _) = h.escrowed(50_000).await;
    h.escrow.start_job(&provider(), id).await.unwrap();

    h.escrow
        .file_dispute(&provider(), id, "client not present")
        .await
        .unwrap();
    let snapshot = h
        .escrow
        .resolve_dispute(&admin(), id, DisputeResolution::Refund)
        .await
        .unwrap();

    assert_eq!(snapshot.payment.unwrap().status, PaymentStatus::Refunded);
    assert!(snapshot.payout.is_none());
    assert_eq!(h.gateway.transfer_count(), 0);
}

#[tokio::test]
async fn test_dispute_holds_pending_retry() {
    let mut h = Harness::new();
    h.register_account().await;
    let (id, _) = h.awaiting_confirmation(50_000).await;
    h.gateway
        .set_fail_transfer(Some(GatewayError::Timeout("30s".into())));
    h.escrow.confirm_completion(&client(), id).await.unwrap();
    assert!(h.retries.try_recv().is_some());

    // Completed bookings may still be disputed
    h.escrow
        .file_dispute(&client(), id, "damaged furniture")
        .await
        .unwrap();
    h.gateway.set_fail_transfer(None);

    let payout = h.payout(id).await;
    let outcome = h.orchestrator().drive(payout.id).await.unwrap();
    assert!(matches!(outcome, ReleaseOutcome::OnHold { .. }));
    assert_eq!(h.gateway.transfer_count(), 1);

    let snapshot = h
        .escrow
        .resolve_dispute(&admin(), id, DisputeResolution::Release)
        .await
        .unwrap();
    assert!(matches!(
        snapshot.release,
        Some(ReleaseOutcome::TransferSubmitted { .. })
    ));
    assert_eq!(h.gateway.transfer_count(), 2);
}

// ============================================================================
// Recovery
// ============================================================================

fn eager_recovery() -> RecoveryConfig {
    RecoveryConfig {
        scan_interval_secs: 1,
        stale_threshold_secs: 0,
        batch_size: 10,
    }
}

#[tokio::test]
async fn test_recovery_after_missing_payout_account() {
    let h = Harness::new();
    let (id, _) = h.awaiting_confirmation(50_000).await;

    let snapshot = h.escrow.confirm_completion(&client(), id).await.unwrap();
    assert!(matches!(
        snapshot.release,
        Some(ReleaseOutcome::RecipientPending { .. })
    ));
    assert_eq!(h.payment(id).await.status, PaymentStatus::ProcessingRelease);
    assert_eq!(h.notifier.alert_count(), 1);
    assert_eq!(h.gateway.transfer_count(), 0);

    h.register_account().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let worker = RecoveryWorker::new(h.orchestrator(), eager_recovery());
    assert_eq!(worker.scan_and_recover().await.unwrap(), 1);
    assert_eq!(h.gateway.transfer_count(), 1);
    assert!(h.payout(id).await.transfer_reference.is_some());

    // Submitted transfers wait for their webhook
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(worker.scan_and_recover().await.unwrap(), 0);
    assert_eq!(h.gateway.transfer_count(), 1);
}

#[tokio::test]
async fn test_recovery_resumes_interrupted_attempt() {
    let h = Harness::new();
    h.register_account().await;
    let (id, payment) = h.awaiting_confirmation(50_000).await;

    // Crash between claiming the attempt and calling the gateway
    let payout = Payout::for_payment(&payment, PROVIDER_ID).unwrap();
    let claimed = payout.begin_attempt("RCP_0123456789");
    let started = payment
        .apply(crate::payment::PaymentEvent::ReleaseStarted)
        .unwrap();
    h.ledger
        .commit(
            LedgerWrite::new()
                .update_payment(started)
                .insert_payout(claimed),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let worker = RecoveryWorker::new(h.orchestrator(), eager_recovery());
    assert_eq!(worker.scan_and_recover().await.unwrap(), 1);

    // Same attempt, same idempotency key
    let transfers = h.gateway.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].reference, format!("{}-1", payout.id));
    assert_eq!(h.payout(id).await.attempts, 1);
}
