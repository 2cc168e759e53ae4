//! Release saga driver

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::ReleaseOutcome;
use crate::booking::{Booking, BookingStatus, DisputeResolution};
use crate::core_types::{PaymentId, PayoutId};
use crate::error::EscrowError;
use crate::gateway::{BankDetails, GatewayError, PaymentGateway, TransferRequest};
use crate::ledger::{LedgerError, LedgerStore, LedgerWrite};
use crate::notify::OpsNotifier;
use crate::payment::{
    Payment, PaymentError, PaymentEvent, PaymentMethod, PaymentStatus, Payout, PayoutStatus,
};
use crate::retry::{RetryHandle, RetryPolicy};

/// Payout failure to commit, plus what to do once it is committed
pub(crate) struct FailurePlan {
    pub payout: Payout,
    pub payment: Option<Payment>,
    /// `None` means permanent
    pub retry_in: Option<Duration>,
    pub reason: String,
}

impl FailurePlan {
    pub fn into_write(self, mut write: LedgerWrite) -> (LedgerWrite, Option<Duration>, String) {
        write = write.update_payout(self.payout);
        if let Some(payment) = self.payment {
            write = write.update_payment(payment);
        }
        (write, self.retry_in, self.reason)
    }
}

/// Sole writer of payouts
pub struct ReleaseOrchestrator {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn OpsNotifier>,
    retry: RetryHandle,
    policy: RetryPolicy,
}

impl ReleaseOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn OpsNotifier>,
        retry: RetryHandle,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifier,
            retry,
            policy,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn notifier(&self) -> &Arc<dyn OpsNotifier> {
        &self.notifier
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn load_payment(&self, id: PaymentId) -> Result<Payment, EscrowError> {
        self.ledger
            .payment(id)
            .await?
            .ok_or_else(|| EscrowError::not_found("payment", id))
    }

    /// Outcome for a payout that already exists (re-invocation no-op)
    pub(crate) fn existing_outcome(payout: &Payout) -> ReleaseOutcome {
        match payout.status {
            PayoutStatus::Completed => ReleaseOutcome::Released {
                payout_id: payout.id,
            },
            PayoutStatus::Failed if payout.permanently_failed => {
                ReleaseOutcome::PermanentlyFailed {
                    payout_id: payout.id,
                }
            }
            _ => ReleaseOutcome::InFlight {
                payout_id: payout.id,
            },
        }
    }

    /// Run the saga for `payment_id`
    ///
    /// `booking`, when given, is committed together with the payout creation
    /// (the client's confirmation or an admin's dispute resolution).
    pub async fn release(
        &self,
        payment_id: PaymentId,
        booking: Option<Booking>,
    ) -> Result<ReleaseOutcome, EscrowError> {
        let payment = self.load_payment(payment_id).await?;
        if let Some(payout) = self.ledger.payout_for_payment(payment.id).await? {
            debug!(payout_id = %payout.id, status = %payout.status, "Payout already exists");
            return Ok(Self::existing_outcome(&payout));
        }
        if !payment.is_releasable() {
            return Err(PaymentError::InvalidPaymentState(payment.status).into());
        }

        let provider_id = match &booking {
            Some(b) => b.provider_id,
            None => {
                self.ledger
                    .booking(payment.booking_id)
                    .await?
                    .ok_or_else(|| EscrowError::not_found("booking", payment.booking_id))?
                    .provider_id
            }
        };

        let (next_payment, payout) = match payment.method {
            PaymentMethod::Online => (
                payment.apply(PaymentEvent::ReleaseStarted)?,
                Payout::for_payment(&payment, provider_id)?,
            ),
            PaymentMethod::Cash => (
                payment.apply(PaymentEvent::CashVerified)?,
                Payout::for_payment(&payment, provider_id)?.complete(),
            ),
        };

        let mut write = LedgerWrite::new()
            .update_payment(next_payment)
            .insert_payout(payout);
        if let Some(booking) = booking {
            write = write.booking(booking);
        }

        let committed = match self.ledger.commit(write).await {
            Ok(committed) => committed,
            Err(e @ (LedgerError::Conflict(_) | LedgerError::StaleState { .. })) => {
                // Lost the race to a concurrent release of the same payment
                return match self.ledger.payout_for_payment(payment.id).await? {
                    Some(existing) => {
                        info!(payout_id = %existing.id, "Concurrent release won; no-op");
                        Ok(Self::existing_outcome(&existing))
                    }
                    None => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let payout = committed
            .payout
            .ok_or_else(|| EscrowError::Internal("payout missing from commit".to_string()))?;
        info!(
            payout_id = %payout.id,
            payment_id = %payment.id,
            booking_id = %payment.booking_id,
            amount = %payout.amount,
            method = %payment.method,
            "Payout created"
        );

        if payment.method == PaymentMethod::Cash {
            return Ok(ReleaseOutcome::CashSettled {
                payout_id: payout.id,
            });
        }

        self.drive(payout.id).await
    }

    /// Register the recipient and submit the transfer for an existing payout
    ///
    /// Also the entry point of the retry engine and the recovery worker.
    pub async fn drive(&self, payout_id: PayoutId) -> Result<ReleaseOutcome, EscrowError> {
        let payout = self
            .ledger
            .payout(payout_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("payout", payout_id))?;

        match payout.status {
            PayoutStatus::Completed => return Ok(ReleaseOutcome::Released { payout_id }),
            PayoutStatus::Failed if payout.permanently_failed => {
                return Ok(ReleaseOutcome::PermanentlyFailed { payout_id });
            }
            PayoutStatus::Processing if payout.transfer_reference.is_some() => {
                return Ok(ReleaseOutcome::InFlight { payout_id });
            }
            _ => {}
        }

        let payment = self.load_payment(payout.payment_id).await?;
        if !matches!(
            payment.status,
            PaymentStatus::Escrow | PaymentStatus::ProcessingRelease
        ) {
            return Err(PaymentError::InvalidPaymentState(payment.status).into());
        }

        let resuming = payout.status == PayoutStatus::Processing;
        if !resuming && self.held_by_dispute(&payment).await? {
            info!(payout_id = %payout.id, "Booking disputed; payout on hold");
            return Ok(ReleaseOutcome::OnHold { payout_id });
        }

        let recipient_code = match &payout.recipient_code {
            Some(code) => code.clone(),
            None => match self.ensure_recipient(&payout).await {
                Ok(code) => code,
                Err(e) => {
                    warn!(payout_id = %payout.id, error = %e, "Recipient registration failed");
                    if matches!(
                        e,
                        EscrowError::PayoutAccountMissing(_)
                            | EscrowError::Gateway(GatewayError::Rejected(_))
                    ) {
                        self.notifier.alert(
                            "payout recipient",
                            &format!("payout {}: {}", payout.id, e),
                        );
                    }
                    return Ok(ReleaseOutcome::RecipientPending {
                        payout_id,
                        reason: e.to_string(),
                    });
                }
            },
        };

        // Claim the attempt before calling the gateway
        if !resuming && self.policy.is_exhausted(payout.attempts) {
            let plan =
                self.plan_failure(&payout, &payment, "retry budget exhausted", false, false)?;
            return self.commit_failure(plan, LedgerWrite::new()).await;
        }

        let claimed = if resuming {
            payout.touch()
        } else {
            payout.begin_attempt(&recipient_code)
        };
        let mut write = LedgerWrite::new().update_payout(claimed);
        if payment.status == PaymentStatus::Escrow {
            write = write.update_payment(payment.apply(PaymentEvent::ReleaseStarted)?);
        }

        let committed = match self.ledger.commit(write).await {
            Ok(committed) => committed,
            Err(LedgerError::StaleState { .. }) => {
                debug!(payout_id = %payout_id, "Payout claimed by another driver");
                return Ok(ReleaseOutcome::InFlight { payout_id });
            }
            Err(e) => return Err(e.into()),
        };
        let payout = committed
            .payout
            .ok_or_else(|| EscrowError::Internal("payout missing from commit".to_string()))?;
        let payment = committed.payment.unwrap_or(payment);

        let request = TransferRequest {
            amount: payout.amount,
            recipient_code,
            reference: payout.transfer_key(),
            reason: format!("Escrow release for booking {}", payment.booking_id),
        };
        info!(
            payout_id = %payout.id,
            reference = %request.reference,
            attempt = payout.attempts,
            resuming,
            amount = %request.amount,
            "Calling gateway create_transfer"
        );

        match self.gateway.create_transfer(&request).await {
            Ok(transfer_code) => {
                let recorded = payout.record_transfer(transfer_code.clone());
                match self.ledger.commit(LedgerWrite::new().update_payout(recorded)).await {
                    Ok(_) => {
                        info!(
                            payout_id = %payout.id,
                            transfer_reference = %transfer_code,
                            "Transfer submitted; awaiting gateway confirmation"
                        );
                        Ok(ReleaseOutcome::TransferSubmitted {
                            payout_id,
                            transfer_reference: transfer_code,
                        })
                    }
                    Err(LedgerError::StaleState { .. }) => {
                        // The webhook finalized the payout first
                        let current = self
                            .ledger
                            .payout(payout_id)
                            .await?
                            .ok_or_else(|| EscrowError::not_found("payout", payout_id))?;
                        Ok(Self::existing_outcome(&current))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => {
                warn!(
                    payout_id = %payout.id,
                    attempt = payout.attempts,
                    error = %e,
                    "Transfer call failed"
                );
                // Only a rejection is a known outcome; a timeout may still have paid
                let definite = matches!(e, GatewayError::Rejected(_));
                let plan = self.plan_failure(
                    &payout,
                    &payment,
                    &e.to_string(),
                    e.is_retryable(),
                    definite,
                )?;
                match self.commit_failure(plan, LedgerWrite::new()).await {
                    Err(EscrowError::Ledger(LedgerError::StaleState { .. })) => {
                        let current = self
                            .ledger
                            .payout(payout_id)
                            .await?
                            .ok_or_else(|| EscrowError::not_found("payout", payout_id))?;
                        Ok(Self::existing_outcome(&current))
                    }
                    other => other,
                }
            }
        }
    }

    /// An open dispute, or one resolved as a refund, stops new transfer attempts
    async fn held_by_dispute(&self, payment: &Payment) -> Result<bool, EscrowError> {
        let booking = self
            .ledger
            .booking(payment.booking_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("booking", payment.booking_id))?;
        Ok(booking.status == BookingStatus::Disputed
            && booking.dispute_resolution != Some(DisputeResolution::Release))
    }

    /// Register the provider's recipient once and persist the code
    async fn ensure_recipient(&self, payout: &Payout) -> Result<String, EscrowError> {
        let account = self
            .ledger
            .provider_account(payout.provider_id)
            .await?
            .ok_or(EscrowError::PayoutAccountMissing(payout.provider_id))?;

        if let Some(code) = account.recipient_code {
            return Ok(code);
        }

        let code = self
            .gateway
            .create_recipient(&BankDetails {
                account_name: account.account_name,
                account_number: account.account_number,
                bank_code: account.bank_code,
            })
            .await?;

        let stored = self
            .ledger
            .set_recipient_code(payout.provider_id, &code)
            .await?;
        info!(
            provider_id = payout.provider_id,
            recipient_code = %stored,
            "Transfer recipient registered"
        );
        Ok(stored)
    }

    /// Decide between retry and permanent failure for the current attempt
    ///
    /// `definite` marks a transfer the gateway is known not to have made;
    /// only then does the next attempt move to a new idempotency key.
    pub(crate) fn plan_failure(
        &self,
        payout: &Payout,
        payment: &Payment,
        reason: &str,
        retryable: bool,
        definite: bool,
    ) -> Result<FailurePlan, EscrowError> {
        let permanent = !retryable || self.policy.is_exhausted(payout.attempts);
        let backoff_step = payout.attempts.saturating_sub(1).max(0) as u32;
        let retry_in = (!permanent).then(|| self.policy.delay_for(backoff_step));
        let next_retry_at =
            retry_in.map(|d| Utc::now() + chrono::Duration::milliseconds(d.as_millis() as i64));

        let payment = match payment.status {
            PaymentStatus::ProcessingRelease => Some(payment.apply(PaymentEvent::TransferFailed)?),
            _ => None,
        };

        let mut failed = payout.fail(reason, permanent, next_retry_at);
        if definite {
            failed = failed.retire_key();
        }

        Ok(FailurePlan {
            payout: failed,
            payment,
            retry_in,
            reason: reason.to_string(),
        })
    }

    /// Commit a failure (with whatever else `write` carries) and follow up
    pub(crate) async fn commit_failure(
        &self,
        plan: FailurePlan,
        write: LedgerWrite,
    ) -> Result<ReleaseOutcome, EscrowError> {
        let (write, retry_in, reason) = plan.into_write(write);
        let committed = self.ledger.commit(write).await?;
        let payout = committed
            .payout
            .ok_or_else(|| EscrowError::Internal("payout missing from commit".to_string()))?;

        Ok(self.follow_up_failure(&payout, retry_in, &reason))
    }

    fn follow_up_failure(
        &self,
        payout: &Payout,
        retry_in: Option<Duration>,
        reason: &str,
    ) -> ReleaseOutcome {
        match retry_in {
            Some(delay) => {
                self.retry.schedule(payout.id, payout.attempts, delay);
                ReleaseOutcome::RetryScheduled {
                    payout_id: payout.id,
                    attempt: payout.attempts,
                    retry_in: delay,
                }
            }
            None => {
                self.notifier.payout_failed(payout, reason);
                ReleaseOutcome::PermanentlyFailed {
                    payout_id: payout.id,
                }
            }
        }
    }
}
