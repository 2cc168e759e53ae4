//! Client, provider and admin actions
//!
//! Each action maps to exactly one state-machine event and returns the
//! resulting booking snapshot or a typed error.

use chrono::{DateTime, Utc};
use tracing::info;

use super::{Actor, BookingSnapshot, ChargeOutcome, EscrowService, Role};
use crate::booking::{Booking, BookingEvent, BookingStatus, DisputeResolution, NewBooking};
use crate::core_types::{BookingId, ServiceId, UserId};
use crate::error::EscrowError;
use crate::gateway::BankDetails;
use crate::ledger::{LedgerWrite, ProviderAccount};
use crate::money::{self, Amount};
use crate::payment::{
    Payment, PaymentError, PaymentEvent, PaymentMethod, PaymentStatus, PayoutStatus,
};
use crate::release::ReleaseOrchestrator;

/// Client's booking request; the platform fee is derived from config
#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub provider_id: UserId,
    pub service_id: ServiceId,
    pub scheduled_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub total_amount: Amount,
    pub address: String,
}

impl EscrowService {
    /// Apply a booking-only event and commit it
    async fn commit_booking_event(
        &self,
        booking: Booking,
        event: BookingEvent,
    ) -> Result<BookingSnapshot, EscrowError> {
        let payment = self.ledger.payment_for_booking(booking.id).await?;
        let next = booking.apply(event, &Self::guard_for(&booking, payment.as_ref()))?;

        let committed = self.ledger.commit(LedgerWrite::new().booking(next)).await?;
        let next = committed
            .booking
            .ok_or_else(|| EscrowError::Internal("booking missing from commit".to_string()))?;
        info!(
            booking_id = %next.id,
            event = %event,
            from = %booking.status,
            to = %next.status,
            "Booking transitioned"
        );
        self.snapshot(next, None).await
    }

    async fn payment_of(&self, booking: &Booking) -> Result<Payment, EscrowError> {
        self.ledger
            .payment_for_booking(booking.id)
            .await?
            .ok_or_else(|| EscrowError::not_found("payment for booking", booking.id))
    }

    pub async fn create_booking(
        &self,
        actor: &Actor,
        request: CreateBooking,
    ) -> Result<BookingSnapshot, EscrowError> {
        if actor.role != Role::Client {
            return Err(EscrowError::Forbidden("only clients may book"));
        }
        if request.duration_minutes <= 0 {
            return Err(EscrowError::InvalidInput(
                "duration_minutes must be positive".to_string(),
            ));
        }
        if request.provider_id == actor.user_id {
            return Err(EscrowError::InvalidInput(
                "cannot book your own service".to_string(),
            ));
        }

        let platform_fee = money::platform_fee(request.total_amount, self.fee_bps)?;
        let booking = Booking::create(NewBooking {
            client_id: actor.user_id,
            provider_id: request.provider_id,
            service_id: request.service_id,
            scheduled_date: request.scheduled_date,
            duration_minutes: request.duration_minutes,
            total_amount: request.total_amount,
            platform_fee,
            address: request.address,
        })?;
        self.ledger.insert_booking(&booking).await?;

        info!(
            booking_id = %booking.id,
            client_id = booking.client_id,
            provider_id = booking.provider_id,
            total = %booking.total_amount,
            fee = %booking.platform_fee,
            "Booking created"
        );
        Ok(BookingSnapshot {
            booking,
            payment: None,
            payout: None,
            release: None,
        })
    }

    pub async fn get_booking(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<BookingSnapshot, EscrowError> {
        let booking = self.load_booking(booking_id).await?;
        actor.require_party_to(&booking)?;
        self.snapshot(booking, None).await
    }

    pub async fn accept_booking(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<BookingSnapshot, EscrowError> {
        let booking = self.load_booking(booking_id).await?;
        actor.require_provider_of(&booking)?;
        self.commit_booking_event(booking, BookingEvent::ProviderAccept)
            .await
    }

    pub async fn reject_booking(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<BookingSnapshot, EscrowError> {
        let booking = self.load_booking(booking_id).await?;
        actor.require_provider_of(&booking)?;
        self.commit_booking_event(booking, BookingEvent::ProviderReject)
            .await
    }

    pub async fn start_job(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<BookingSnapshot, EscrowError> {
        let booking = self.load_booking(booking_id).await?;
        actor.require_provider_of(&booking)?;
        self.commit_booking_event(booking, BookingEvent::ProviderStart)
            .await
    }

    pub async fn complete_job(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<BookingSnapshot, EscrowError> {
        let booking = self.load_booking(booking_id).await?;
        actor.require_provider_of(&booking)?;
        self.commit_booking_event(booking, BookingEvent::ProviderComplete)
            .await
    }

    /// InitiatePayment
    pub async fn initiate_payment(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        method: PaymentMethod,
    ) -> Result<ChargeOutcome, EscrowError> {
        let booking = self.load_booking(booking_id).await?;
        actor.require_client_of(&booking)?;
        match method {
            PaymentMethod::Online => self.initialize_charge(&booking).await,
            PaymentMethod::Cash => self.commit_cash(&booking).await,
        }
    }

    /// ConfirmCompletion
    ///
    /// Online: the booking's COMPLETED status commits together with payout
    /// creation, then the transfer is submitted. Cash: completion only;
    /// the admin's cash verification settles the money.
    pub async fn confirm_completion(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<BookingSnapshot, EscrowError> {
        let booking = self.load_booking(booking_id).await?;
        actor.require_client_of(&booking)?;
        let payment = self.ledger.payment_for_booking(booking.id).await?;

        let next = booking.apply(
            BookingEvent::ClientConfirm,
            &Self::guard_for(&booking, payment.as_ref()),
        )?;
        let payment =
            payment.ok_or_else(|| EscrowError::not_found("payment for booking", booking.id))?;

        match payment.method {
            PaymentMethod::Online => {
                let outcome = self.orchestrator.release(payment.id, Some(next)).await?;
                info!(
                    booking_id = %booking.id,
                    payment_id = %payment.id,
                    outcome = ?outcome,
                    "Completion confirmed, release started"
                );
                let booking = self.load_booking(booking_id).await?;
                self.snapshot(booking, Some(outcome)).await
            }
            PaymentMethod::Cash => {
                let committed = self.ledger.commit(LedgerWrite::new().booking(next)).await?;
                let next = committed.booking.ok_or_else(|| {
                    EscrowError::Internal("booking missing from commit".to_string())
                })?;
                info!(booking_id = %next.id, "Cash booking completion confirmed");
                self.snapshot(next, None).await
            }
        }
    }

    /// CancelBooking
    ///
    /// A still-PENDING online payment is failed in the same commit.
    pub async fn cancel_booking(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<BookingSnapshot, EscrowError> {
        let booking = self.load_booking(booking_id).await?;
        actor.require_client_of(&booking)?;
        let payment = self.ledger.payment_for_booking(booking.id).await?;

        let next = booking.apply(
            BookingEvent::ClientCancel,
            &Self::guard_for(&booking, payment.as_ref()),
        )?;
        let mut write = LedgerWrite::new().booking(next);
        if let Some(payment) = &payment
            && payment.status == PaymentStatus::Pending
        {
            write = write.update_payment(payment.apply(PaymentEvent::Abandoned)?);
        }

        let committed = self.ledger.commit(write).await?;
        let next = committed
            .booking
            .ok_or_else(|| EscrowError::Internal("booking missing from commit".to_string()))?;
        info!(
            booking_id = %next.id,
            payment_abandoned = committed.payment.is_some(),
            "Booking cancelled"
        );
        self.snapshot(next, None).await
    }

    /// FileDispute (client or provider)
    pub async fn file_dispute(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        reason: &str,
    ) -> Result<BookingSnapshot, EscrowError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EscrowError::InvalidInput(
                "dispute reason is required".to_string(),
            ));
        }

        let booking = self.load_booking(booking_id).await?;
        if actor.is_admin() {
            return Err(EscrowError::Forbidden("admins resolve disputes, not file them"));
        }
        actor.require_party_to(&booking)?;

        let payment = self.ledger.payment_for_booking(booking.id).await?;
        let mut next = booking.apply(
            BookingEvent::DisputeFiled,
            &Self::guard_for(&booking, payment.as_ref()),
        )?;
        next.dispute_reason = Some(reason.to_string());

        let committed = self.ledger.commit(LedgerWrite::new().booking(next)).await?;
        let next = committed
            .booking
            .ok_or_else(|| EscrowError::Internal("booking missing from commit".to_string()))?;
        info!(
            booking_id = %next.id,
            filed_by = actor.user_id,
            role = %actor.role,
            "Dispute filed"
        );
        self.snapshot(next, None).await
    }

    /// ConfirmCashReceived (provider, or admin on their behalf)
    pub async fn confirm_cash_received(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<BookingSnapshot, EscrowError> {
        let booking = self.load_booking(booking_id).await?;
        if !actor.is_admin() {
            actor.require_provider_of(&booking)?;
        }
        let payment = self.payment_of(&booking).await?;
        if payment.method != PaymentMethod::Cash {
            return Err(PaymentError::InvalidPaymentState(payment.status).into());
        }
        // Cash is only taken once the job has started
        if !matches!(
            booking.status,
            BookingStatus::InProgress | BookingStatus::AwaitingConfirmation
        ) {
            return Err(PaymentError::InvalidBookingStatus(booking.status).into());
        }

        let received = payment.apply(PaymentEvent::CashReceived)?;
        // The unchanged booking row rides along as a version guard
        let write = LedgerWrite::new()
            .booking(booking.clone())
            .update_payment(received);
        let committed = self.ledger.commit(write).await?;
        info!(
            booking_id = %booking.id,
            payment_id = %payment.id,
            "Cash received"
        );

        let booking = committed.booking.unwrap_or(booking);
        self.snapshot(booking, None).await
    }

    /// VerifyCash (admin): runs the cash release path once the client has
    /// confirmed completion
    pub async fn verify_cash(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<BookingSnapshot, EscrowError> {
        actor.require_admin()?;
        let booking = self.load_booking(booking_id).await?;
        let payment = self.payment_of(&booking).await?;
        if payment.method != PaymentMethod::Cash {
            return Err(PaymentError::InvalidPaymentState(payment.status).into());
        }
        if booking.status != BookingStatus::Completed {
            return Err(PaymentError::InvalidBookingStatus(booking.status).into());
        }

        let outcome = self.orchestrator.release(payment.id, None).await?;
        info!(
            booking_id = %booking.id,
            payment_id = %payment.id,
            verified_by = actor.user_id,
            outcome = ?outcome,
            "Cash verified"
        );
        self.snapshot(booking, Some(outcome)).await
    }

    /// ResolveDispute (admin)
    ///
    /// `Release` pays the provider through the orchestrator. `Refund` marks an
    /// escrowed online payment REFUNDED and closes any failed payout; it is
    /// only possible while no transfer is pending or completed.
    pub async fn resolve_dispute(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        resolution: DisputeResolution,
    ) -> Result<BookingSnapshot, EscrowError> {
        actor.require_admin()?;
        let booking = self.load_booking(booking_id).await?;
        let payment = self.payment_of(&booking).await?;

        let mut next = booking.apply(
            BookingEvent::DisputeResolved,
            &Self::guard_for(&booking, Some(&payment)),
        )?;
        next.dispute_resolution = Some(resolution);
        let payout = self.ledger.payout_for_payment(payment.id).await?;

        let outcome = match resolution {
            DisputeResolution::Release => match payout {
                None => Some(self.orchestrator.release(payment.id, Some(next)).await?),
                Some(payout) => {
                    self.ledger.commit(LedgerWrite::new().booking(next)).await?;
                    if payout.is_in_flight() {
                        Some(self.orchestrator.drive(payout.id).await?)
                    } else {
                        Some(ReleaseOrchestrator::existing_outcome(&payout))
                    }
                }
            },
            DisputeResolution::Refund => {
                if payment.method != PaymentMethod::Online {
                    return Err(PaymentError::InvalidPaymentState(payment.status).into());
                }
                let mut write = LedgerWrite::new()
                    .booking(next)
                    .update_payment(payment.apply(PaymentEvent::Refund)?);
                match payout {
                    None => {}
                    Some(p) if p.status == PayoutStatus::Failed => {
                        write = write.update_payout(p.fail("refunded to client", true, None));
                    }
                    Some(_) => {
                        return Err(PaymentError::InvalidPaymentState(payment.status).into());
                    }
                }
                self.ledger.commit(write).await?;
                None
            }
        };

        info!(
            booking_id = %booking.id,
            payment_id = %payment.id,
            resolution = resolution.as_str(),
            resolved_by = actor.user_id,
            "Dispute resolved"
        );
        let booking = self.load_booking(booking_id).await?;
        self.snapshot(booking, outcome).await
    }

    /// Provider bank details used for payout recipient registration
    pub async fn register_payout_account(
        &self,
        actor: &Actor,
        bank: BankDetails,
    ) -> Result<ProviderAccount, EscrowError> {
        if actor.role != Role::Provider {
            return Err(EscrowError::Forbidden("only providers hold payout accounts"));
        }
        if bank.account_number.trim().is_empty() || bank.bank_code.trim().is_empty() {
            return Err(EscrowError::InvalidInput(
                "account_number and bank_code are required".to_string(),
            ));
        }

        let account = ProviderAccount {
            provider_id: actor.user_id,
            account_name: bank.account_name,
            account_number: bank.account_number,
            bank_code: bank.bank_code,
            recipient_code: None,
        };
        self.ledger.save_provider_account(&account).await?;
        info!(provider_id = actor.user_id, "Payout account registered");

        Ok(self
            .ledger
            .provider_account(actor.user_id)
            .await?
            .unwrap_or(account))
    }
}
