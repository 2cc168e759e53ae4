//! Booking State Machine
//!
//! Pure transition function over (current status, event, payment guard).
//! Performs no I/O; callers persist the result inside the same ledger
//! transaction as any co-occurring payment or payout write.

use thiserror::Error;

use super::state::{BookingEvent, BookingStatus};
use crate::core_types::BookingId;
use crate::payment::{PaymentMethod, PaymentStatus};

/// Booking FSM errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("Invalid transition: {event} not allowed from {from} ({reason})")]
    InvalidTransition {
        from: BookingStatus,
        event: BookingEvent,
        reason: &'static str,
    },

    #[error("Booking {0} was modified concurrently; reload and retry")]
    StaleState(BookingId),
}

/// Payment facts the guards depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentGuard {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
}

/// Everything outside the booking row that a guard may inspect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardContext {
    pub payment: Option<PaymentGuard>,
    pub dispute_resolved: bool,
}

impl GuardContext {
    pub fn without_payment() -> Self {
        Self::default()
    }

    pub fn with_payment(method: PaymentMethod, status: PaymentStatus) -> Self {
        Self {
            payment: Some(PaymentGuard { method, status }),
            dispute_resolved: false,
        }
    }

    pub fn resolved(mut self, resolved: bool) -> Self {
        self.dispute_resolved = resolved;
        self
    }

    fn payment_status(&self) -> Option<PaymentStatus> {
        self.payment.map(|p| p.status)
    }
}

/// Compute the next booking status
///
/// Returns `InvalidTransition` for anything outside the transition table;
/// the caller must not mutate state in that case.
pub fn transition(
    current: BookingStatus,
    event: BookingEvent,
    ctx: &GuardContext,
) -> Result<BookingStatus, BookingError> {
    use BookingEvent as E;
    use BookingStatus as S;

    let reject = |reason: &'static str| BookingError::InvalidTransition {
        from: current,
        event,
        reason,
    };

    match (current, event) {
        (S::Pending, E::ProviderAccept) => Ok(S::Confirmed),
        (S::Pending, E::ProviderReject) => Ok(S::Cancelled),

        (S::Pending | S::Confirmed, E::ClientCancel) => Ok(S::Cancelled),

        (S::Confirmed, E::PaymentEscrowed) => match ctx.payment_status() {
            Some(status) if status.is_secured() => Ok(S::PendingExecution),
            _ => Err(reject("payment is not secured")),
        },

        // Cash bookings may start before cash changes hands; online bookings
        // need confirmed escrow.
        (S::PendingExecution, E::ProviderStart) => match ctx.payment_status() {
            Some(status) if status.is_secured() => Ok(S::InProgress),
            _ => Err(reject("payment must be in escrow or cash pending")),
        },

        (S::InProgress, E::ProviderComplete) => Ok(S::AwaitingConfirmation),

        (S::AwaitingConfirmation, E::ClientConfirm) => match ctx.payment {
            Some(PaymentGuard {
                method: PaymentMethod::Cash,
                status: PaymentStatus::CashReceived,
            }) => Ok(S::Completed),
            Some(PaymentGuard {
                method: PaymentMethod::Cash,
                ..
            }) => Err(reject("cash has not been received")),
            Some(PaymentGuard {
                method: PaymentMethod::Online,
                status: PaymentStatus::Escrow,
            }) => Ok(S::Completed),
            _ => Err(reject("no escrowed payment to release")),
        },

        (S::InProgress | S::AwaitingConfirmation | S::Completed, E::DisputeFiled) => {
            Ok(S::Disputed)
        }

        (S::Disputed, E::DisputeResolved) if !ctx.dispute_resolved => Ok(S::Disputed),
        (S::Disputed, E::DisputeResolved) => Err(reject("dispute already resolved")),

        _ => Err(reject("no such transition")),
    }
}

/// Check legality without computing the next status
pub fn can_transition(current: BookingStatus, event: BookingEvent, ctx: &GuardContext) -> bool {
    transition(current, event, ctx).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online(status: PaymentStatus) -> GuardContext {
        GuardContext::with_payment(PaymentMethod::Online, status)
    }

    fn cash(status: PaymentStatus) -> GuardContext {
        GuardContext::with_payment(PaymentMethod::Cash, status)
    }

    #[test]
    fn test_happy_path_online() {
        let none = GuardContext::without_payment();
        let escrow = online(PaymentStatus::Escrow);

        let s = transition(BookingStatus::Pending, BookingEvent::ProviderAccept, &none).unwrap();
        assert_eq!(s, BookingStatus::Confirmed);
        let s = transition(s, BookingEvent::PaymentEscrowed, &escrow).unwrap();
        assert_eq!(s, BookingStatus::PendingExecution);
        let s = transition(s, BookingEvent::ProviderStart, &escrow).unwrap();
        assert_eq!(s, BookingStatus::InProgress);
        let s = transition(s, BookingEvent::ProviderComplete, &escrow).unwrap();
        assert_eq!(s, BookingStatus::AwaitingConfirmation);
        let s = transition(s, BookingEvent::ClientConfirm, &escrow).unwrap();
        assert_eq!(s, BookingStatus::Completed);
    }

    #[test]
    fn test_start_requires_escrow_for_online() {
        let err = transition(
            BookingStatus::PendingExecution,
            BookingEvent::ProviderStart,
            &online(PaymentStatus::Pending),
        )
        .unwrap_err();
        assert!(matches!(err, BookingError::InvalidTransition { .. }));

        assert!(
            transition(
                BookingStatus::PendingExecution,
                BookingEvent::ProviderStart,
                &GuardContext::without_payment(),
            )
            .is_err()
        );
    }

    #[test]
    fn test_cash_may_start_before_cash_received() {
        let s = transition(
            BookingStatus::PendingExecution,
            BookingEvent::ProviderStart,
            &cash(PaymentStatus::CashPending),
        )
        .unwrap();
        assert_eq!(s, BookingStatus::InProgress);
    }

    #[test]
    fn test_cash_confirm_requires_cash_received() {
        assert!(
            transition(
                BookingStatus::AwaitingConfirmation,
                BookingEvent::ClientConfirm,
                &cash(PaymentStatus::CashPending),
            )
            .is_err()
        );
        assert_eq!(
            transition(
                BookingStatus::AwaitingConfirmation,
                BookingEvent::ClientConfirm,
                &cash(PaymentStatus::CashReceived),
            )
            .unwrap(),
            BookingStatus::Completed
        );
    }

    #[test]
    fn test_confirm_only_from_awaiting_confirmation() {
        let escrow = online(PaymentStatus::Escrow);
        for from in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::PendingExecution,
            BookingStatus::InProgress,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::Disputed,
        ] {
            let err = transition(from, BookingEvent::ClientConfirm, &escrow).unwrap_err();
            assert_eq!(
                err,
                BookingError::InvalidTransition {
                    from,
                    event: BookingEvent::ClientConfirm,
                    reason: "no such transition",
                }
            );
        }
    }

    #[test]
    fn test_cancel_only_before_execution() {
        let none = GuardContext::without_payment();
        assert!(can_transition(BookingStatus::Pending, BookingEvent::ClientCancel, &none));
        assert!(can_transition(BookingStatus::Confirmed, BookingEvent::ClientCancel, &none));
        for from in [
            BookingStatus::PendingExecution,
            BookingStatus::InProgress,
            BookingStatus::AwaitingConfirmation,
            BookingStatus::Completed,
        ] {
            assert!(!can_transition(from, BookingEvent::ClientCancel, &none));
        }
    }

    #[test]
    fn test_dispute_sources() {
        let ctx = online(PaymentStatus::Escrow);
        for from in [
            BookingStatus::InProgress,
            BookingStatus::AwaitingConfirmation,
            BookingStatus::Completed,
        ] {
            assert_eq!(
                transition(from, BookingEvent::DisputeFiled, &ctx).unwrap(),
                BookingStatus::Disputed
            );
        }
        for from in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::PendingExecution,
            BookingStatus::Cancelled,
            BookingStatus::Disputed,
        ] {
            assert!(!can_transition(from, BookingEvent::DisputeFiled, &ctx));
        }
    }

    #[test]
    fn test_dispute_resolves_once() {
        let ctx = online(PaymentStatus::Escrow);
        assert_eq!(
            transition(BookingStatus::Disputed, BookingEvent::DisputeResolved, &ctx).unwrap(),
            BookingStatus::Disputed
        );
        assert!(
            transition(
                BookingStatus::Disputed,
                BookingEvent::DisputeResolved,
                &ctx.resolved(true)
            )
            .is_err()
        );
    }

    #[test]
    fn test_terminal_states_reject_everything_else() {
        let ctx = online(PaymentStatus::Escrow);
        for event in [
            BookingEvent::ProviderAccept,
            BookingEvent::ProviderReject,
            BookingEvent::PaymentEscrowed,
            BookingEvent::ProviderStart,
            BookingEvent::ProviderComplete,
            BookingEvent::ClientConfirm,
            BookingEvent::ClientCancel,
            BookingEvent::DisputeFiled,
        ] {
            assert!(!can_transition(BookingStatus::Cancelled, event, &ctx));
        }
    }
}
