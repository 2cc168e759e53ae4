//! Payment / Escrow State Machine
//!
//! Pure transition function; the caller commits the result together with
//! the booking and payout rows it affects.

use std::fmt;

use thiserror::Error;

use super::state::PaymentStatus;
use crate::booking::BookingStatus;
use crate::money::MoneyError;

/// Events that drive the payment FSM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentEvent {
    /// `charge.success` verified by the gateway
    ChargeSucceeded,
    /// `charge.failed` from the gateway
    ChargeFailed,
    /// Booking cancelled before the charge completed
    Abandoned,
    /// Release Orchestrator created the payout
    ReleaseStarted,
    /// `transfer.success` from the gateway
    TransferSucceeded,
    /// Transfer failed (webhook or synchronous); escrow is held again
    TransferFailed,
    /// Dispute resolved in the client's favour
    Refund,
    /// Provider confirmed cash in hand
    CashReceived,
    /// Platform verified the cash settlement
    CashVerified,
}

impl PaymentEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEvent::ChargeSucceeded => "CHARGE_SUCCEEDED",
            PaymentEvent::ChargeFailed => "CHARGE_FAILED",
            PaymentEvent::Abandoned => "ABANDONED",
            PaymentEvent::ReleaseStarted => "RELEASE_STARTED",
            PaymentEvent::TransferSucceeded => "TRANSFER_SUCCEEDED",
            PaymentEvent::TransferFailed => "TRANSFER_FAILED",
            PaymentEvent::Refund => "REFUND",
            PaymentEvent::CashReceived => "CASH_RECEIVED",
            PaymentEvent::CashVerified => "CASH_VERIFIED",
        }
    }
}

impl fmt::Display for PaymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment FSM and charge validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Invalid payment transition: {event} not allowed from {from}")]
    InvalidTransition {
        from: PaymentStatus,
        event: PaymentEvent,
    },

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Booking status {0} does not accept payment")]
    InvalidBookingStatus(BookingStatus),

    #[error("Payment in state {0} cannot be released")]
    InvalidPaymentState(PaymentStatus),

    #[error("Invalid fee split: {0}")]
    Money(#[from] MoneyError),
}

/// Compute the next payment status
///
/// Terminal states never regress: every event from RELEASED, REFUNDED,
/// FAILED or CASH_VERIFIED is rejected.
pub fn transition(
    current: PaymentStatus,
    event: PaymentEvent,
) -> Result<PaymentStatus, PaymentError> {
    use PaymentEvent as E;
    use PaymentStatus as S;

    match (current, event) {
        (S::Pending, E::ChargeSucceeded) => Ok(S::Escrow),
        (S::Pending, E::ChargeFailed | E::Abandoned) => Ok(S::Failed),
        (S::Escrow, E::ReleaseStarted) => Ok(S::ProcessingRelease),
        (S::Escrow, E::Refund) => Ok(S::Refunded),
        (S::ProcessingRelease, E::TransferSucceeded) => Ok(S::Released),
        (S::ProcessingRelease, E::TransferFailed) => Ok(S::Escrow),
        (S::CashPending, E::CashReceived) => Ok(S::CashReceived),
        (S::CashReceived, E::CashVerified) => Ok(S::CashVerified),
        _ => Err(PaymentError::InvalidTransition {
            from: current,
            event,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_happy_path() {
        let s = transition(PaymentStatus::Pending, PaymentEvent::ChargeSucceeded).unwrap();
        assert_eq!(s, PaymentStatus::Escrow);
        let s = transition(s, PaymentEvent::ReleaseStarted).unwrap();
        assert_eq!(s, PaymentStatus::ProcessingRelease);
        let s = transition(s, PaymentEvent::TransferSucceeded).unwrap();
        assert_eq!(s, PaymentStatus::Released);
    }

    #[test]
    fn test_transfer_failure_returns_to_escrow() {
        assert_eq!(
            transition(PaymentStatus::ProcessingRelease, PaymentEvent::TransferFailed).unwrap(),
            PaymentStatus::Escrow
        );
    }

    #[test]
    fn test_cash_track() {
        let s = transition(PaymentStatus::CashPending, PaymentEvent::CashReceived).unwrap();
        let s = transition(s, PaymentEvent::CashVerified).unwrap();
        assert_eq!(s, PaymentStatus::CashVerified);
        assert!(transition(PaymentStatus::CashPending, PaymentEvent::CashVerified).is_err());
    }

    #[test]
    fn test_terminal_states_never_regress() {
        let events = [
            PaymentEvent::ChargeSucceeded,
            PaymentEvent::ChargeFailed,
            PaymentEvent::Abandoned,
            PaymentEvent::ReleaseStarted,
            PaymentEvent::TransferSucceeded,
            PaymentEvent::TransferFailed,
            PaymentEvent::Refund,
            PaymentEvent::CashReceived,
            PaymentEvent::CashVerified,
        ];
        for from in [
            PaymentStatus::Released,
            PaymentStatus::Refunded,
            PaymentStatus::Failed,
            PaymentStatus::CashVerified,
        ] {
            for event in events {
                assert_eq!(
                    transition(from, event),
                    Err(PaymentError::InvalidTransition { from, event })
                );
            }
        }
    }

    #[test]
    fn test_duplicate_charge_success_rejected() {
        assert!(transition(PaymentStatus::Escrow, PaymentEvent::ChargeSucceeded).is_err());
    }
}
