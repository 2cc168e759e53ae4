//! Crate-level error
//!
//! Aggregates the module errors and maps each to a stable API code and an
//! HTTP status. Gateway and infrastructure details stay in the logs; callers
//! only ever see [`EscrowError::user_message`].

use thiserror::Error;

use crate::booking::BookingError;
use crate::core_types::UserId;
use crate::gateway::GatewayError;
use crate::ledger::LedgerError;
use crate::money::MoneyError;
use crate::payment::PaymentError;

/// Generic text shown for gateway/infrastructure failures
pub const SUPPORT_MESSAGE: &str = "Payment could not be completed, please contact support";

#[derive(Error, Debug)]
pub enum EscrowError {
    // === Validation ===
    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Invalid amount: {0}")]
    Money(#[from] MoneyError),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    // === Access ===
    #[error("Missing or invalid actor")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    // === Lookup ===
    #[error("{0} not found")]
    NotFound(String),

    #[error("Provider {0} has no payout account")]
    PayoutAccountMissing(UserId),

    // === Infrastructure ===
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        EscrowError::NotFound(format!("{} {}", what, id))
    }

    /// Stable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::Booking(BookingError::InvalidTransition { .. }) => "INVALID_TRANSITION",
            EscrowError::Booking(BookingError::StaleState(_)) => "STALE_STATE",
            EscrowError::Payment(e) => match e {
                PaymentError::InvalidTransition { .. } => "INVALID_TRANSITION",
                PaymentError::InvalidAmount | PaymentError::Money(_) => "INVALID_AMOUNT",
                PaymentError::InvalidBookingStatus(_) => "INVALID_BOOKING_STATUS",
                PaymentError::InvalidPaymentState(_) => "INVALID_PAYMENT_STATE",
            },
            EscrowError::Money(_) => "INVALID_AMOUNT",
            EscrowError::InvalidInput(_) => "INVALID_INPUT",
            EscrowError::Unauthorized => "UNAUTHORIZED",
            EscrowError::Forbidden(_) => "FORBIDDEN",
            EscrowError::NotFound(_) => "NOT_FOUND",
            EscrowError::PayoutAccountMissing(_) => "PAYOUT_ACCOUNT_MISSING",
            EscrowError::Ledger(e) => match e {
                LedgerError::NotFound { .. } => "NOT_FOUND",
                LedgerError::Conflict(_) => "CONFLICT",
                LedgerError::StaleState { .. } => "STALE_STATE",
                LedgerError::AlreadyProcessed(_) => "ALREADY_PROCESSED",
                LedgerError::Database(_) => "DATABASE_ERROR",
                LedgerError::Corrupt(_) => "DATA_CORRUPTION",
            },
            EscrowError::Gateway(e) => e.code(),
            EscrowError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            EscrowError::Unauthorized => 401,
            EscrowError::Forbidden(_) => 403,
            EscrowError::NotFound(_) => 404,
            EscrowError::Money(_) | EscrowError::InvalidInput(_) => 400,
            EscrowError::Payment(PaymentError::InvalidAmount | PaymentError::Money(_)) => 400,
            EscrowError::Booking(_) | EscrowError::Payment(_) => 409,
            EscrowError::PayoutAccountMissing(_) => 422,
            EscrowError::Ledger(e) => match e {
                LedgerError::NotFound { .. } => 404,
                LedgerError::Conflict(_) | LedgerError::StaleState { .. } => 409,
                LedgerError::AlreadyProcessed(_) => 200,
                LedgerError::Database(_) if e.is_transient() => 503,
                LedgerError::Database(_) | LedgerError::Corrupt(_) => 500,
            },
            EscrowError::Gateway(GatewayError::Timeout(_)) => 504,
            EscrowError::Gateway(_) => 502,
            EscrowError::Internal(_) => 500,
        }
    }

    /// Message safe to show an end user
    pub fn user_message(&self) -> String {
        match self {
            EscrowError::Gateway(_) | EscrowError::Internal(_) => SUPPORT_MESSAGE.to_string(),
            EscrowError::Ledger(
                LedgerError::Database(_)
                | LedgerError::Corrupt(_)
                | LedgerError::AlreadyProcessed(_),
            ) => SUPPORT_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    /// Optimistic-concurrency loss; reload and retry
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            EscrowError::Ledger(LedgerError::StaleState { .. })
                | EscrowError::Booking(BookingError::StaleState(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{BookingEvent, BookingStatus};
    use crate::payment::PaymentStatus;

    #[test]
    fn test_error_codes() {
        let err = EscrowError::from(BookingError::InvalidTransition {
            from: BookingStatus::Pending,
            event: BookingEvent::ClientConfirm,
            reason: "no such transition",
        });
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert_eq!(err.http_status(), 409);

        let err = EscrowError::from(PaymentError::InvalidAmount);
        assert_eq!(err.code(), "INVALID_AMOUNT");
        assert_eq!(err.http_status(), 400);

        let err = EscrowError::from(PaymentError::InvalidPaymentState(PaymentStatus::Pending));
        assert_eq!(err.code(), "INVALID_PAYMENT_STATE");
    }

    #[test]
    fn test_gateway_details_hidden_from_users() {
        let err = EscrowError::from(GatewayError::Rejected("account 0123 blocked".into()));
        assert_eq!(err.user_message(), SUPPORT_MESSAGE);
        assert!(err.to_string().contains("0123"));
        assert_eq!(err.http_status(), 502);

        let err = EscrowError::from(GatewayError::Timeout("30s".into()));
        assert_eq!(err.http_status(), 504);
    }

    #[test]
    fn test_validation_message_is_actionable() {
        let err = EscrowError::from(PaymentError::InvalidBookingStatus(BookingStatus::Pending));
        assert!(err.user_message().contains("PENDING"));
    }

    #[test]
    fn test_stale_detection() {
        let err = EscrowError::from(LedgerError::StaleState {
            entity: "booking",
            id: "b1".into(),
            expected: 3,
        });
        assert!(err.is_stale());
        assert_eq!(err.http_status(), 409);
    }
}
