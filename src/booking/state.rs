//! Booking FSM State and Event Definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::payment::UnknownStatus;

/// Booking lifecycle states
///
/// ```text
/// PENDING → CONFIRMED → PENDING_EXECUTION → IN_PROGRESS → AWAITING_CONFIRMATION → COMPLETED
///    ↓          ↓                               ↓                  ↓                  ↓
/// CANCELLED  CANCELLED                       DISPUTED           DISPUTED           DISPUTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    PendingExecution,
    InProgress,
    AwaitingConfirmation,
    Completed,
    Cancelled,
    Disputed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::PendingExecution => "PENDING_EXECUTION",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Disputed => "DISPUTED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "PENDING_EXECUTION" => Ok(BookingStatus::PendingExecution),
            "IN_PROGRESS" => Ok(BookingStatus::InProgress),
            "AWAITING_CONFIRMATION" => Ok(BookingStatus::AwaitingConfirmation),
            "COMPLETED" => Ok(BookingStatus::Completed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            "DISPUTED" => Ok(BookingStatus::Disputed),
            _ => Err(UnknownStatus {
                kind: "booking",
                value: s.to_string(),
            }),
        }
    }
}

/// Events that drive the booking FSM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingEvent {
    ProviderAccept,
    ProviderReject,
    PaymentEscrowed,
    ProviderStart,
    ProviderComplete,
    ClientConfirm,
    ClientCancel,
    DisputeFiled,
    DisputeResolved,
}

impl BookingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingEvent::ProviderAccept => "PROVIDER_ACCEPT",
            BookingEvent::ProviderReject => "PROVIDER_REJECT",
            BookingEvent::PaymentEscrowed => "PAYMENT_ESCROWED",
            BookingEvent::ProviderStart => "PROVIDER_START",
            BookingEvent::ProviderComplete => "PROVIDER_COMPLETE",
            BookingEvent::ClientConfirm => "CLIENT_CONFIRM",
            BookingEvent::ClientCancel => "CLIENT_CANCEL",
            BookingEvent::DisputeFiled => "DISPUTE_FILED",
            BookingEvent::DisputeResolved => "DISPUTE_RESOLVED",
        }
    }
}

impl fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Admin decision closing a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeResolution {
    /// Escrow goes to the provider
    Release,
    /// Escrow goes back to the client
    Refund,
}

impl DisputeResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeResolution::Release => "RELEASE",
            DisputeResolution::Refund => "REFUND",
        }
    }
}

impl FromStr for DisputeResolution {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RELEASE" => Ok(DisputeResolution::Release),
            "REFUND" => Ok(DisputeResolution::Refund),
            _ => Err(UnknownStatus {
                kind: "dispute resolution",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        let states = [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::PendingExecution,
            BookingStatus::InProgress,
            BookingStatus::AwaitingConfirmation,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::Disputed,
        ];
        for state in states {
            assert_eq!(state.as_str().parse::<BookingStatus>().unwrap(), state);
        }
    }

    #[test]
    fn test_unknown_status() {
        assert!("ACCEPTED".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&BookingStatus::AwaitingConfirmation).unwrap();
        assert_eq!(json, "\"AWAITING_CONFIRMATION\"");
        let event: BookingEvent = serde_json::from_str("\"CLIENT_CONFIRM\"").unwrap();
        assert_eq!(event, BookingEvent::ClientConfirm);
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!(
            "refund".parse::<DisputeResolution>().unwrap(),
            DisputeResolution::Refund
        );
        assert!("split".parse::<DisputeResolution>().is_err());
    }
}
