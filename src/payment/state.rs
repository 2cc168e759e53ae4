//! Payment and Payout State Definitions
//!
//! Status names match the strings stored in the `payments.status` and
//! `payouts.status` columns. Any other stored value is a schema violation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error for a status string that is not in the closed set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

/// How the client settles the booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Charged through the gateway and held in escrow
    Online,
    /// Paid to the provider in hand; bypasses the gateway
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Online => "ONLINE",
            PaymentMethod::Cash => "CASH",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(PaymentMethod::Online),
            "CASH" => Ok(PaymentMethod::Cash),
            _ => Err(UnknownStatus {
                kind: "payment method",
                value: s.to_string(),
            }),
        }
    }
}

/// Payment / escrow states
///
/// ```text
/// PENDING → ESCROW → PROCESSING_RELEASE → RELEASED
///    ↓        ↓  ↖__________↙ (transfer failed)
///  FAILED  REFUNDED
///
/// CASH_PENDING → CASH_RECEIVED → CASH_VERIFIED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Charge initialized, awaiting gateway confirmation
    Pending,
    /// Verified charge; funds held by the platform (a.k.a. HELD_IN_ESCROW)
    Escrow,
    /// Payout created and transfer in flight
    ProcessingRelease,
    /// Terminal: funds reached the provider
    Released,
    /// Terminal: escrow returned to the client
    Refunded,
    /// Terminal: charge failed or was abandoned
    Failed,
    /// Cash booking, nothing collected yet
    CashPending,
    /// Provider confirmed cash in hand
    CashReceived,
    /// Terminal: platform verified the cash settlement
    CashVerified,
}

impl PaymentStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Released
                | PaymentStatus::Refunded
                | PaymentStatus::Failed
                | PaymentStatus::CashVerified
        )
    }

    /// Funds are secured for the job (online escrow or cash commitment)
    #[inline]
    pub fn is_secured(&self) -> bool {
        matches!(self, PaymentStatus::Escrow | PaymentStatus::CashPending)
    }

    /// Check if this status belongs to the cash track
    #[inline]
    pub fn is_cash_track(&self) -> bool {
        matches!(
            self,
            PaymentStatus::CashPending | PaymentStatus::CashReceived | PaymentStatus::CashVerified
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Escrow => "ESCROW",
            PaymentStatus::ProcessingRelease => "PROCESSING_RELEASE",
            PaymentStatus::Released => "RELEASED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::CashPending => "CASH_PENDING",
            PaymentStatus::CashReceived => "CASH_RECEIVED",
            PaymentStatus::CashVerified => "CASH_VERIFIED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "ESCROW" | "HELD_IN_ESCROW" => Ok(PaymentStatus::Escrow),
            "PROCESSING_RELEASE" => Ok(PaymentStatus::ProcessingRelease),
            "RELEASED" => Ok(PaymentStatus::Released),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CASH_PENDING" => Ok(PaymentStatus::CashPending),
            "CASH_RECEIVED" => Ok(PaymentStatus::CashReceived),
            "CASH_VERIFIED" => Ok(PaymentStatus::CashVerified),
            _ => Err(UnknownStatus {
                kind: "payment",
                value: s.to_string(),
            }),
        }
    }
}

/// Payout states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    /// Created by the orchestrator, no transfer attempted yet
    Pending,
    /// Transfer attempt claimed (persist-before-call) or awaiting webhook
    Processing,
    /// Terminal: transfer confirmed by the gateway
    Completed,
    /// Last attempt failed; terminal only once `permanently_failed` is set
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::Processing => "PROCESSING",
            PayoutStatus::Completed => "COMPLETED",
            PayoutStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PayoutStatus::Pending),
            "PROCESSING" => Ok(PayoutStatus::Processing),
            "COMPLETED" => Ok(PayoutStatus::Completed),
            "FAILED" => Ok(PayoutStatus::Failed),
            _ => Err(UnknownStatus {
                kind: "payout",
                value: s.to_string(),
            }),
        }
    }
}
