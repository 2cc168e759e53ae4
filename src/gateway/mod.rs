//! Payment Gateway Client
//!
//! Outbound calls to the payment provider: initialize a charge, register a
//! transfer recipient, create a transfer. Provider errors are folded into
//! three kinds so callers can decide between retrying and giving up.

pub mod http;
#[cfg(any(test, feature = "sandbox-gateway"))]
pub mod sandbox;

pub use http::HttpGateway;
#[cfg(any(test, feature = "sandbox-gateway"))]
pub use sandbox::SandboxGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Amount;

/// Gateway failure taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No answer within the client timeout; outcome unknown
    #[error("Gateway timeout: {0}")]
    Timeout(String),

    /// Gateway refused the request; retrying the same request will not help
    #[error("Gateway rejected request: {0}")]
    Rejected(String),

    /// Transport failure or 5xx
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Timeout(_) => "GATEWAY_TIMEOUT",
            GatewayError::Rejected(_) => "GATEWAY_REJECTED",
            GatewayError::Unavailable(_) => "GATEWAY_UNAVAILABLE",
        }
    }

    /// Timeouts and outages go to the Retry Engine; rejections do not
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Unavailable(_))
    }
}

/// Hosted checkout session for a charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeSession {
    pub authorization_url: String,
    pub reference: String,
}

/// Provider bank account to register as a transfer recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
}

/// Outbound transfer to a registered recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub amount: Amount,
    pub recipient_code: String,
    /// Idempotency key; the gateway echoes it back in transfer webhooks
    pub reference: String,
    pub reason: String,
}

/// Payment gateway seam
///
/// Implementations must treat `reference` values as idempotency keys.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Gateway name for logging
    fn name(&self) -> &'static str;

    async fn initialize_charge(
        &self,
        amount: Amount,
        reference: &str,
    ) -> Result<ChargeSession, GatewayError>;

    /// Returns the recipient code
    async fn create_recipient(&self, bank: &BankDetails) -> Result<String, GatewayError>;

    /// Returns the gateway's transfer code
    async fn create_transfer(&self, request: &TransferRequest) -> Result<String, GatewayError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(GatewayError::Timeout("30s".into()).is_retryable());
        assert!(GatewayError::Unavailable("502".into()).is_retryable());
        assert!(!GatewayError::Rejected("invalid account".into()).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::Timeout(String::new()).code(), "GATEWAY_TIMEOUT");
        assert_eq!(GatewayError::Rejected(String::new()).code(), "GATEWAY_REJECTED");
    }
}
