//! Sandbox gateway
//!
//! In-process stand-in for the payment provider, selected by
//! `gateway.mode: sandbox`. Charges and transfers are idempotent on their
//! reference, and failures can be scripted per call.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

use super::{BankDetails, ChargeSession, GatewayError, PaymentGateway, TransferRequest};
use crate::money::Amount;

#[derive(Default)]
struct State {
    charges: HashMap<String, Amount>,
    transfers: HashMap<String, (String, TransferRequest)>,
    transfer_calls: usize,
    scripted_transfer_failures: VecDeque<GatewayError>,
    scripted_recipient_failures: VecDeque<GatewayError>,
}

/// Deterministic [`PaymentGateway`] with scripted failures
pub struct SandboxGateway {
    checkout_base: String,
    state: Mutex<State>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::with_checkout_base("https://sandbox.checkout.local")
    }

    pub fn with_checkout_base(base: &str) -> Self {
        Self {
            checkout_base: base.trim_end_matches('/').to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next transfer calls with these errors, in order
    pub fn script_transfer_failures(&self, errors: impl IntoIterator<Item = GatewayError>) {
        self.state().scripted_transfer_failures.extend(errors);
    }

    pub fn script_recipient_failures(&self, errors: impl IntoIterator<Item = GatewayError>) {
        self.state().scripted_recipient_failures.extend(errors);
    }

    /// Every `create_transfer` call, including failed and repeated ones
    pub fn transfer_calls(&self) -> usize {
        self.state().transfer_calls
    }

    /// Distinct transfers accepted
    pub fn transfers_accepted(&self) -> usize {
        self.state().transfers.len()
    }

    /// Transfer code previously issued for `reference`
    pub fn transfer_code(&self, reference: &str) -> Option<String> {
        self.state().transfers.get(reference).map(|(code, _)| code.clone())
    }

    fn short_hash(input: &str) -> String {
        let digest = Sha256::digest(input.as_bytes());
        hex::encode(&digest[..6]).to_uppercase()
    }
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn initialize_charge(
        &self,
        amount: Amount,
        reference: &str,
    ) -> Result<ChargeSession, GatewayError> {
        let mut state = self.state();
        match state.charges.get(reference) {
            Some(existing) if *existing != amount => {
                return Err(GatewayError::Rejected(format!(
                    "reference {} already used with a different amount",
                    reference
                )));
            }
            Some(_) => {}
            None => {
                state.charges.insert(reference.to_string(), amount);
            }
        }
        Ok(ChargeSession {
            authorization_url: format!("{}/{}", self.checkout_base, reference),
            reference: reference.to_string(),
        })
    }

    async fn create_recipient(&self, bank: &BankDetails) -> Result<String, GatewayError> {
        if let Some(err) = self.state().scripted_recipient_failures.pop_front() {
            return Err(err);
        }
        Ok(format!(
            "RCP_{}",
            Self::short_hash(&format!("{}:{}", bank.bank_code, bank.account_number))
        ))
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<String, GatewayError> {
        let mut state = self.state();
        state.transfer_calls += 1;

        if let Some(err) = state.scripted_transfer_failures.pop_front() {
            return Err(err);
        }
        if let Some((code, _)) = state.transfers.get(&request.reference) {
            return Ok(code.clone());
        }

        let code = format!("TRF_{}", Self::short_hash(&request.reference));
        info!(
            reference = %request.reference,
            transfer_code = %code,
            amount = %request.amount,
            "Sandbox transfer accepted"
        );
        state
            .transfers
            .insert(request.reference.clone(), (code.clone(), request.clone()));
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(reference: &str) -> TransferRequest {
        TransferRequest {
            amount: Amount::from_minor(45_000),
            recipient_code: "RCP_1".into(),
            reference: reference.into(),
            reason: "payout".into(),
        }
    }

    #[tokio::test]
    async fn test_transfer_idempotent_on_reference() {
        let gateway = SandboxGateway::new();
        let a = gateway.create_transfer(&transfer("P1-1")).await.unwrap();
        let b = gateway.create_transfer(&transfer("P1-1")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(gateway.transfers_accepted(), 1);
        assert_eq!(gateway.transfer_calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures_in_order() {
        let gateway = SandboxGateway::new();
        gateway.script_transfer_failures([
            GatewayError::Timeout("t".into()),
            GatewayError::Rejected("r".into()),
        ]);
        assert!(matches!(
            gateway.create_transfer(&transfer("P1-1")).await,
            Err(GatewayError::Timeout(_))
        ));
        assert!(matches!(
            gateway.create_transfer(&transfer("P1-2")).await,
            Err(GatewayError::Rejected(_))
        ));
        assert!(gateway.create_transfer(&transfer("P1-3")).await.is_ok());
    }

    #[tokio::test]
    async fn test_charge_reference_amount_pinned() {
        let gateway = SandboxGateway::new();
        let session = gateway
            .initialize_charge(Amount::from_minor(500), "R1")
            .await
            .unwrap();
        assert!(session.authorization_url.ends_with("/R1"));
        assert!(
            gateway
                .initialize_charge(Amount::from_minor(500), "R1")
                .await
                .is_ok()
        );
        assert!(
            gateway
                .initialize_charge(Amount::from_minor(600), "R1")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_recipient_code_stable() {
        let gateway = SandboxGateway::new();
        let bank = BankDetails {
            account_name: "Ada".into(),
            account_number: "0123456789".into(),
            bank_code: "058".into(),
        };
        let a = gateway.create_recipient(&bank).await.unwrap();
        let b = gateway.create_recipient(&bank).await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("RCP_"));
    }
}
