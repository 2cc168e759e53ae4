//! HTTP gateway client (reqwest)
//!
//! Speaks the common hosted-checkout REST dialect:
//! `POST /transaction/initialize`, `POST /transferrecipient`,
//! `POST /transfer`, bearer-authenticated with the secret key, every
//! response wrapped as `{status, message, data}`. Amounts go over the wire
//! in minor units.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{BankDetails, ChargeSession, GatewayError, PaymentGateway, TransferRequest};
use crate::config::GatewayConfig;
use crate::money::Amount;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Serialize)]
struct InitializeBody<'a> {
    amount: i64,
    reference: &'a str,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Serialize)]
struct RecipientBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    account_number: &'a str,
    bank_code: &'a str,
    currency: &'a str,
}

#[derive(Deserialize)]
struct RecipientData {
    recipient_code: String,
}

#[derive(Serialize)]
struct TransferBody<'a> {
    source: &'static str,
    amount: i64,
    recipient: &'a str,
    reference: &'a str,
    reason: &'a str,
    currency: &'a str,
}

#[derive(Deserialize)]
struct TransferData {
    transfer_code: String,
}

/// reqwest-backed [`PaymentGateway`]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    callback_url: Option<String>,
    currency: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                GatewayError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            callback_url: config.callback_url.clone(),
            currency: config.currency.clone(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Gateway request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let envelope: Envelope<R> = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(GatewayError::Unavailable(format!(
                    "Unreadable gateway response: {}",
                    e
                )));
            }
            Err(_) => return Err(classify_status(status, "no response body")),
        };

        if !status.is_success() {
            return Err(classify_status(status, &envelope.message));
        }
        if !envelope.status {
            warn!(path, message = %envelope.message, "Gateway declined request");
            return Err(GatewayError::Rejected(envelope.message));
        }

        envelope
            .data
            .ok_or_else(|| GatewayError::Unavailable("Gateway response missing data".to_string()))
    }
}

fn map_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(e.to_string())
    } else {
        GatewayError::Unavailable(e.to_string())
    }
}

/// Map a non-2xx status to the error taxonomy
fn classify_status(status: StatusCode, message: &str) -> GatewayError {
    let detail = format!("HTTP {}: {}", status.as_u16(), message);
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GatewayError::Timeout(detail),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::Unavailable(detail),
        s if s.is_server_error() => GatewayError::Unavailable(detail),
        _ => GatewayError::Rejected(detail),
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn initialize_charge(
        &self,
        amount: Amount,
        reference: &str,
    ) -> Result<ChargeSession, GatewayError> {
        let data: InitializeData = self
            .post(
                "/transaction/initialize",
                &InitializeBody {
                    amount: amount.minor(),
                    reference,
                    currency: &self.currency,
                    callback_url: self.callback_url.as_deref(),
                },
            )
            .await?;

        Ok(ChargeSession {
            authorization_url: data.authorization_url,
            reference: data.reference,
        })
    }

    async fn create_recipient(&self, bank: &BankDetails) -> Result<String, GatewayError> {
        let data: RecipientData = self
            .post(
                "/transferrecipient",
                &RecipientBody {
                    kind: "nuban",
                    name: &bank.account_name,
                    account_number: &bank.account_number,
                    bank_code: &bank.bank_code,
                    currency: &self.currency,
                },
            )
            .await?;
        Ok(data.recipient_code)
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<String, GatewayError> {
        let data: TransferData = self
            .post(
                "/transfer",
                &TransferBody {
                    source: "balance",
                    amount: request.amount.minor(),
                    recipient: &request.recipient_code,
                    reference: &request.reference,
                    reason: &request.reason,
                    currency: &self.currency,
                },
            )
            .await?;
        Ok(data.transfer_code)
    }
}
