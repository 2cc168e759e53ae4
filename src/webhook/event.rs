//! Gateway event payloads
//!
//! `{id, event, data: {reference, status, amount, recipient_code, transfer_code, ...}}`
//! with `amount` in minor units. When the gateway omits `id`, a stable id is
//! derived from the event type and references so redeliveries collapse onto
//! one row.

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::WebhookError;
use crate::money::Amount;

/// Prefix of derived event ids
pub const DERIVED_ID_PREFIX: &str = "drv_";

/// Event types the engine acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEventKind {
    ChargeSuccess,
    ChargeFailed,
    TransferSuccess,
    TransferFailed,
    TransferReversed,
    /// Recorded and acknowledged, never acted on
    Other(String),
}

impl GatewayEventKind {
    pub fn parse(event: &str) -> Self {
        match event {
            "charge.success" => GatewayEventKind::ChargeSuccess,
            "charge.failed" => GatewayEventKind::ChargeFailed,
            "transfer.success" => GatewayEventKind::TransferSuccess,
            "transfer.failed" => GatewayEventKind::TransferFailed,
            "transfer.reversed" => GatewayEventKind::TransferReversed,
            other => GatewayEventKind::Other(other.to_string()),
        }
    }

    /// Known kinds must carry `data.reference`
    fn needs_reference(&self) -> bool {
        !matches!(self, GatewayEventKind::Other(_))
    }
}

/// Parsed, not yet deduplicated, gateway event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub id: String,
    pub event_type: String,
    pub kind: GatewayEventKind,
    pub reference: Option<String>,
    pub status: Option<String>,
    pub amount: Option<Amount>,
    pub recipient_code: Option<String>,
    pub transfer_code: Option<String>,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: RawData,
}

#[derive(Deserialize, Default)]
struct RawData {
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    recipient_code: Option<String>,
    #[serde(default)]
    transfer_code: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

/// Id for a payload that cannot be parsed at all
pub fn body_event_id(body: &[u8]) -> String {
    format!("{}{}", DERIVED_ID_PREFIX, sha256_hex(&[body]))
}

fn explicit_id(id: Option<Value>) -> Option<String> {
    match id? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a verified webhook body
///
/// On failure returns the best available event id alongside the error so
/// the malformed delivery can still be recorded.
pub fn parse(body: &[u8]) -> Result<GatewayEvent, (String, WebhookError)> {
    let raw: RawEvent = serde_json::from_slice(body)
        .map_err(|e| (body_event_id(body), WebhookError::Malformed(e.to_string())))?;

    let event_type = raw.event.filter(|e| !e.trim().is_empty());
    let id = explicit_id(raw.id).unwrap_or_else(|| {
        let event = event_type.as_deref().unwrap_or_default();
        match raw.data.reference.as_deref() {
            Some(reference) => format!(
                "{}{}",
                DERIVED_ID_PREFIX,
                sha256_hex(&[
                    event.as_bytes(),
                    reference.as_bytes(),
                    raw.data.transfer_code.as_deref().unwrap_or_default().as_bytes(),
                ])
            ),
            None => body_event_id(body),
        }
    });

    let Some(event_type) = event_type else {
        return Err((id, WebhookError::Malformed("missing event type".to_string())));
    };

    let kind = GatewayEventKind::parse(&event_type);
    let reference = raw.data.reference.filter(|r| !r.trim().is_empty());
    if kind.needs_reference() && reference.is_none() {
        return Err((
            id,
            WebhookError::Malformed(format!("{} without data.reference", event_type)),
        ));
    }

    let amount = match raw.data.amount {
        Some(minor) if minor < 0 => {
            return Err((id, WebhookError::Malformed(format!("negative amount {}", minor))));
        }
        other => other.map(Amount::from_minor),
    };

    Ok(GatewayEvent {
        id,
        event_type,
        kind,
        reference,
        status: raw.data.status,
        amount,
        recipient_code: raw.data.recipient_code,
        transfer_code: raw.data.transfer_code,
        reason: raw.data.reason,
    })
}
