//! API response envelope, error mapping and response DTOs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::EscrowError;
use crate::escrow::{BookingSnapshot, ChargeOutcome};
use crate::ledger::ProviderAccount;
use crate::money::format_amount;
use crate::payment::{Payment, Payout};
use crate::release::ReleaseOutcome;
use crate::webhook::{IngestOutcome, WebhookError};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    #[schema(example = 0)]
    pub code: i32,
    #[schema(example = "ok")]
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Numeric API error codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INVALID_AMOUNT: i32 = 1002;
    pub const MALFORMED_PAYLOAD: i32 = 1003;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const FORBIDDEN: i32 = 2003;
    pub const BAD_SIGNATURE: i32 = 2004;

    // State errors (3xxx)
    pub const INVALID_TRANSITION: i32 = 3001;
    pub const INVALID_PAYMENT_STATE: i32 = 3002;
    pub const STALE_STATE: i32 = 3003;
    pub const PAYOUT_ACCOUNT_MISSING: i32 = 3004;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const GATEWAY_ERROR: i32 = 5002;
}

/// Handler error: HTTP status plus envelope
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error_codes::MISSING_AUTH, msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

fn numeric_code(e: &EscrowError) -> i32 {
    match e.code() {
        "INVALID_TRANSITION" | "INVALID_BOOKING_STATUS" => error_codes::INVALID_TRANSITION,
        "INVALID_PAYMENT_STATE" => error_codes::INVALID_PAYMENT_STATE,
        "INVALID_AMOUNT" => error_codes::INVALID_AMOUNT,
        "INVALID_INPUT" => error_codes::INVALID_PARAMETER,
        "STALE_STATE" | "CONFLICT" => error_codes::STALE_STATE,
        "UNAUTHORIZED" => error_codes::MISSING_AUTH,
        "FORBIDDEN" => error_codes::FORBIDDEN,
        "NOT_FOUND" => error_codes::NOT_FOUND,
        "PAYOUT_ACCOUNT_MISSING" => error_codes::PAYOUT_ACCOUNT_MISSING,
        code if code.starts_with("GATEWAY_") => error_codes::GATEWAY_ERROR,
        _ => error_codes::INTERNAL_ERROR,
    }
}

impl From<EscrowError> for ApiError {
    fn from(e: EscrowError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = e.code(), error = %e, "Request failed");
        } else {
            tracing::debug!(code = e.code(), error = %e, "Request rejected");
        }
        Self::new(status, numeric_code(&e), e.user_message())
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match e {
            WebhookError::MissingSignature | WebhookError::BadSignature => {
                error_codes::BAD_SIGNATURE
            }
            WebhookError::Malformed(_) => error_codes::MALFORMED_PAYLOAD,
            WebhookError::Misconfigured(_) | WebhookError::Processing(_) => {
                error_codes::INTERNAL_ERROR
            }
        };
        // Processing details stay in the logs
        let msg = match &e {
            WebhookError::Processing(_) | WebhookError::Misconfigured(_) => {
                "processing failed".to_string()
            }
            other => other.to_string(),
        };
        Self::new(status, code, msg)
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentView {
    pub payment_id: String,
    #[schema(example = "PAY-01J9Z3Q4ZK8V1YV6S8P3X2M4QF")]
    pub reference: String,
    #[schema(example = "ESCROW")]
    pub status: String,
    #[schema(example = "ONLINE")]
    pub method: String,
    #[schema(example = "500.00")]
    pub amount: String,
    #[schema(example = "450.00")]
    pub escrow_amount: String,
    #[schema(example = "50.00")]
    pub platform_fee: String,
    pub paid_at: Option<String>,
    pub authorization_url: Option<String>,
}

impl From<&Payment> for PaymentView {
    fn from(p: &Payment) -> Self {
        Self {
            payment_id: p.id.to_string(),
            reference: p.gateway_reference.clone(),
            status: p.status.to_string(),
            method: p.method.to_string(),
            amount: format_amount(p.amount),
            escrow_amount: format_amount(p.escrow_amount),
            platform_fee: format_amount(p.platform_fee),
            paid_at: p.paid_at.map(|t| t.to_rfc3339()),
            authorization_url: p.authorization_url.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PayoutView {
    pub payout_id: String,
    #[schema(example = "PROCESSING")]
    pub status: String,
    #[schema(example = "450.00")]
    pub amount: String,
    pub attempts: i32,
    pub permanently_failed: bool,
    pub transfer_reference: Option<String>,
    pub next_retry_at: Option<String>,
}

impl From<&Payout> for PayoutView {
    fn from(p: &Payout) -> Self {
        Self {
            payout_id: p.id.to_string(),
            status: p.status.to_string(),
            amount: format_amount(p.amount),
            attempts: p.attempts,
            permanently_failed: p.permanently_failed,
            transfer_reference: p.transfer_reference.clone(),
            next_retry_at: p.next_retry_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BookingView {
    pub booking_id: String,
    pub client_id: i64,
    pub provider_id: i64,
    pub service_id: i64,
    pub scheduled_date: String,
    pub duration_minutes: i32,
    #[schema(example = "500.00")]
    pub total_amount: String,
    #[schema(example = "50.00")]
    pub platform_fee: String,
    pub address: String,
    #[schema(example = "PENDING_EXECUTION")]
    pub status: String,
    pub dispute_reason: Option<String>,
    pub dispute_resolution: Option<String>,
    pub updated_at: String,
    pub payment: Option<PaymentView>,
    pub payout: Option<PayoutView>,
    /// Present when the action ran the release saga
    #[schema(value_type = Option<Object>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseOutcome>,
}

impl From<BookingSnapshot> for BookingView {
    fn from(s: BookingSnapshot) -> Self {
        let b = s.booking;
        Self {
            booking_id: b.id.to_string(),
            client_id: b.client_id,
            provider_id: b.provider_id,
            service_id: b.service_id,
            scheduled_date: b.scheduled_date.to_rfc3339(),
            duration_minutes: b.duration_minutes,
            total_amount: format_amount(b.total_amount),
            platform_fee: format_amount(b.platform_fee),
            address: b.address,
            status: b.status.to_string(),
            dispute_reason: b.dispute_reason,
            dispute_resolution: b.dispute_resolution.map(|r| r.as_str().to_string()),
            updated_at: b.updated_at.to_rfc3339(),
            payment: s.payment.as_ref().map(PaymentView::from),
            payout: s.payout.as_ref().map(PayoutView::from),
            release: s.release,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentInitView {
    pub payment_id: String,
    pub reference: String,
    pub authorization_url: Option<String>,
    /// `true` when the booking already had a payment (idempotent replay)
    pub existing: bool,
}

impl From<ChargeOutcome> for PaymentInitView {
    fn from(o: ChargeOutcome) -> Self {
        Self {
            payment_id: o.payment_id().to_string(),
            reference: o.reference().to_string(),
            authorization_url: o.authorization_url().map(str::to_string),
            existing: matches!(o, ChargeOutcome::Existing { .. }),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PayoutAccountView {
    pub provider_id: i64,
    pub account_name: String,
    /// Last four digits only
    #[schema(example = "******6789")]
    pub account_number: String,
    pub bank_code: String,
    pub recipient_registered: bool,
}

impl From<ProviderAccount> for PayoutAccountView {
    fn from(a: ProviderAccount) -> Self {
        let digits = a.account_number.chars().count();
        let masked: String = a
            .account_number
            .chars()
            .enumerate()
            .map(|(i, c)| if i + 4 < digits { '*' } else { c })
            .collect();
        Self {
            provider_id: a.provider_id,
            account_name: a.account_name,
            account_number: masked,
            bank_code: a.bank_code,
            recipient_registered: a.recipient_code.is_some(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub event_id: String,
    /// `PROCESSED`, `IGNORED` or `DUPLICATE`
    #[schema(example = "PROCESSED")]
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<IngestOutcome> for WebhookAck {
    fn from(outcome: IngestOutcome) -> Self {
        let (event_id, label, reason) = match outcome {
            IngestOutcome::Processed { event_id } => (event_id, "PROCESSED", None),
            IngestOutcome::Ignored { event_id, reason } => (event_id, "IGNORED", Some(reason)),
            IngestOutcome::Duplicate { event_id } => (event_id, "DUPLICATE", None),
        };
        Self {
            event_id,
            outcome: label.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;

    #[test]
    fn test_escrow_error_mapping() {
        let e: ApiError = EscrowError::Unauthorized.into();
        assert_eq!(e.status, StatusCode::UNAUTHORIZED);
        assert_eq!(e.code, error_codes::MISSING_AUTH);

        let e: ApiError = EscrowError::Ledger(LedgerError::Corrupt("bad row".into())).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.msg, crate::error::SUPPORT_MESSAGE);
    }

    #[test]
    fn test_webhook_error_mapping() {
        let e: ApiError = WebhookError::BadSignature.into();
        assert_eq!(e.status, StatusCode::UNAUTHORIZED);
        let e: ApiError = WebhookError::Processing("db down".into()).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!e.msg.contains("db down"));
    }

    #[test]
    fn test_account_masking() {
        let view = PayoutAccountView::from(ProviderAccount {
            provider_id: 7,
            account_name: "Ada".into(),
            account_number: "0123456789".into(),
            bank_code: "058".into(),
            recipient_code: None,
        });
        assert_eq!(view.account_number, "******6789");
        assert!(!view.recipient_registered);
    }
}
