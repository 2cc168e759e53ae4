use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::HeaderMap};

use super::super::state::AppState;
use super::super::types::{ApiResult, WebhookAck, ok};
use crate::webhook::signature::SIGNATURE_HEADER;

/// Gateway webhook
///
/// POST /webhooks/gateway
///
/// The raw body is signed by the gateway (`X-Signature`, HMAC-SHA512 hex).
/// Duplicate deliveries of a finished event answer 200.
#[utoipa::path(
    post,
    path = "/webhooks/gateway",
    request_body(content = String, content_type = "application/json", description = "Gateway event"),
    params(("X-Signature" = String, Header, description = "HMAC-SHA512 of the raw body, hex")),
    responses(
        (status = 200, description = "Processed, ignored or duplicate", body = WebhookAck),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 500, description = "Processing failed; the gateway should redeliver")
    ),
    tag = "Webhooks"
)]
pub async fn gateway_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let outcome = state.ingestor.receive(&body, signature).await?;
    ok(outcome.into())
}
