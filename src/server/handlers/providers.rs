use std::sync::Arc;

use axum::{Json, extract::State};

use super::super::actor::CurrentActor;
use super::super::state::AppState;
use super::super::types::{ApiResult, PayoutAccountRequest, PayoutAccountView, ok};

/// Register or replace the caller's payout bank account
///
/// POST /api/v1/providers/payout-account
///
/// Changing the account number or bank code drops the registered gateway
/// recipient; the next release registers a new one.
#[utoipa::path(
    post,
    path = "/api/v1/providers/payout-account",
    request_body = PayoutAccountRequest,
    responses(
        (status = 200, description = "Account stored (number masked)", body = PayoutAccountView),
        (status = 400, description = "Invalid bank details"),
        (status = 403, description = "Providers only")
    ),
    security(("actor_headers" = [])),
    tag = "Providers"
)]
pub async fn register_payout_account(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<PayoutAccountRequest>,
) -> ApiResult<PayoutAccountView> {
    let bank = req.into_bank_details()?;
    let account = state.escrow.register_payout_account(&actor, bank).await?;
    ok(account.into())
}
