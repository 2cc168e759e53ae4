//! Admin handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::actor::CurrentActor;
use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, BookingView, ResolveDisputeRequest, ok};
use super::bookings::parse_booking_id;
use crate::booking::DisputeResolution;

/// Verify a cash payment and settle the payout record
///
/// POST /api/v1/admin/bookings/{id}/cash-verify
#[utoipa::path(
    post,
    path = "/api/v1/admin/bookings/{id}/cash-verify",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    responses(
        (status = 200, description = "Payment CASH_VERIFIED", body = BookingView),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Booking not COMPLETED or payment not received cash")
    ),
    security(("actor_headers" = [])),
    tag = "Admin"
)]
pub async fn verify_cash(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<BookingView> {
    let snapshot = state
        .escrow
        .verify_cash(&actor, parse_booking_id(&id)?)
        .await?;
    ok(snapshot.into())
}

/// Resolve a dispute by releasing to the provider or refunding the client
///
/// POST /api/v1/admin/bookings/{id}/resolve-dispute
#[utoipa::path(
    post,
    path = "/api/v1/admin/bookings/{id}/resolve-dispute",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    request_body = ResolveDisputeRequest,
    responses(
        (status = 200, description = "Booking COMPLETED", body = BookingView),
        (status = 400, description = "Unknown resolution"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Booking is not disputed")
    ),
    security(("actor_headers" = [])),
    tag = "Admin"
)]
pub async fn resolve_dispute(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<ResolveDisputeRequest>,
) -> ApiResult<BookingView> {
    let resolution = req
        .resolution
        .trim()
        .parse::<DisputeResolution>()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let snapshot = state
        .escrow
        .resolve_dispute(&actor, parse_booking_id(&id)?, resolution)
        .await?;
    ok(snapshot.into())
}
