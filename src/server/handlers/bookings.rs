//! Client and provider booking handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::actor::CurrentActor;
use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, BookingView, CreateBookingRequest, DisputeRequest,
    InitiatePaymentRequest, PaymentInitView, ok,
};
use crate::core_types::BookingId;
use crate::payment::PaymentMethod;

pub(crate) fn parse_booking_id(raw: &str) -> Result<BookingId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("Invalid booking id format"))
}

/// Create booking
///
/// POST /api/v1/bookings
#[utoipa::path(
    post,
    path = "/api/v1/bookings",
    request_body = CreateBookingRequest,
    responses(
        (status = 200, description = "Booking created (PENDING)", body = BookingView),
        (status = 400, description = "Invalid parameters"),
        (status = 401, description = "Missing actor headers"),
        (status = 403, description = "Not a client")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<CreateBookingRequest>,
) -> ApiResult<BookingView> {
    let command = req.into_command()?;
    let snapshot = state.escrow.create_booking(&actor, command).await?;
    ok(snapshot.into())
}

/// Booking with payment and payout
///
/// GET /api/v1/bookings/{id}
#[utoipa::path(
    get,
    path = "/api/v1/bookings/{id}",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    responses(
        (status = 200, description = "Booking snapshot", body = BookingView),
        (status = 403, description = "Not a party to the booking"),
        (status = 404, description = "Booking not found")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<BookingView> {
    let snapshot = state
        .escrow
        .get_booking(&actor, parse_booking_id(&id)?)
        .await?;
    ok(snapshot.into())
}

/// Provider accepts (PENDING → CONFIRMED)
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/accept",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    responses(
        (status = 200, description = "Resulting booking snapshot", body = BookingView),
        (status = 403, description = "Caller may not perform this action"),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Invalid transition or concurrent update")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn accept_booking(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<BookingView> {
    let snapshot = state.escrow.accept_booking(&actor, parse_booking_id(&id)?).await?;
    ok(snapshot.into())
}

/// Provider rejects (PENDING → CANCELLED)
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/reject",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    responses(
        (status = 200, description = "Resulting booking snapshot", body = BookingView),
        (status = 403, description = "Caller may not perform this action"),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Invalid transition or concurrent update")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn reject_booking(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<BookingView> {
    let snapshot = state.escrow.reject_booking(&actor, parse_booking_id(&id)?).await?;
    ok(snapshot.into())
}

/// Provider starts the job (PENDING_EXECUTION → IN_PROGRESS)
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/start",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    responses(
        (status = 200, description = "Resulting booking snapshot", body = BookingView),
        (status = 403, description = "Caller may not perform this action"),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Invalid transition or concurrent update")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn start_job(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<BookingView> {
    let snapshot = state.escrow.start_job(&actor, parse_booking_id(&id)?).await?;
    ok(snapshot.into())
}

/// Provider marks the job done (IN_PROGRESS → AWAITING_CONFIRMATION)
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/complete",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    responses(
        (status = 200, description = "Resulting booking snapshot", body = BookingView),
        (status = 403, description = "Caller may not perform this action"),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Invalid transition or concurrent update")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn complete_job(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<BookingView> {
    let snapshot = state.escrow.complete_job(&actor, parse_booking_id(&id)?).await?;
    ok(snapshot.into())
}

/// Client confirms completion
///
/// For online payments this commits the payout and submits the transfer;
/// `release` in the response carries the saga outcome.
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/confirm",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    responses(
        (status = 200, description = "Resulting booking snapshot", body = BookingView),
        (status = 403, description = "Caller may not perform this action"),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Invalid transition or concurrent update")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn confirm_completion(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<BookingView> {
    let snapshot = state.escrow.confirm_completion(&actor, parse_booking_id(&id)?).await?;
    ok(snapshot.into())
}

/// Client cancels (PENDING|CONFIRMED → CANCELLED)
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/cancel",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    responses(
        (status = 200, description = "Resulting booking snapshot", body = BookingView),
        (status = 403, description = "Caller may not perform this action"),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Invalid transition or concurrent update")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<BookingView> {
    let snapshot = state.escrow.cancel_booking(&actor, parse_booking_id(&id)?).await?;
    ok(snapshot.into())
}

/// Provider (or admin) confirms cash in hand; the job must have started
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/cash-received",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    responses(
        (status = 200, description = "Resulting booking snapshot", body = BookingView),
        (status = 403, description = "Caller may not perform this action"),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Invalid transition or concurrent update")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn confirm_cash_received(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<BookingView> {
    let snapshot = state.escrow.confirm_cash_received(&actor, parse_booking_id(&id)?).await?;
    ok(snapshot.into())
}

/// Initiate payment for a CONFIRMED booking
///
/// POST /api/v1/bookings/{id}/payment
///
/// Idempotent: a booking that already has a payment returns it.
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/payment",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    request_body = InitiatePaymentRequest,
    responses(
        (status = 200, description = "Payment reference and checkout URL", body = PaymentInitView),
        (status = 409, description = "Booking does not accept payment"),
        (status = 502, description = "Gateway error")
    ),
    security(("actor_headers" = [])),
    tag = "Payments"
)]
pub async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    body: Option<Json<InitiatePaymentRequest>>,
) -> ApiResult<PaymentInitView> {
    let method = match body.and_then(|Json(req)| req.method) {
        None => PaymentMethod::Online,
        Some(raw) => raw
            .parse::<PaymentMethod>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
    };
    let outcome = state
        .escrow
        .initiate_payment(&actor, parse_booking_id(&id)?, method)
        .await?;
    ok(outcome.into())
}

/// File a dispute (client or provider)
///
/// POST /api/v1/bookings/{id}/dispute
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/dispute",
    params(("id" = String, Path, description = "Booking id (ULID)")),
    request_body = DisputeRequest,
    responses(
        (status = 200, description = "Booking DISPUTED", body = BookingView),
        (status = 409, description = "Booking cannot be disputed")
    ),
    security(("actor_headers" = [])),
    tag = "Bookings"
)]
pub async fn file_dispute(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<DisputeRequest>,
) -> ApiResult<BookingView> {
    let snapshot = state
        .escrow
        .file_dispute(&actor, parse_booking_id(&id)?, req.reason()?)
        .await?;
    ok(snapshot.into())
}
