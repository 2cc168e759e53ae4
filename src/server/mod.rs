//! HTTP server
//!
//! ```text
//! /api/v1/health                                  GET
//! /api/v1/bookings                                POST
//! /api/v1/bookings/{id}                           GET
//! /api/v1/bookings/{id}/<action>                  POST  (actor headers)
//! /api/v1/admin/bookings/{id}/cash-verify         POST  (admin)
//! /api/v1/admin/bookings/{id}/resolve-dispute     POST  (admin)
//! /api/v1/providers/payout-account                POST  (provider)
//! /webhooks/gateway                               POST  (HMAC signed)
//! /docs                                           Swagger UI
//! ```

pub mod actor;
pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let booking_routes = Router::new()
        .route("/{id}", get(handlers::get_booking))
        .route("/{id}/accept", post(handlers::accept_booking))
        .route("/{id}/reject", post(handlers::reject_booking))
        .route("/{id}/start", post(handlers::start_job))
        .route("/{id}/complete", post(handlers::complete_job))
        .route("/{id}/payment", post(handlers::initiate_payment))
        .route("/{id}/confirm", post(handlers::confirm_completion))
        .route("/{id}/cancel", post(handlers::cancel_booking))
        .route("/{id}/dispute", post(handlers::file_dispute))
        .route("/{id}/cash-received", post(handlers::confirm_cash_received));

    let admin_routes = Router::new()
        .route("/bookings/{id}/cash-verify", post(handlers::verify_cash))
        .route(
            "/bookings/{id}/resolve-dispute",
            post(handlers::resolve_dispute),
        );

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .route("/api/v1/bookings", post(handlers::create_booking))
        .nest("/api/v1/bookings", booking_routes)
        .nest("/api/v1/admin", admin_routes)
        .route(
            "/api/v1/providers/payout-account",
            post(handlers::register_payout_account),
        )
        .route("/webhooks/gateway", post(handlers::gateway_webhook))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> std::io::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(
            addr = %addr,
            error = %e,
            "Failed to bind; port {} may already be in use",
            port
        );
        e
    })?;

    tracing::info!(addr = %addr, "Escrow engine listening");
    tracing::info!("API docs: http://{}/docs", addr);

    axum::serve(listener, app).await
}
