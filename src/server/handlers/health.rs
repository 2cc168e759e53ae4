//! Liveness / readiness probe

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::extract::State;
use serde::Serialize;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ok};

/// Minimum spacing between real ledger pings
const PING_INTERVAL_MS: i64 = 5_000;

static LAST_PING_MS: AtomicI64 = AtomicI64::new(0);

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = 1767225600000_i64)]
    pub timestamp_ms: i64,
    /// `memory` or `postgres`
    #[schema(example = "postgres")]
    pub storage: String,
    /// Latency of the ping performed by this request, if one ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_ping_ms: Option<u64>,
}

/// Health check
///
/// Pings Postgres at most once per interval; in-memory storage is always
/// ready. Failure details stay in the logs.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Ledger unreachable")
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let now_ms = chrono::Utc::now().timestamp_millis();

    let Some(db) = &state.db else {
        return ok(HealthResponse {
            timestamp_ms: now_ms,
            storage: "memory".to_string(),
            ledger_ping_ms: None,
        });
    };

    let mut ledger_ping_ms = None;
    if now_ms - LAST_PING_MS.load(Ordering::Relaxed) > PING_INTERVAL_MS {
        LAST_PING_MS.store(now_ms, Ordering::Relaxed);
        match db.ping().await {
            Ok(latency) => ledger_ping_ms = Some(latency.as_millis() as u64),
            Err(e) => {
                tracing::error!(error = %e, "Ledger ping failed");
                LAST_PING_MS.store(0, Ordering::Relaxed);
                return Err(ApiError::service_unavailable("unavailable"));
            }
        }
    }

    ok(HealthResponse {
        timestamp_ms: now_ms,
        storage: "postgres".to_string(),
        ledger_ping_ms,
    })
}
