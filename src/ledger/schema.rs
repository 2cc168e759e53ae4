//! PostgreSQL schema bootstrap
//!
//! `CREATE TABLE IF NOT EXISTS` only; there is no migration tooling.

use sqlx::PgPool;

use super::LedgerError;

const CREATE_BOOKINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bookings (
    id                  TEXT PRIMARY KEY,
    client_id           BIGINT NOT NULL,
    provider_id         BIGINT NOT NULL,
    service_id          BIGINT NOT NULL,
    scheduled_date      TIMESTAMPTZ NOT NULL,
    duration_minutes    INTEGER NOT NULL,
    total_amount        BIGINT NOT NULL CHECK (total_amount > 0),
    platform_fee        BIGINT NOT NULL CHECK (platform_fee >= 0),
    address             TEXT NOT NULL,
    status              TEXT NOT NULL,
    dispute_reason      TEXT,
    dispute_resolution  TEXT,
    version             BIGINT NOT NULL DEFAULT 0,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_PAYMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payments (
    id                  TEXT PRIMARY KEY,
    booking_id          TEXT NOT NULL UNIQUE REFERENCES bookings(id),
    amount              BIGINT NOT NULL,
    gateway_reference   TEXT NOT NULL UNIQUE,
    status              TEXT NOT NULL,
    escrow_amount       BIGINT NOT NULL,
    platform_fee        BIGINT NOT NULL,
    paid_at             TIMESTAMPTZ,
    payment_method      TEXT NOT NULL,
    authorization_url   TEXT,
    version             BIGINT NOT NULL DEFAULT 0,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL,
    CHECK (platform_fee + escrow_amount = amount)
)
"#;

const CREATE_PAYOUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payouts (
    id                  TEXT PRIMARY KEY,
    payment_id          TEXT NOT NULL UNIQUE REFERENCES payments(id),
    provider_id         BIGINT NOT NULL,
    amount              BIGINT NOT NULL,
    transfer_reference  TEXT,
    recipient_code      TEXT,
    status              TEXT NOT NULL,
    attempts            INTEGER NOT NULL DEFAULT 0,
    transfer_seq        INTEGER NOT NULL DEFAULT 1,
    permanently_failed  BOOLEAN NOT NULL DEFAULT FALSE,
    last_error          TEXT,
    next_retry_at       TIMESTAMPTZ,
    version             BIGINT NOT NULL DEFAULT 0,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_PAYOUTS_RECOVERY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_payouts_recovery
    ON payouts (status, updated_at)
    WHERE status <> 'COMPLETED'
"#;

const CREATE_PROVIDER_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS provider_accounts (
    provider_id         BIGINT PRIMARY KEY,
    account_name        TEXT NOT NULL,
    account_number      TEXT NOT NULL,
    bank_code           TEXT NOT NULL,
    recipient_code      TEXT,
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_WEBHOOK_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS webhook_events (
    event_id            TEXT PRIMARY KEY,
    event_type          TEXT NOT NULL,
    raw_payload         TEXT NOT NULL,
    outcome             TEXT NOT NULL,
    error               TEXT,
    failures            INTEGER NOT NULL DEFAULT 0,
    received_at         TIMESTAMPTZ NOT NULL,
    processed_at        TIMESTAMPTZ
)
"#;

const STATEMENTS: &[(&str, &str)] = &[
    ("bookings", CREATE_BOOKINGS_TABLE),
    ("payments", CREATE_PAYMENTS_TABLE),
    ("payouts", CREATE_PAYOUTS_TABLE),
    ("idx_payouts_recovery", CREATE_PAYOUTS_RECOVERY_INDEX),
    ("provider_accounts", CREATE_PROVIDER_ACCOUNTS_TABLE),
    ("webhook_events", CREATE_WEBHOOK_EVENTS_TABLE),
];

/// Create the ledger tables if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<(), LedgerError> {
    tracing::info!("Initializing ledger schema...");

    for (name, sql) in STATEMENTS {
        sqlx::query(sql).execute(pool).await.map_err(|e| {
            tracing::error!(object = name, error = %e, "Failed to create schema object");
            LedgerError::Database(e)
        })?;
    }

    tracing::info!("Ledger schema initialized successfully");
    Ok(())
}
