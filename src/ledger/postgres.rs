//! PostgreSQL ledger
//!
//! Every [`LedgerWrite`] runs in one transaction. Updates are version
//! guarded (`WHERE id = $n AND version = $m`), so two concurrent writers of
//! the same booking/payment/payout triple cannot both commit.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{
    Committed, LedgerError, LedgerStore, LedgerWrite, ProviderAccount, RowWrite, WebhookEvent,
    WebhookOutcome, bumped,
};
use crate::booking::Booking;
use crate::core_types::{BookingId, PaymentId, PayoutId, UserId};
use crate::money::Amount;
use crate::payment::{Payment, Payout};

const BOOKING_COLUMNS: &str = "id, client_id, provider_id, service_id, scheduled_date, \
     duration_minutes, total_amount, platform_fee, address, status, dispute_reason, \
     dispute_resolution, version, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, booking_id, amount, gateway_reference, status, \
     escrow_amount, platform_fee, paid_at, payment_method, authorization_url, version, \
     created_at, updated_at";

const PAYOUT_COLUMNS: &str = "id, payment_id, provider_id, amount, transfer_reference, \
     recipient_code, status, attempts, transfer_seq, permanently_failed, last_error, \
     next_retry_at, version, created_at, updated_at";

const EVENT_COLUMNS: &str =
    "event_id, event_type, raw_payload, outcome, error, failures, received_at, processed_at";

/// Outcomes that a processed-mark must never overwrite
const FINAL_OUTCOMES: &str = "('PROCESSED', 'IGNORED', 'MALFORMED')";

/// sqlx-backed [`LedgerStore`]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_booking(
        tx: &mut Transaction<'_, Postgres>,
        booking: &Booking,
    ) -> Result<Booking, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $1, dispute_reason = $2, dispute_resolution = $3,
                updated_at = $4, version = version + 1
            WHERE id = $5 AND version = $6
            "#,
        )
        .bind(booking.status.as_str())
        .bind(&booking.dispute_reason)
        .bind(booking.dispute_resolution.map(|r| r.as_str()))
        .bind(booking.updated_at)
        .bind(booking.id.to_string())
        .bind(booking.version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            let err =
                Self::missing_or_stale(tx, "bookings", "booking", booking.id, booking.version)
                    .await;
            return Err(err);
        }

        let mut next = booking.clone();
        next.version += 1;
        Ok(next)
    }

    async fn write_payment(
        tx: &mut Transaction<'_, Postgres>,
        write: &RowWrite<Payment>,
    ) -> Result<Payment, LedgerError> {
        match write {
            RowWrite::Insert(p) => {
                sqlx::query(
                    r#"
                    INSERT INTO payments
                        (id, booking_id, amount, gateway_reference, status, escrow_amount,
                         platform_fee, paid_at, payment_method, authorization_url, version,
                         created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(p.id.to_string())
                .bind(p.booking_id.to_string())
                .bind(p.amount.minor())
                .bind(&p.gateway_reference)
                .bind(p.status.as_str())
                .bind(p.escrow_amount.minor())
                .bind(p.platform_fee.minor())
                .bind(p.paid_at)
                .bind(p.method.as_str())
                .bind(&p.authorization_url)
                .bind(p.version)
                .bind(p.created_at)
                .bind(p.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| unique_conflict(e, format!("payment for booking {}", p.booking_id)))?;
            }
            RowWrite::Update(p) => {
                let result = sqlx::query(
                    r#"
                    UPDATE payments
                    SET status = $1, paid_at = $2, authorization_url = $3,
                        updated_at = $4, version = version + 1
                    WHERE id = $5 AND version = $6
                    "#,
                )
                .bind(p.status.as_str())
                .bind(p.paid_at)
                .bind(&p.authorization_url)
                .bind(p.updated_at)
                .bind(p.id.to_string())
                .bind(p.version)
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() == 0 {
                    let err =
                        Self::missing_or_stale(tx, "payments", "payment", p.id, p.version).await;
                    return Err(err);
                }
            }
        }
        Ok(bumped(write, |p: &mut Payment| p.version += 1))
    }

    async fn write_payout(
        tx: &mut Transaction<'_, Postgres>,
        write: &RowWrite<Payout>,
    ) -> Result<Payout, LedgerError> {
        match write {
            RowWrite::Insert(p) => {
                sqlx::query(
                    r#"
                    INSERT INTO payouts
                        (id, payment_id, provider_id, amount, transfer_reference, recipient_code,
                         status, attempts, transfer_seq, permanently_failed, last_error,
                         next_retry_at, version, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                    "#,
                )
                .bind(p.id.to_string())
                .bind(p.payment_id.to_string())
                .bind(p.provider_id)
                .bind(p.amount.minor())
                .bind(&p.transfer_reference)
                .bind(&p.recipient_code)
                .bind(p.status.as_str())
                .bind(p.attempts)
                .bind(p.transfer_seq)
                .bind(p.permanently_failed)
                .bind(&p.last_error)
                .bind(p.next_retry_at)
                .bind(p.version)
                .bind(p.created_at)
                .bind(p.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| unique_conflict(e, format!("payout for payment {}", p.payment_id)))?;
            }
            RowWrite::Update(p) => {
                let result = sqlx::query(
                    r#"
                    UPDATE payouts
                    SET transfer_reference = $1, recipient_code = $2, status = $3,
                        attempts = $4, transfer_seq = $5, permanently_failed = $6,
                        last_error = $7, next_retry_at = $8, updated_at = $9,
                        version = version + 1
                    WHERE id = $10 AND version = $11
                    "#,
                )
                .bind(&p.transfer_reference)
                .bind(&p.recipient_code)
                .bind(p.status.as_str())
                .bind(p.attempts)
                .bind(p.transfer_seq)
                .bind(p.permanently_failed)
                .bind(&p.last_error)
                .bind(p.next_retry_at)
                .bind(p.updated_at)
                .bind(p.id.to_string())
                .bind(p.version)
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() == 0 {
                    let err =
                        Self::missing_or_stale(tx, "payouts", "payout", p.id, p.version).await;
                    return Err(err);
                }
            }
        }
        Ok(bumped(write, |p: &mut Payout| p.version += 1))
    }

    async fn mark_event(
        tx: &mut Transaction<'_, Postgres>,
        event_id: &str,
        outcome: WebhookOutcome,
    ) -> Result<(), LedgerError> {
        let sql = format!(
            r#"
            UPDATE webhook_events
            SET outcome = $1, error = NULL, processed_at = NOW()
            WHERE event_id = $2 AND outcome NOT IN {}
            "#,
            FINAL_OUTCOMES
        );
        let result = sqlx::query(&sql)
            .bind(outcome.as_str())
            .bind(event_id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AlreadyProcessed(event_id.to_string()));
        }
        Ok(())
    }

    /// Distinguish a vanished row from a lost version race
    async fn missing_or_stale(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        entity: &'static str,
        id: impl ToString,
        expected: i64,
    ) -> LedgerError {
        let id = id.to_string();
        let sql = format!("SELECT 1 FROM {} WHERE id = $1", table);
        match sqlx::query(&sql).bind(&id).fetch_optional(&mut **tx).await {
            Ok(Some(_)) => LedgerError::StaleState {
                entity,
                id,
                expected,
            },
            Ok(None) => LedgerError::NotFound { entity, id },
            Err(e) => LedgerError::Database(e),
        }
    }
}

fn unique_conflict(e: sqlx::Error, what: String) -> LedgerError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            LedgerError::Conflict(format!("{} already exists", what))
        }
        _ => LedgerError::Database(e),
    }
}

fn parse_col<T: FromStr>(row: &PgRow, column: &str) -> Result<T, LedgerError>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e| LedgerError::Corrupt(format!("{}={:?}: {}", column, raw, e)))
}

fn parse_opt_col<T: FromStr>(row: &PgRow, column: &str) -> Result<Option<T>, LedgerError>
where
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| {
        raw.parse()
            .map_err(|e| LedgerError::Corrupt(format!("{}={:?}: {}", column, raw, e)))
    })
    .transpose()
}

fn amount_col(row: &PgRow, column: &str) -> Result<Amount, LedgerError> {
    Ok(Amount::from_minor(row.try_get::<i64, _>(column)?))
}

fn row_to_booking(row: &PgRow) -> Result<Booking, LedgerError> {
    Ok(Booking {
        id: parse_col(row, "id")?,
        client_id: row.try_get("client_id")?,
        provider_id: row.try_get("provider_id")?,
        service_id: row.try_get("service_id")?,
        scheduled_date: row.try_get("scheduled_date")?,
        duration_minutes: row.try_get("duration_minutes")?,
        total_amount: amount_col(row, "total_amount")?,
        platform_fee: amount_col(row, "platform_fee")?,
        address: row.try_get("address")?,
        status: parse_col(row, "status")?,
        dispute_reason: row.try_get("dispute_reason")?,
        dispute_resolution: parse_opt_col(row, "dispute_resolution")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_payment(row: &PgRow) -> Result<Payment, LedgerError> {
    Ok(Payment {
        id: parse_col(row, "id")?,
        booking_id: parse_col(row, "booking_id")?,
        amount: amount_col(row, "amount")?,
        gateway_reference: row.try_get("gateway_reference")?,
        status: parse_col(row, "status")?,
        escrow_amount: amount_col(row, "escrow_amount")?,
        platform_fee: amount_col(row, "platform_fee")?,
        paid_at: row.try_get("paid_at")?,
        method: parse_col(row, "payment_method")?,
        authorization_url: row.try_get("authorization_url")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_payout(row: &PgRow) -> Result<Payout, LedgerError> {
    Ok(Payout {
        id: parse_col(row, "id")?,
        payment_id: parse_col(row, "payment_id")?,
        provider_id: row.try_get("provider_id")?,
        amount: amount_col(row, "amount")?,
        transfer_reference: row.try_get("transfer_reference")?,
        recipient_code: row.try_get("recipient_code")?,
        status: parse_col(row, "status")?,
        attempts: row.try_get("attempts")?,
        transfer_seq: row.try_get("transfer_seq")?,
        permanently_failed: row.try_get("permanently_failed")?,
        last_error: row.try_get("last_error")?,
        next_retry_at: row.try_get("next_retry_at")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_event(row: &PgRow) -> Result<WebhookEvent, LedgerError> {
    Ok(WebhookEvent {
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        raw_payload: row.try_get("raw_payload")?,
        outcome: parse_col(row, "outcome")?,
        error: row.try_get("error")?,
        failures: row.try_get("failures")?,
        received_at: row.try_get("received_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn row_to_provider(row: &PgRow) -> Result<ProviderAccount, LedgerError> {
    Ok(ProviderAccount {
        provider_id: row.try_get("provider_id")?,
        account_name: row.try_get("account_name")?,
        account_number: row.try_get("account_number")?,
        bank_code: row.try_get("bank_code")?,
        recipient_code: row.try_get("recipient_code")?,
    })
}

impl PgLedger {
    async fn fetch_payment(
        &self,
        column: &str,
        value: String,
    ) -> Result<Option<Payment>, LedgerError> {
        let sql = format!("SELECT {} FROM payments WHERE {} = $1", PAYMENT_COLUMNS, column);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn fetch_payout(
        &self,
        column: &str,
        value: String,
    ) -> Result<Option<Payout>, LedgerError> {
        let sql = format!("SELECT {} FROM payouts WHERE {} = $1", PAYOUT_COLUMNS, column);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_payout).transpose()
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO bookings
                (id, client_id, provider_id, service_id, scheduled_date, duration_minutes,
                 total_amount, platform_fee, address, status, dispute_reason,
                 dispute_resolution, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(booking.id.to_string())
        .bind(booking.client_id)
        .bind(booking.provider_id)
        .bind(booking.service_id)
        .bind(booking.scheduled_date)
        .bind(booking.duration_minutes)
        .bind(booking.total_amount.minor())
        .bind(booking.platform_fee.minor())
        .bind(&booking.address)
        .bind(booking.status.as_str())
        .bind(&booking.dispute_reason)
        .bind(booking.dispute_resolution.map(|r| r.as_str()))
        .bind(booking.version)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_conflict(e, format!("booking {}", booking.id)))?;
        Ok(())
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, LedgerError> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_booking).transpose()
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, LedgerError> {
        self.fetch_payment("id", id.to_string()).await
    }

    async fn payment_for_booking(&self, id: BookingId) -> Result<Option<Payment>, LedgerError> {
        self.fetch_payment("booking_id", id.to_string()).await
    }

    async fn payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, LedgerError> {
        self.fetch_payment("gateway_reference", reference.to_string())
            .await
    }

    async fn payout(&self, id: PayoutId) -> Result<Option<Payout>, LedgerError> {
        self.fetch_payout("id", id.to_string()).await
    }

    async fn payout_for_payment(&self, id: PaymentId) -> Result<Option<Payout>, LedgerError> {
        self.fetch_payout("payment_id", id.to_string()).await
    }

    async fn payout_by_transfer_reference(
        &self,
        transfer_reference: &str,
    ) -> Result<Option<Payout>, LedgerError> {
        self.fetch_payout("transfer_reference", transfer_reference.to_string())
            .await
    }

    async fn recoverable_payouts(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        limit: usize,
    ) -> Result<Vec<Payout>, LedgerError> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| LedgerError::Corrupt(format!("invalid stale threshold: {}", e)))?;

        let sql = format!(
            r#"
            SELECT {}
            FROM payouts
            WHERE (status IN ('PENDING', 'PROCESSING')
                   AND transfer_reference IS NULL
                   AND updated_at < $1)
               OR (status = 'FAILED'
                   AND NOT permanently_failed
                   AND next_retry_at < $1)
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
            PAYOUT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(now - stale_after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut payouts = Vec::with_capacity(rows.len());
        for row in &rows {
            payouts.push(row_to_payout(row)?);
        }
        Ok(payouts)
    }

    async fn provider_account(
        &self,
        provider_id: UserId,
    ) -> Result<Option<ProviderAccount>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT provider_id, account_name, account_number, bank_code, recipient_code
            FROM provider_accounts
            WHERE provider_id = $1
            "#,
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_provider).transpose()
    }

    async fn save_provider_account(&self, account: &ProviderAccount) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO provider_accounts
                (provider_id, account_name, account_number, bank_code, recipient_code, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (provider_id) DO UPDATE
            SET account_name = EXCLUDED.account_name,
                account_number = EXCLUDED.account_number,
                bank_code = EXCLUDED.bank_code,
                recipient_code = CASE
                    WHEN provider_accounts.account_number = EXCLUDED.account_number
                     AND provider_accounts.bank_code = EXCLUDED.bank_code
                    THEN COALESCE(provider_accounts.recipient_code, EXCLUDED.recipient_code)
                    ELSE EXCLUDED.recipient_code
                END,
                updated_at = NOW()
            "#,
        )
        .bind(account.provider_id)
        .bind(&account.account_name)
        .bind(&account.account_number)
        .bind(&account.bank_code)
        .bind(&account.recipient_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_recipient_code(
        &self,
        provider_id: UserId,
        recipient_code: &str,
    ) -> Result<String, LedgerError> {
        let stored = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE provider_accounts
            SET recipient_code = COALESCE(recipient_code, $2), updated_at = NOW()
            WHERE provider_id = $1
            RETURNING recipient_code
            "#,
        )
        .bind(provider_id)
        .bind(recipient_code)
        .fetch_optional(&self.pool)
        .await?;

        stored.ok_or_else(|| LedgerError::not_found("provider account", provider_id))
    }

    async fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events
                (event_id, event_type, raw_payload, outcome, error, failures,
                 received_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.raw_payload)
        .bind(event.outcome.as_str())
        .bind(&event.error)
        .bind(event.failures)
        .bind(event.received_at)
        .bind(event.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn webhook_event(&self, event_id: &str) -> Result<Option<WebhookEvent>, LedgerError> {
        let sql = format!("SELECT {} FROM webhook_events WHERE event_id = $1", EVENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn record_webhook_failure(
        &self,
        event_id: &str,
        error: &str,
    ) -> Result<(), LedgerError> {
        let sql = format!(
            r#"
            UPDATE webhook_events
            SET outcome = 'FAILED', error = $2, failures = failures + 1
            WHERE event_id = $1 AND outcome NOT IN {}
            "#,
            FINAL_OUTCOMES
        );
        sqlx::query(&sql)
            .bind(event_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commit(&self, write: LedgerWrite) -> Result<Committed, LedgerError> {
        // Dropping `tx` on any early return rolls the whole unit back
        let mut tx = self.pool.begin().await?;
        let mut committed = Committed::default();

        if let Some(booking) = &write.booking {
            committed.booking = Some(Self::write_booking(&mut tx, booking).await?);
        }
        if let Some(payment) = &write.payment {
            committed.payment = Some(Self::write_payment(&mut tx, payment).await?);
        }
        if let Some(payout) = &write.payout {
            committed.payout = Some(Self::write_payout(&mut tx, payout).await?);
        }
        if let Some((event_id, outcome)) = &write.processed_event {
            Self::mark_event(&mut tx, event_id, *outcome).await?;
        }

        tx.commit().await?;
        Ok(committed)
    }
}
