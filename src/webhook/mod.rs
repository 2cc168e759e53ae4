//! Webhook Ingestor
//!
//! The only authentication boundary for inbound gateway signals:
//!
//! 1. verify `X-Signature` (HMAC-SHA512 of the raw body), else 401
//! 2. record the event keyed by its id (`ON CONFLICT DO NOTHING`); an id
//!    already in a final state answers 200 without reprocessing
//! 3. dispatch; state changes and the processed-mark commit together.
//!    A handler failure leaves the event unprocessed and answers 500 so the
//!    gateway redelivers.
//!
//! Malformed payloads answer 400 and are recorded as `MALFORMED`.

pub mod event;
pub mod signature;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::escrow::{EscrowService, EventDisposition};
use crate::ledger::{LedgerStore, WebhookEvent};

/// Optimistic-concurrency losses retried in-process before answering 500
const MAX_STALE_RETRIES: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing webhook signature")]
    MissingSignature,

    #[error("Invalid webhook signature")]
    BadSignature,

    #[error("Malformed webhook payload: {0}")]
    Malformed(String),

    #[error("Webhook misconfigured: {0}")]
    Misconfigured(String),

    #[error("Webhook processing failed: {0}")]
    Processing(String),
}

impl WebhookError {
    pub fn http_status(&self) -> u16 {
        match self {
            WebhookError::MissingSignature | WebhookError::BadSignature => 401,
            WebhookError::Malformed(_) => 400,
            WebhookError::Misconfigured(_) | WebhookError::Processing(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::MissingSignature => "MISSING_SIGNATURE",
            WebhookError::BadSignature => "BAD_SIGNATURE",
            WebhookError::Malformed(_) => "MALFORMED_PAYLOAD",
            WebhookError::Misconfigured(_) => "WEBHOOK_MISCONFIGURED",
            WebhookError::Processing(_) => "PROCESSING_FAILED",
        }
    }
}

/// Successful (HTTP 200) webhook answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Processed { event_id: String },
    Ignored { event_id: String, reason: String },
    /// Already handled by an earlier delivery
    Duplicate { event_id: String },
}

impl IngestOutcome {
    pub fn event_id(&self) -> &str {
        match self {
            IngestOutcome::Processed { event_id }
            | IngestOutcome::Ignored { event_id, .. }
            | IngestOutcome::Duplicate { event_id } => event_id,
        }
    }
}

pub struct WebhookIngestor {
    secret: String,
    ledger: Arc<dyn LedgerStore>,
    escrow: Arc<EscrowService>,
}

impl WebhookIngestor {
    pub fn new(secret: String, ledger: Arc<dyn LedgerStore>, escrow: Arc<EscrowService>) -> Self {
        Self {
            secret,
            ledger,
            escrow,
        }
    }

    /// Verify, record and apply one delivery
    ///
    /// Every verified delivery leaves a row in the event log before its
    /// handler runs, so a redelivery of a finished event is answered from
    /// the log without touching payment state.
    pub async fn receive(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<IngestOutcome, WebhookError> {
        if let Err(e) = signature::verify(&self.secret, body, signature) {
            warn!(error = %e, body_len = body.len(), "Webhook rejected");
            return Err(e);
        }

        let raw_payload = String::from_utf8_lossy(body).into_owned();
        let event = match event::parse(body) {
            Ok(event) => event,
            Err((event_id, e)) => {
                warn!(event_id = %event_id, error = %e, "Malformed webhook payload");
                let record = WebhookEvent::malformed(event_id, raw_payload, e.to_string());
                if let Err(db) = self.ledger.insert_webhook_event(&record).await {
                    error!(
                        event_id = %record.event_id,
                        error = %db,
                        "Failed to record malformed webhook"
                    );
                    return Err(WebhookError::Processing(db.to_string()));
                }
                return Err(e);
            }
        };

        let record =
            WebhookEvent::received(event.id.clone(), event.event_type.clone(), raw_payload);
        let inserted = self
            .ledger
            .insert_webhook_event(&record)
            .await
            .map_err(|e| {
                error!(event_id = %event.id, error = %e, "Failed to record webhook");
                WebhookError::Processing(e.to_string())
            })?;

        if !inserted {
            let existing = self
                .ledger
                .webhook_event(&event.id)
                .await
                .map_err(|e| WebhookError::Processing(e.to_string()))?;
            match existing {
                Some(stored) if stored.outcome.is_final() => {
                    info!(
                        event_id = %event.id,
                        outcome = %stored.outcome,
                        "Duplicate webhook delivery"
                    );
                    return Ok(IngestOutcome::Duplicate { event_id: event.id });
                }
                Some(stored) => debug!(
                    event_id = %event.id,
                    outcome = %stored.outcome,
                    failures = stored.failures,
                    "Reprocessing redelivered webhook"
                ),
                None => {}
            }
        }

        // Optimistic conflicts with a concurrent writer are retried on fresh state
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.escrow.apply_gateway_event(&event).await {
                Ok(disposition) => {
                    let outcome = match disposition {
                        EventDisposition::Processed => IngestOutcome::Processed {
                            event_id: event.id.clone(),
                        },
                        EventDisposition::Ignored(reason) => IngestOutcome::Ignored {
                            event_id: event.id.clone(),
                            reason,
                        },
                        EventDisposition::Duplicate => IngestOutcome::Duplicate {
                            event_id: event.id.clone(),
                        },
                    };
                    info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        reference = ?event.reference,
                        outcome = ?outcome,
                        "Webhook handled"
                    );
                    return Ok(outcome);
                }
                Err(e) if e.is_stale() && attempt < MAX_STALE_RETRIES => {
                    debug!(event_id = %event.id, attempt, "Concurrent update; reapplying webhook");
                }
                Err(e) => {
                    error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %e,
                        "Webhook handler failed"
                    );
                    if let Err(db) = self
                        .ledger
                        .record_webhook_failure(&event.id, &e.to_string())
                        .await
                    {
                        error!(
                            event_id = %event.id,
                            error = %db,
                            "Failed to record webhook failure"
                        );
                    }
                    return Err(WebhookError::Processing(e.to_string()));
                }
            }
        }
    }
}
