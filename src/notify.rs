//! Operator notifications
//!
//! Permanent payout failures and money-at-risk anomalies need a human. Email
//! and paging live outside this crate; the default notifier writes an
//! `error`-level event that log alerting picks up.

use tracing::error;

use crate::payment::Payout;

pub trait OpsNotifier: Send + Sync {
    /// Payout needs manual action; no further automatic retries
    fn payout_failed(&self, payout: &Payout, reason: &str);

    /// Anything else an operator must look at
    fn alert(&self, subject: &str, detail: &str);
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl OpsNotifier for LogNotifier {
    fn payout_failed(&self, payout: &Payout, reason: &str) {
        error!(
            payout_id = %payout.id,
            payment_id = %payout.payment_id,
            provider_id = payout.provider_id,
            amount = %payout.amount,
            attempts = payout.attempts,
            reason,
            "OPS: payout permanently failed, manual action required"
        );
    }

    fn alert(&self, subject: &str, detail: &str) {
        error!(subject, detail, "OPS: alert");
    }
}
