//! Retry Engine
//!
//! - [`backoff`]: `min(base * 2^n + jitter, max)` policy, bounded attempts
//! - [`engine`]: deferred tokio task per scheduled retry
//! - [`recovery`]: periodic scan for payouts whose driver was lost

pub mod backoff;
pub mod engine;
pub mod recovery;

pub use backoff::RetryPolicy;
pub use engine::{RetryEngine, RetryHandle, RetryReceiver, RetryRequest, retry_channel};
pub use recovery::{RecoveryConfig, RecoveryWorker};
