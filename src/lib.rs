//! Escrow Engine
//!
//! Booking lifecycle and escrowed payments for a services marketplace: the
//! client's money is held until the job is confirmed, then released to the
//! provider through the payment gateway, exactly once.
//!
//! # Modules
//!
//! - [`core_types`] - Id aliases (BookingId, PaymentId, PayoutId, UserId)
//! - [`money`] - Integer minor-unit amounts and the fee split
//! - [`booking`] - Booking state machine
//! - [`payment`] - Payment and payout state machines
//! - [`ledger`] - Persistence with optimistic versioning (Postgres / memory)
//! - [`gateway`] - Payment gateway client (charges, recipients, transfers)
//! - [`webhook`] - Signed webhook verification and idempotent ingestion
//! - [`escrow`] - Actor-facing operations that drive both machines
//! - [`release`] - Payout saga: persist, transfer, reconcile
//! - [`retry`] - Backoff policy, retry scheduler, recovery worker
//! - [`notify`] - Operator notifications
//! - [`server`] - axum HTTP API and OpenAPI docs

// Core types - must be first!
pub mod core_types;
pub mod money;

// State machines
pub mod booking;
pub mod payment;

// Persistence
pub mod db;
pub mod ledger;

// Payment flow
pub mod escrow;
pub mod gateway;
pub mod notify;
pub mod release;
pub mod retry;
pub mod webhook;

// Ambient
pub mod config;
pub mod error;
pub mod logging;
pub mod server;

#[cfg(test)]
mod integration_tests;

// Convenient re-exports at crate root
pub use core_types::{BookingId, PaymentId, PayoutId, UserId};
pub use error::EscrowError;
pub use escrow::{Actor, EscrowService, Role};
pub use money::Amount;
pub use release::{ReleaseOrchestrator, ReleaseOutcome};
