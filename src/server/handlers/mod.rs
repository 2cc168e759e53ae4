//! HTTP handlers
//!
//! Thin adapters: extract, call [`crate::escrow::EscrowService`] or the
//! webhook ingestor, wrap the result in `ApiResponse`.

pub mod admin;
pub mod bookings;
pub mod health;
pub mod providers;
pub mod webhook;

pub use admin::*;
pub use bookings::*;
pub use health::*;
pub use providers::*;
pub use webhook::*;
