//! Payment / Escrow and Payout records
//!
//! # State Machine
//!
//! ```text
//! PENDING → ESCROW → PROCESSING_RELEASE → RELEASED
//!    ↓        ↓
//!  FAILED  REFUNDED
//!
//! CASH_PENDING → CASH_RECEIVED → CASH_VERIFIED
//! ```
//!
//! # Invariants
//!
//! 1. `platform_fee + escrow_amount == amount` for every payment
//! 2. Terminal states never regress
//! 3. A payout exists only for an escrow-held payment and its amount equals
//!    the escrow amount

pub mod machine;
pub mod state;
pub mod types;

pub use machine::{PaymentError, PaymentEvent, transition};
pub use state::{PaymentMethod, PaymentStatus, PayoutStatus, UnknownStatus};
pub use types::{CASH_REFERENCE_PREFIX, Payment, Payout, TRANSFER_PERMANENTLY_FAILED};
