//! Booking Lifecycle
//!
//! # State Machine
//!
//! ```text
//! PENDING → CONFIRMED → PENDING_EXECUTION → IN_PROGRESS → AWAITING_CONFIRMATION → COMPLETED
//! ```
//!
//! Side branches: `PENDING|CONFIRMED → CANCELLED`,
//! `IN_PROGRESS|AWAITING_CONFIRMATION|COMPLETED → DISPUTED`.
//!
//! The transition function is the only writer of `Booking::status`.

pub mod machine;
pub mod state;
pub mod types;

pub use machine::{BookingError, GuardContext, PaymentGuard, can_transition, transition};
pub use state::{BookingEvent, BookingStatus, DisputeResolution};
pub use types::{Booking, NewBooking};
