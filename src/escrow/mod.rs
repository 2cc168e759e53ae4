//! Escrow Service
//!
//! Command side of the engine. Every client, provider and admin action and
//! every charge webhook lands here, is validated by the booking and payment
//! state machines and commits as one [`LedgerWrite`]. Releases are handed to
//! the [`ReleaseOrchestrator`].

pub mod actions;
pub mod charge;
pub mod events;

pub use charge::ChargeOutcome;
pub use events::EventDisposition;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::booking::{Booking, GuardContext};
use crate::core_types::{BookingId, UserId};
use crate::error::EscrowError;
use crate::gateway::PaymentGateway;
use crate::ledger::LedgerStore;
use crate::payment::{Payment, Payout};
use crate::release::{ReleaseOrchestrator, ReleaseOutcome};

/// Caller role injected by the upstream session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Provider,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Provider => "provider",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "provider" => Ok(Role::Provider),
            "admin" => Ok(Role::Admin),
            _ => Err(EscrowError::Unauthorized),
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub(crate) fn require_client_of(&self, booking: &Booking) -> Result<(), EscrowError> {
        if self.role == Role::Client && booking.client_id == self.user_id {
            Ok(())
        } else {
            Err(EscrowError::Forbidden("only the booking's client may do this"))
        }
    }

    pub(crate) fn require_provider_of(&self, booking: &Booking) -> Result<(), EscrowError> {
        if self.role == Role::Provider && booking.provider_id == self.user_id {
            Ok(())
        } else {
            Err(EscrowError::Forbidden("only the booking's provider may do this"))
        }
    }

    pub(crate) fn require_party_to(&self, booking: &Booking) -> Result<(), EscrowError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Client if booking.client_id == self.user_id => Ok(()),
            Role::Provider if booking.provider_id == self.user_id => Ok(()),
            _ => Err(EscrowError::Forbidden("not a party to this booking")),
        }
    }

    pub(crate) fn require_admin(&self) -> Result<(), EscrowError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EscrowError::Forbidden("admin only"))
        }
    }
}

/// Booking with its payment and payout as currently persisted
#[derive(Debug, Clone, Serialize)]
pub struct BookingSnapshot {
    pub booking: Booking,
    pub payment: Option<Payment>,
    pub payout: Option<Payout>,
    /// Set when the action ran the Release Orchestrator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseOutcome>,
}

pub struct EscrowService {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    orchestrator: Arc<ReleaseOrchestrator>,
    fee_bps: u32,
}

impl EscrowService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        orchestrator: Arc<ReleaseOrchestrator>,
        fee_bps: u32,
    ) -> Self {
        Self {
            ledger,
            gateway,
            orchestrator,
            fee_bps,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn orchestrator(&self) -> &Arc<ReleaseOrchestrator> {
        &self.orchestrator
    }

    pub(crate) async fn load_booking(&self, id: BookingId) -> Result<Booking, EscrowError> {
        self.ledger
            .booking(id)
            .await?
            .ok_or_else(|| EscrowError::not_found("booking", id))
    }

    /// Guard context for `booking` given its payment
    pub(crate) fn guard_for(booking: &Booking, payment: Option<&Payment>) -> GuardContext {
        let ctx = match payment {
            Some(p) => GuardContext::with_payment(p.method, p.status),
            None => GuardContext::without_payment(),
        };
        booking.guard(ctx)
    }

    pub(crate) async fn snapshot(
        &self,
        booking: Booking,
        release: Option<ReleaseOutcome>,
    ) -> Result<BookingSnapshot, EscrowError> {
        let payment = self.ledger.payment_for_booking(booking.id).await?;
        let payout = match &payment {
            Some(p) => self.ledger.payout_for_payment(p.id).await?,
            None => None,
        };
        Ok(BookingSnapshot {
            booking,
            payment,
            payout,
            release,
        })
    }
}
