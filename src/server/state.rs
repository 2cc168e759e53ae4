use std::sync::Arc;

use crate::db::Database;
use crate::escrow::EscrowService;
use crate::webhook::WebhookIngestor;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub escrow: Arc<EscrowService>,
    pub ingestor: Arc<WebhookIngestor>,
    /// `None` with in-memory storage
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(
        escrow: Arc<EscrowService>,
        ingestor: Arc<WebhookIngestor>,
        db: Option<Arc<Database>>,
    ) -> Self {
        Self {
            escrow,
            ingestor,
            db,
        }
    }
}
