//! Escrow engine server
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────────┐   ┌──────────┐
//! │   HTTP   │──▶│ EscrowService│──▶│ReleaseOrchestrator│──▶│ Gateway  │
//! │ (axum)   │   │  (FSM + I/O) │   │   (payout saga)  │   │ (HTTP)   │
//! └──────────┘   └──────────────┘   └──────────────────┘   └──────────┘
//!      │                │                ▲        ▲
//!      ▼                ▼                │        │
//! ┌──────────┐   ┌──────────────┐   ┌─────────┐ ┌──────────────┐
//! │ Webhooks │──▶│ LedgerStore  │   │ Retry   │ │  Recovery    │
//! │ (HMAC)   │   │ (Postgres)   │   │ Engine  │ │  Worker      │
//! └──────────┘   └──────────────┘   └─────────┘ └──────────────┘
//! ```
//!
//! Usage: `escrow_engine [--env <name>]` loads `config/<name>.yaml`.

use std::sync::Arc;

use anyhow::Context;

use escrow_engine::config::{AppConfig, GatewayMode, StorageKind};
use escrow_engine::db::Database;
use escrow_engine::escrow::EscrowService;
use escrow_engine::gateway::{HttpGateway, PaymentGateway};
use escrow_engine::ledger::{LedgerStore, MemoryLedger, PgLedger};
use escrow_engine::logging::init_logging;
use escrow_engine::notify::LogNotifier;
use escrow_engine::release::ReleaseOrchestrator;
use escrow_engine::retry::{RecoveryWorker, RetryEngine, retry_channel};
use escrow_engine::server::{AppState, run_server};
use escrow_engine::webhook::WebhookIngestor;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn build_gateway(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    match config.gateway.mode {
        GatewayMode::Http => {
            let gateway = HttpGateway::new(&config.gateway).context("gateway client")?;
            Ok(Arc::new(gateway))
        }
        #[cfg(feature = "sandbox-gateway")]
        GatewayMode::Sandbox => {
            tracing::warn!("Sandbox gateway enabled; no real money moves");
            Ok(Arc::new(escrow_engine::gateway::SandboxGateway::new()))
        }
        #[cfg(not(feature = "sandbox-gateway"))]
        GatewayMode::Sandbox => {
            anyhow::bail!("gateway.mode = sandbox requires the sandbox-gateway feature")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("loading config for '{}'", env))?;
    let _log_guard = init_logging(&config);

    tracing::info!(
        env = %env,
        storage = ?config.database.storage,
        gateway = ?config.gateway.mode,
        "Starting escrow engine"
    );

    let (ledger, db): (Arc<dyn LedgerStore>, Option<Arc<Database>>) =
        match config.database.storage {
            StorageKind::Memory => {
                tracing::warn!("In-memory storage; state is lost on restart");
                (Arc::new(MemoryLedger::new()), None)
            }
            StorageKind::Postgres => {
                let url = config
                    .database
                    .url
                    .as_deref()
                    .context("database.url is required for postgres storage")?;
                let db = Database::connect(url, config.database.max_connections)
                    .await
                    .context("connecting to Postgres")?;
                tracing::info!("Connected to Postgres");
                let ledger = PgLedger::new(db.pool().clone());
                (Arc::new(ledger), Some(Arc::new(db)))
            }
        };

    let gateway = build_gateway(&config)?;

    let (retry_handle, retry_receiver) = retry_channel();
    let orchestrator = Arc::new(ReleaseOrchestrator::new(
        ledger.clone(),
        gateway.clone(),
        Arc::new(LogNotifier),
        retry_handle,
        config.retry.clone(),
    ));
    let escrow = Arc::new(EscrowService::new(
        ledger.clone(),
        gateway,
        orchestrator.clone(),
        config.fees.platform_fee_bps,
    ));
    let ingestor = Arc::new(WebhookIngestor::new(
        config.webhook_secret().to_string(),
        ledger,
        escrow.clone(),
    ));

    RetryEngine::new(retry_receiver, orchestrator.clone()).spawn();
    RecoveryWorker::new(orchestrator, config.recovery.clone()).spawn();
    tracing::info!(
        max_attempts = config.retry.max_attempts,
        scan_interval_secs = config.recovery.scan_interval_secs,
        "Retry engine and recovery worker started"
    );

    let state = Arc::new(AppState::new(escrow, ingestor, db));
    run_server(&config.server.host, config.server.port, state)
        .await
        .context("HTTP server")?;
    Ok(())
}
