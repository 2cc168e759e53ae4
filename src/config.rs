use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

use crate::retry::{RecoveryConfig, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub fees: FeeConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Postgres,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; `DATABASE_URL` overrides
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
    pub storage: StorageKind,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            storage: StorageKind::Memory,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    Http,
    Sandbox,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    pub base_url: String,
    /// Bearer secret; `GATEWAY_SECRET_KEY` overrides
    pub secret_key: String,
    pub timeout_secs: u64,
    pub callback_url: Option<String>,
    pub currency: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: GatewayMode::Sandbox,
            base_url: "https://api.paystack.co".to_string(),
            secret_key: String::new(),
            timeout_secs: 30,
            callback_url: None,
            currency: "NGN".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct WebhookConfig {
    /// Shared HMAC secret; falls back to the gateway secret key
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeeConfig {
    pub platform_fee_bps: u32,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: 1_000,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: config_path,
            source,
        })?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Secrets from the environment win over the file
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(key) = lookup("GATEWAY_SECRET_KEY") {
            self.gateway.secret_key = key;
        }
        if let Some(secret) = lookup("WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
    }

    /// Webhook HMAC secret (falls back to the gateway secret key)
    pub fn webhook_secret(&self) -> &str {
        self.webhook
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.gateway.secret_key)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.storage == StorageKind::Postgres && self.database.url.is_none() {
            return Err(ConfigError::Invalid(
                "database.url (or DATABASE_URL) is required for postgres storage".to_string(),
            ));
        }
        if self.gateway.mode == GatewayMode::Http && self.gateway.secret_key.is_empty() {
            return Err(ConfigError::Invalid(
                "gateway.secret_key (or GATEWAY_SECRET_KEY) is required in http mode".to_string(),
            ));
        }
        if self.webhook_secret().is_empty() {
            return Err(ConfigError::Invalid(
                "webhook.secret (or WEBHOOK_SECRET) is required".to_string(),
            ));
        }
        if self.fees.platform_fee_bps > crate::money::BPS_DENOMINATOR {
            return Err(ConfigError::Invalid(format!(
                "fees.platform_fee_bps {} exceeds 100%",
                self.fees.platform_fee_bps
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
