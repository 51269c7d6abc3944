use std::time::Duration;

use anyhow::{bail, Context};
use config::Config;
use lazy_static::lazy_static;
use serde::Deserialize;
use tracing::info;

use crate::batch::BatchLimits;
use crate::scheduled::SchedulerLimits;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    #[serde(default)]
    pub node: NodeSettings,
    #[serde(default)]
    pub outbox: OutboxSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub batch: BatchSettings,
    pub services: ServicesSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: String,
    pub user: String,
    pub dbname: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(skip_deserializing)]
    pub dbpasswd: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    pub machine_id: i32,
    pub node_id: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxSettings {
    pub enabled: bool,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub poll_interval_ms: u64,
    #[serde(default = "default_reclaim_after_secs")]
    pub reclaim_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub tick_interval_secs: u64,
    pub max_retry: i32,
    pub due_limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSettings {
    pub max_items: usize,
    pub max_concurrency: usize,
    pub item_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesSettings {
    pub risk: ServiceEndpoint,
    pub payment: ServiceEndpoint,
}

/// A synchronous collaborator. `enabled: false` is the only way to switch
/// one off; an enabled endpoint must carry a url.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEndpoint {
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_reclaim_after_secs() -> u64 {
    300
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            machine_id: 1,
            node_id: 1,
        }
    }
}

impl Default for OutboxSettings {
    fn default() -> Self {
        OutboxSettings {
            enabled: true,
            batch_size: 50,
            max_attempts: 10,
            poll_interval_ms: 1000,
            reclaim_after_secs: default_reclaim_after_secs(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            enabled: true,
            tick_interval_secs: 60,
            max_retry: 3,
            due_limit: 100,
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            max_items: 100,
            max_concurrency: 10,
            item_timeout_secs: 30,
        }
    }
}

lazy_static! {
    pub static ref SETTINGS: Settings = Settings::new();
}

impl Settings {
    pub fn new() -> Self {
        match Self::load() {
            Ok(cfg) => cfg,
            Err(err) => panic!("Failed to load configuration: {:#}", err),
        }
    }

    pub fn load() -> anyhow::Result<Self> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "local".to_string());
        let mut cfg = Self::load_from_file(&env)?;
        Self::customize_from_env(&mut cfg);

        Ok(cfg)
    }

    fn load_from_file(env: &str) -> anyhow::Result<Self> {
        let file = format!("config.{}.yaml", env);
        info!("Loading configuration from: {}", file);
        let settings = Config::builder()
            .add_source(config::File::with_name(&file))
            .build()
            .with_context(|| format!("Failed to build configuration from {}", file))?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn customize_from_env(cfg: &mut Self) {
        if let Ok(db_password) = std::env::var("DB_PASSWD") {
            cfg.database.dbpasswd = db_password;
        }
        if let Ok(url) = std::env::var("RISK_URL") {
            cfg.services.risk.url = url;
        }
        if let Ok(url) = std::env::var("PAYMENT_URL") {
            cfg.services.payment.url = url;
        }
    }

    /// Rejects settings that would silently change behaviour at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, service) in [
            ("risk", &self.services.risk),
            ("payment", &self.services.payment),
        ] {
            if service.enabled && service.url.trim().is_empty() {
                bail!("services.{}.url is required when the service is enabled", name);
            }
        }
        if self.server.listen_addr.trim().is_empty() {
            bail!("server.listen_addr is required");
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.dbpasswd, self.host, self.port, self.dbname
        )
    }
}

impl OutboxSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn limits(&self) -> SchedulerLimits {
        SchedulerLimits {
            max_retry: self.max_retry.max(1),
            due_limit: self.due_limit.clamp(1, 1000),
            ..SchedulerLimits::default()
        }
    }
}

impl BatchSettings {
    pub fn limits(&self) -> BatchLimits {
        BatchLimits {
            max_items: self.max_items.max(1),
            max_concurrency: self.max_concurrency.max(1),
            item_timeout: Duration::from_secs(self.item_timeout_secs.max(1)),
        }
    }
}
