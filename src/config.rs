use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use validator::Validate;

use crate::ml::training::TrainingConfig;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub registry: RegistryConfig,
    #[validate(nested)]
    pub data: DataConfig,
    #[validate(nested)]
    pub training: TrainingSection,
    #[validate(nested)]
    pub lifecycle: LifecycleConfig,
    #[validate(nested)]
    pub serving: ServingConfig,
    pub reports: ReportsConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
}
impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    Memory,
    Fs,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    pub root: PathBuf,
    #[validate(length(min = 1))]
    pub name_prefix: String,
    #[validate(range(min = 1))]
    pub timeout_seconds: u64,
    pub promote_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DataConfig {
    pub root: PathBuf,
    #[validate(length(min = 1))]
    pub target_column: String,
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub train_ratio: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TrainingSection {
    #[validate(range(min = 1))]
    pub epochs: usize,
    #[validate(range(min = 1))]
    pub batch_size: usize,
    pub verbose: bool,
    #[validate(range(exclusive_min = 0.0))]
    pub learning_rate: f64,
    #[validate(range(min = 1))]
    pub lookback: usize,
}

impl TrainingSection {
    pub fn trainer_config(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            verbose: self.verbose,
            learning_rate: self.learning_rate,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LifecycleConfig {
    #[validate(range(min = 1))]
    pub cycle_every_minutes: u64,
    pub run_on_startup: bool,
    #[validate(range(min = 1))]
    pub max_parallel_entities: usize,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServingConfig {
    #[validate(range(min = 1))]
    pub max_horizon: usize,
    pub min_entity_id: u32,
    pub max_entity_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportsConfig { pub dir: PathBuf }

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("SF__").split("__"));
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        if cfg.serving.min_entity_id > cfg.serving.max_entity_id {
            anyhow::bail!(
                "serving.min_entity_id ({}) exceeds serving.max_entity_id ({})",
                cfg.serving.min_entity_id,
                cfg.serving.max_entity_id
            );
        }
        Ok(cfg)
    }
}
