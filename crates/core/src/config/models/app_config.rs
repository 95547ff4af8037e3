use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    dispatcher_worker::{validate_workers, DispatcherConfig, WorkerEndpoint, WorkerNodeConfig},
    logging::LoggingConfig,
    predictor::PredictorConfig,
    resource_query::ResourceQueryConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherConfig,
    pub workers: Vec<WorkerEndpoint>,
    pub resource_query: ResourceQueryConfig,
    pub predictor: Option<PredictorConfig>,
    pub worker_node: WorkerNodeConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Defaults of every section
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: BALANCER__, separator: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("config file does not exist: {}", path));
            }
        } else {
            let default_paths = ["config/balancer.toml", "balancer.toml", "/etc/balancer/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("BALANCER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration to TOML")
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatcher
            .validate()
            .context("dispatcher configuration is invalid")?;

        validate_workers(&self.workers).context("worker list is invalid")?;

        self.resource_query
            .validate(self.dispatcher.dimensions)
            .context("resource query configuration is invalid")?;

        if let Some(predictor) = &self.predictor {
            predictor
                .validate(self.dispatcher.dimensions)
                .context("predictor configuration is invalid")?;
        }

        self.worker_node
            .validate()
            .context("worker node configuration is invalid")?;

        self.logging
            .validate()
            .context("logging configuration is invalid")?;

        Ok(())
    }
}
