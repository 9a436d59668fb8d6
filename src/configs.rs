// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Layered configuration for the event bus. Sources, later ones overriding earlier:
//! 1. Built-in defaults
//! 2. `eventbus.yaml` in the working directory (if present)
//! 3. The file named by `EVENTBUS_CONFIG` (if set)
//! 4. Environment variables prefixed with `EVENTBUS`, nested with `__`
//!    (e.g. `EVENTBUS__RABBITMQ__HOST=broker`)

use crate::errors::ConfigsError;
use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "eventbus.yaml";
/// Environment variable holding an explicit configuration file path.
pub const CONFIG_ENV_VAR: &str = "EVENTBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "EVENTBUS";
/// Environment variable for the log filter.
pub const LOG_ENV_VAR: &str = "EVENTBUS_LOG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Configs {
    pub app: AppConfigs,
    pub rabbitmq: RabbitMQConfigs,
    pub server: ServerConfigs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfigs {
    /// Reported to the broker as the connection name.
    pub name: String,
}

impl Default for AppConfigs {
    fn default() -> Self {
        Self {
            name: "eventbus".to_owned(),
        }
    }
}

/// Broker connection and topology settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Full AMQP URI. When set it wins over host/port/user/password/vhost.
    pub url: Option<String>,
    /// Name of the topic exchange events are routed through.
    pub exchange: String,
    pub prefetch_count: u16,
    /// Always sent as zero on the wire; see [`crate::connection::QoS`].
    pub prefetch_size: u32,
    pub prefetch_global: bool,
    /// Shared work queue the enrichment router listens on.
    pub router_queue: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: String::new(),
            url: None,
            exchange: "event-bus".to_owned(),
            prefetch_count: 1,
            prefetch_size: 0,
            prefetch_global: false,
            router_queue: "events".to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    /// Builds the AMQP URI used to dial the broker.
    pub fn uri(&self) -> String {
        if let Some(url) = self.url.as_ref().filter(|u| !u.is_empty()) {
            return url.clone();
        }

        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfigs {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfigs {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
        }
    }
}

impl ServerConfigs {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Configs {
    /// Loads configuration from the layered sources described in the module docs.
    pub fn load() -> Result<Self, ConfigsError> {
        use config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&path, FileFormat::Yaml).required(true));
        }

        let configs = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(configs.try_deserialize()?)
    }
}
