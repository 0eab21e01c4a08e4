//! Configuration management
//!
//! Layers, lowest priority first: built-in defaults, an optional file
//! (`$CABLEBILL_CONFIG` or `config/cablebill.{toml,yaml,json}`), then
//! environment variables such as `CABLEBILL__SERVER__PORT=9000`.

use crate::domain::clock::BillingCalendar;
use crate::domain::shared::{IdScheme, Result as DomainResult};
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "CABLEBILL";
const CONFIG_PATH_VAR: &str = "CABLEBILL_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config/cablebill";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseSettings,
    pub storage: StorageConfig,
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Fixed UTC offset that defines month boundaries, e.g. "+05:30"
    pub utc_offset: String,
    pub max_transaction_attempts: u32,
    pub id_scheme: IdScheme,
}

impl BillingConfig {
    pub fn calendar(&self) -> DomainResult<BillingCalendar> {
        BillingCalendar::from_offset_str(&self.utc_offset)
    }
}

impl Default for Config {
    fn default() -> Self {
        let backend = if cfg!(feature = "postgres") {
            StorageBackend::Postgres
        } else {
            StorageBackend::Memory
        };

        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseSettings {
                url: "postgres://postgres@localhost/cablebill".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_secs: 5,
            },
            storage: StorageConfig { backend },
            billing: BillingConfig {
                utc_offset: "+05:30".to_string(),
                max_transaction_attempts: 3,
                id_scheme: IdScheme::default(),
            },
        }
    }
}

impl Config {
    /// Load defaults, the optional config file and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let (path, required) = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => (path, true),
            Err(_) => (DEFAULT_CONFIG_FILE.to_string(), false),
        };

        Self::defaults()?
            .add_source(File::with_name(&path).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Config>()?
            .validated()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = config::Config::try_from(&Config::default())?;
        Ok(config::Config::builder().add_source(defaults))
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.billing.max_transaction_attempts == 0 {
            return Err(ConfigError::Message(
                "billing.max_transaction_attempts must be at least 1".to_string(),
            ));
        }
        self.billing
            .calendar()
            .map_err(|e| ConfigError::Message(format!("billing.utc_offset: {}", e)))?;
        Ok(self)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
