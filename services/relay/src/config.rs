//! Relay configuration loading.
//!
//! A TOML file is optional; every field has a default, and command-line
//! flags override what the file says.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//! workers = 4
//!
//! [broker]
//! url = "redis://127.0.0.1:6379"
//! pool_size = 5
//! topic = "general"
//!
//! [cors]
//! allow_origins = ["https://chat.example.com"]
//! allow_credentials = true
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use chat_protocol::DEFAULT_TOPIC;
use serde::Deserialize;

use crate::broker::pool::DEFAULT_POOL_SIZE;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BROKER_URL: &str = "memory://";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Runtime worker threads; `None` keeps tokio's default (one per CPU).
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub url: String,
    pub pool_size: usize,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    /// `"*"` allows any origin.
    pub allow_origins: Vec<String>,
    /// Only honoured for an explicit origin list.
    pub allow_credentials: bool,
}

impl CorsConfig {
    pub fn is_wildcard(&self) -> bool {
        self.allow_origins.iter().any(|o| o == "*")
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
                workers: None,
            },
            broker: BrokerConfig {
                url: DEFAULT_BROKER_URL.to_owned(),
                pool_size: DEFAULT_POOL_SIZE,
                topic: DEFAULT_TOPIC.to_owned(),
            },
            cors: CorsConfig {
                allow_origins: vec!["*".to_owned()],
                allow_credentials: true,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    server: Option<RawServerConfig>,
    broker: Option<RawBrokerConfig>,
    cors: Option<RawCorsConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServerConfig {
    bind: Option<String>,
    workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBrokerConfig {
    url: Option<String>,
    pool_size: Option<usize>,
    topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCorsConfig {
    allow_origins: Option<Vec<String>>,
    allow_credentials: Option<bool>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<RelayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<RelayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let defaults = RelayConfig::default();

    let raw_server = raw.server.unwrap_or_default();
    let bind = match raw_server.bind {
        Some(bind) => parse_bind(&bind)?,
        None => defaults.server.bind,
    };
    if raw_server.workers == Some(0) {
        return Err(ConfigError::InvalidValue(
            "server.workers must be at least 1".to_owned(),
        ));
    }

    let raw_broker = raw.broker.unwrap_or_default();
    let url = raw_broker.url.unwrap_or(defaults.broker.url);
    if url.trim().is_empty() {
        return Err(ConfigError::InvalidValue("broker.url must not be empty".to_owned()));
    }
    let pool_size = raw_broker.pool_size.unwrap_or(defaults.broker.pool_size);
    if pool_size == 0 {
        return Err(ConfigError::InvalidValue(
            "broker.pool_size must be at least 1".to_owned(),
        ));
    }
    let topic = raw_broker.topic.unwrap_or(defaults.broker.topic);
    if topic.is_empty() {
        return Err(ConfigError::InvalidValue("broker.topic must not be empty".to_owned()));
    }

    let raw_cors = raw.cors.unwrap_or_default();
    let allow_origins = raw_cors.allow_origins.unwrap_or(defaults.cors.allow_origins);
    if allow_origins.is_empty() {
        return Err(ConfigError::InvalidValue(
            "cors.allow_origins must list at least one origin".to_owned(),
        ));
    }

    Ok(RelayConfig {
        server: ServerConfig {
            bind,
            workers: raw_server.workers,
        },
        broker: BrokerConfig {
            url,
            pool_size,
            topic,
        },
        cors: CorsConfig {
            allow_origins,
            allow_credentials: raw_cors
                .allow_credentials
                .unwrap_or(defaults.cors.allow_credentials),
        },
    })
}

pub fn parse_bind(bind: &str) -> Result<SocketAddr, ConfigError> {
    bind.parse()
        .map_err(|_| ConfigError::InvalidValue(format!("server.bind '{bind}' is not a socket address")))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
