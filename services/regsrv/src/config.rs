//! Service configuration
//!
//! Layered with figment: built-in defaults, then an optional YAML file, then
//! `REGSRV_` environment variables (`__` separates nested keys, e.g.
//! `REGSRV_CONNECTION__IO_TIMEOUT_MS=2000`). Command line overrides are
//! applied on top by the binary.

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::LogConfig;

use crate::connection::{LifecycleSettings, RetryPolicy};
use crate::error::{RegsrvError, Result};
use crate::poller::validate_interval;
use crate::protocol::constants::MAX_READ_REGISTERS;
use crate::registers::{DEFAULT_COUNT, DEFAULT_START_ADDRESS};
use crate::transport::TransportMode;

/// Default configuration file, used when present
pub const DEFAULT_CONFIG_FILE: &str = "regsrv.yaml";
/// Environment variable prefix
pub const ENV_PREFIX: &str = "REGSRV_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "regsrv".to_string(),
        }
    }
}

/// Connection lifecycle timing, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub probe_before_connect: bool,
    pub probe_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub worker_join_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            io_timeout_ms: 5000,
            probe_before_connect: true,
            probe_timeout_ms: 1000,
            max_attempts: 6,
            retry_delay_ms: 1000,
            keep_alive_interval_ms: 15000,
            worker_join_timeout_ms: 3000,
        }
    }
}

impl ConnectionConfig {
    pub fn to_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            probe_before_connect: self.probe_before_connect,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                delay: Duration::from_millis(self.retry_delay_ms),
            },
            keep_alive_interval: Duration::from_millis(self.keep_alive_interval_ms),
            worker_join_timeout: Duration::from_millis(self.worker_join_timeout_ms),
        }
    }
}

/// Initial read window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistersConfig {
    pub start_address: u32,
    pub count: u32,
}

impl Default for RegistersConfig {
    fn default() -> Self {
        Self {
            start_address: u32::from(DEFAULT_START_ADDRESS),
            count: u32::from(DEFAULT_COUNT),
        }
    }
}

/// Device to connect to at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default)]
    pub mode: TransportMode,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// 0 disables polling
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub connection: ConnectionConfig,
    pub registers: RegistersConfig,
    pub target: Option<TargetConfig>,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from defaults, `path` (or `regsrv.yaml` when it exists) and env
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(RegsrvError::config(format!(
                        "configuration file not found: {}",
                        path.display()
                    )));
                }
                figment = figment.merge(Yaml::file(path));
            },
            None => {
                if Path::new(DEFAULT_CONFIG_FILE).exists() {
                    figment = figment.merge(Yaml::file(DEFAULT_CONFIG_FILE));
                }
            },
        }

        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.connection;
        for (name, value) in [
            ("connection.connect_timeout_ms", c.connect_timeout_ms),
            ("connection.io_timeout_ms", c.io_timeout_ms),
            ("connection.probe_timeout_ms", c.probe_timeout_ms),
            ("connection.keep_alive_interval_ms", c.keep_alive_interval_ms),
            ("connection.worker_join_timeout_ms", c.worker_join_timeout_ms),
        ] {
            if value == 0 {
                return Err(RegsrvError::config(format!("{} must be greater than 0", name)));
            }
        }
        if c.max_attempts == 0 {
            return Err(RegsrvError::config(
                "connection.max_attempts must be at least 1",
            ));
        }

        if self.registers.start_address > u32::from(u16::MAX) {
            return Err(RegsrvError::config(format!(
                "registers.start_address {} out of range (0-65535)",
                self.registers.start_address
            )));
        }
        if self.registers.count > u32::from(MAX_READ_REGISTERS) {
            return Err(RegsrvError::config(format!(
                "registers.count {} out of range (0-{})",
                self.registers.count, MAX_READ_REGISTERS
            )));
        }

        if let Some(target) = &self.target {
            if target.ip.trim().is_empty() {
                return Err(RegsrvError::config("target.ip must not be empty"));
            }
            if target.port == 0 {
                return Err(RegsrvError::config("target.port must be 1-65535"));
            }
        }

        validate_interval(self.poll_interval())
            .map_err(|e| RegsrvError::config(format!("polling.interval_ms: {}", e)))?;

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            service_name: self.service.name.clone(),
            log_dir: self.logging.dir.clone(),
            level: self.logging.level.clone(),
            enable_json: self.logging.json,
            ..LogConfig::new(&self.service.name)
        }
    }
}
