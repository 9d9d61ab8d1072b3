//! Service bootstrap
//!
//! Command line parsing, configuration assembly and logging setup for the
//! `regsrv` binary.

use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::{AppConfig, TargetConfig};
use crate::error::{RegsrvError, Result};
use crate::transport::TransportMode;

/// Command-line arguments for regsrv
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "regsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus holding-register reader",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Device address to connect to at startup
    #[arg(long)]
    pub ip: Option<String>,

    /// Device TCP port
    #[arg(long)]
    pub port: Option<u16>,

    /// Modbus unit id
    #[arg(long)]
    pub unit_id: Option<u8>,

    /// Framing: tcp or rtu_over_tcp
    #[arg(long)]
    pub mode: Option<String>,

    /// First register of the read window
    #[arg(long)]
    pub start: Option<u32>,

    /// Number of registers to read (0-125)
    #[arg(long)]
    pub count: Option<u32>,

    /// Poll interval in milliseconds, 0 disables polling
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// Apply command line values over the loaded configuration
    pub fn apply_overrides(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(start) = self.start {
            config.registers.start_address = start;
        }
        if let Some(count) = self.count {
            config.registers.count = count;
        }
        if let Some(interval) = self.poll_interval_ms {
            config.polling.interval_ms = interval;
        }

        let mode = self
            .mode
            .as_deref()
            .map(str::parse::<TransportMode>)
            .transpose()?;

        match (&self.ip, config.target.as_mut()) {
            (Some(ip), Some(target)) => target.ip = ip.clone(),
            (Some(ip), None) => {
                config.target = Some(TargetConfig {
                    ip: ip.clone(),
                    port: 502,
                    unit_id: 1,
                    mode: TransportMode::Tcp,
                });
            },
            (None, None) if self.port.is_some() || self.unit_id.is_some() || mode.is_some() => {
                return Err(RegsrvError::config(
                    "--port, --unit-id and --mode need a target ip (--ip or target.ip)",
                ));
            },
            _ => {},
        }

        if let Some(target) = config.target.as_mut() {
            if let Some(port) = self.port {
                target.port = port;
            }
            if let Some(unit_id) = self.unit_id {
                target.unit_id = unit_id;
            }
            if let Some(mode) = mode {
                target.mode = mode;
            }
        }

        Ok(())
    }
}

/// Load the layered configuration and apply `args`
pub fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config)?;
    config.validate()?;
    debug!("Configuration assembled: {:?}", config);
    Ok(config)
}

/// Initialize logging from the assembled configuration
pub fn initialize_logging(config: &AppConfig, args: &Args) -> Result<()> {
    let mut log_config = config.log_config();
    log_config.ansi = !args.no_color;
    common::init_logging(&log_config)
        .map_err(|e| RegsrvError::config(format!("Failed to init logging: {}", e)))?;
    info!(
        "{} v{} logging initialized at level {}",
        config.service.name,
        env!("CARGO_PKG_VERSION"),
        log_config.level
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let args = Args::try_parse_from([
            "regsrv",
            "-l",
            "debug",
            "--ip",
            "10.0.0.2",
            "--port",
            "1502",
            "--unit-id",
            "17",
            "--mode",
            "rtu_over_tcp",
            "--start",
            "40",
            "--count",
            "8",
            "--poll-interval-ms",
            "1000",
        ])
        .unwrap();

        let mut config = AppConfig::default();
        args.apply_overrides(&mut config).unwrap();
        config.validate().unwrap();

        let target = config.target.unwrap();
        assert_eq!(target.ip, "10.0.0.2");
        assert_eq!(target.port, 1502);
        assert_eq!(target.unit_id, 17);
        assert_eq!(target.mode, TransportMode::RtuOverTcp);
        assert_eq!(config.registers.start_address, 40);
        assert_eq!(config.registers.count, 8);
        assert_eq!(config.polling.interval_ms, 1000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_target_fields_without_ip() {
        let args = Args::try_parse_from(["regsrv", "--port", "1502"]).unwrap();
        let mut config = AppConfig::default();
        assert!(matches!(
            args.apply_overrides(&mut config),
            Err(RegsrvError::Config(_))
        ));
    }

    #[test]
    fn test_override_existing_target() {
        let args = Args::try_parse_from(["regsrv", "--unit-id", "3"]).unwrap();
        let mut config = AppConfig::default();
        config.target = Some(TargetConfig {
            ip: "192.168.0.9".to_string(),
            port: 502,
            unit_id: 1,
            mode: TransportMode::Tcp,
        });
        args.apply_overrides(&mut config).unwrap();
        let target = config.target.unwrap();
        assert_eq!(target.ip, "192.168.0.9");
        assert_eq!(target.unit_id, 3);
    }

    #[test]
    fn test_bad_mode_rejected() {
        let args = Args::try_parse_from(["regsrv", "--ip", "1.2.3.4", "--mode", "ascii"]).unwrap();
        let mut config = AppConfig::default();
        assert!(matches!(
            args.apply_overrides(&mut config),
            Err(RegsrvError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_no_arguments_keeps_config() {
        let args = Args::try_parse_from(["regsrv"]).unwrap();
        let mut config = AppConfig::default();
        args.apply_overrides(&mut config).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
