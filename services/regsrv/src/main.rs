//! Register reader service (regsrv)
//!
//! Connects to the configured device at startup when a target is given,
//! optionally polls the read window, and disconnects cleanly on Ctrl+C or
//! SIGTERM.

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use regsrv::bootstrap::{self, Args};
use regsrv::poller::spawn_poller;
use regsrv::{RegisterCache, RegisterGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = bootstrap::load_config(&args).context("Failed to load configuration")?;

    if args.validate {
        println!("Configuration is valid");
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    bootstrap::initialize_logging(&config, &args)?;

    let registers = RegisterCache::with_window(
        config.registers.start_address,
        config.registers.count,
    )?;
    let gateway = RegisterGateway::new(config.connection.to_settings(), registers);

    if let Some(target) = &config.target {
        let result = gateway
            .connect(&target.ip, target.port, target.unit_id, target.mode)
            .await;
        if result.success {
            info!("{}", result.message);
        } else {
            warn!("Startup connect failed: {}", result.message);
        }
    } else {
        info!("No target configured, waiting for shutdown");
    }

    let shutdown = common::shutdown_token();
    let poller = if config.polling.interval_ms > 0 {
        Some(spawn_poller(
            gateway.manager().clone(),
            config.poll_interval(),
            &shutdown,
        )?)
    } else {
        None
    };

    shutdown.cancelled().await;
    info!("Shutting down");

    if let Some(poller) = poller {
        poller.stop().await;
    }

    let status = gateway.status();
    if status.connected || status.connecting {
        let result = gateway.disconnect().await;
        if !result.success {
            error!("Disconnect during shutdown failed: {}", result.message);
        }
    }

    info!("regsrv stopped");
    Ok(())
}
