//! On-demand register reads
//!
//! At most one read runs at a time. A second caller does not wait: it gets
//! `AlreadyInProgress` immediately and can simply skip its trigger.

use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info};

use errors::log_classified;

use crate::connection::{ConnectionManager, DisconnectOrigin};
use crate::error::{RegsrvError, Result};
use crate::registers::RegisterCache;

/// What a completed `read_once` did with the register window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// Values read and stored in the register cache
    Stored(Vec<u16>),
    /// Window count is 0, no request sent
    Paused,
    /// Window or session changed while the request was in flight
    Discarded,
}

#[derive(Debug)]
pub struct ReadCoordinator {
    manager: Weak<ConnectionManager>,
    registers: Arc<RegisterCache>,
    in_flight: Mutex<()>,
}

impl ReadCoordinator {
    pub(crate) fn new(manager: Weak<ConnectionManager>, registers: Arc<RegisterCache>) -> Self {
        Self {
            manager,
            registers,
            in_flight: Mutex::new(()),
        }
    }

    /// Read the configured window once
    pub async fn read_once(&self) -> Result<ReadResult> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Read skipped, another read is in progress");
            return Err(RegsrvError::AlreadyInProgress);
        };

        let manager = self
            .manager
            .upgrade()
            .ok_or_else(|| RegsrvError::Internal("connection manager dropped".to_string()))?;
        let link = manager.active_link().ok_or(RegsrvError::NotConnected)?;

        let (start_address, count) = self.registers.read_parameters();
        if count == 0 {
            debug!("Register count is 0, nothing to read");
            return Ok(ReadResult::Paused);
        }

        match link
            .client
            .read_holding_registers(link.unit_id, start_address, count)
            .await
        {
            Ok(values) => {
                if manager.commit_values(link.session, start_address, values.clone()) {
                    info!("Read {} registers from address {}", count, start_address);
                    Ok(ReadResult::Stored(values))
                } else {
                    debug!("Read finished after the window or session changed, values dropped");
                    Ok(ReadResult::Discarded)
                }
            },
            Err(e) => {
                log_classified("Register read failed", &e);
                manager.record_read_error(link.session, e.to_string());
                // A closed socket means the link is gone even if the error
                // itself was a framing one
                if e.is_link_failure() || !link.client.is_connected() {
                    let _ = manager
                        .disconnect_session(
                            link.session,
                            DisconnectOrigin::ReadFailure,
                            Some(e.to_string()),
                        )
                        .await;
                }
                Err(e)
            },
        }
    }
}
