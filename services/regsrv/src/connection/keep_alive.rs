//! Keep-alive prober
//!
//! While connected, reads one register at address 0 every interval. Only a
//! socket-level failure ends the link; a device exception proves the device
//! is still answering. Failures that keep the link are kept in `last_error`.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RegsrvError;
use crate::transport::ModbusTransport;

use super::manager::{ConnectionManager, DisconnectOrigin};

const PROBE_ADDRESS: u16 = 0;
const PROBE_COUNT: u16 = 1;

#[derive(Debug)]
pub(crate) struct KeepAlive {
    pub manager: Weak<ConnectionManager>,
    pub session: u64,
    pub client: Arc<dyn ModbusTransport>,
    pub unit_id: u8,
    pub interval: Duration,
}

/// What a single probe outcome means for the link
#[derive(Debug, PartialEq, Eq)]
enum ProbeVerdict {
    Alive,
    Dead(String),
    Inconclusive,
}

fn judge(outcome: &Result<Vec<u16>, RegsrvError>, socket_open: bool) -> ProbeVerdict {
    match outcome {
        Ok(_) => ProbeVerdict::Alive,
        Err(RegsrvError::DeviceException { .. }) => ProbeVerdict::Alive,
        Err(e) if e.is_link_failure() || !socket_open => ProbeVerdict::Dead(e.to_string()),
        Err(_) => ProbeVerdict::Inconclusive,
    }
}

impl KeepAlive {
    pub(crate) async fn run(self, token: CancellationToken) {
        let mode = self.client.mode();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("[{}] Keep-alive started, interval {:?}", mode, self.interval);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {},
            }

            let outcome = tokio::select! {
                () = token.cancelled() => break,
                outcome = self.client.read_holding_registers(self.unit_id, PROBE_ADDRESS, PROBE_COUNT) => outcome,
            };

            let Some(manager) = self.manager.upgrade() else {
                break;
            };

            match judge(&outcome, self.client.is_connected()) {
                ProbeVerdict::Alive => {
                    if let Err(e) = &outcome {
                        warn!("[{}] Keep-alive answered with {}, link is alive", mode, e);
                        manager.record_read_error(self.session, format!("Keep-alive: {}", e));
                    } else {
                        debug!("[{}] Keep-alive ok", mode);
                    }
                    manager.stamp_keep_alive(self.session);
                },
                ProbeVerdict::Inconclusive => {
                    if let Err(e) = &outcome {
                        warn!("[{}] Keep-alive reply unusable: {}", mode, e);
                        manager.record_read_error(self.session, format!("Keep-alive: {}", e));
                    }
                },
                ProbeVerdict::Dead(cause) => {
                    warn!("[{}] Keep-alive failed, disconnecting: {}", mode, cause);
                    // Ignore NotConnected: a concurrent disconnect already won
                    let _ = manager
                        .disconnect_session(self.session, DisconnectOrigin::KeepAlive, Some(cause))
                        .await;
                    break;
                },
            }
        }

        debug!("[{}] Keep-alive stopped", mode);
    }
}
