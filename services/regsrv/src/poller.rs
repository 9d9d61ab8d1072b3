//! Periodic polling
//!
//! Optional background loop that triggers a read every interval while the
//! link is up. An interval of zero pauses the loop without stopping it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::ConnectionManager;
use crate::error::{RegsrvError, Result};

/// Shortest accepted polling interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn validate_interval(interval: Duration) -> Result<()> {
    if !interval.is_zero() && interval < MIN_POLL_INTERVAL {
        return Err(RegsrvError::invalid_parameter(format!(
            "poll interval {:?} below minimum {:?} (use 0 to disable)",
            interval, MIN_POLL_INTERVAL
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct PollerHandle {
    token: CancellationToken,
    interval_tx: watch::Sender<Duration>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Change the period; takes effect immediately
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        validate_interval(interval)?;
        self.interval_tx.send_replace(interval);
        info!("Poll interval set to {:?}", interval);
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Cancel the loop and wait for it to exit
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            warn!("Poller task ended abnormally: {}", e);
        }
    }
}

/// Start the polling loop
///
/// `shutdown` is a parent token; cancelling it also stops the poller.
pub fn spawn_poller(
    manager: Arc<ConnectionManager>,
    interval: Duration,
    shutdown: &CancellationToken,
) -> Result<PollerHandle> {
    validate_interval(interval)?;
    let token = shutdown.child_token();
    let (interval_tx, interval_rx) = watch::channel(interval);
    let join = tokio::spawn(poll_loop(manager, interval_rx, token.clone()));
    Ok(PollerHandle {
        token,
        interval_tx,
        join,
    })
}

async fn poll_loop(
    manager: Arc<ConnectionManager>,
    mut interval_rx: watch::Receiver<Duration>,
    token: CancellationToken,
) {
    info!("Poller started");
    loop {
        let period = *interval_rx.borrow_and_update();

        if period.is_zero() {
            tokio::select! {
                () = token.cancelled() => break,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                },
            }
        }

        tokio::select! {
            () = token.cancelled() => break,
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            },
            () = tokio::time::sleep(period) => {},
        }

        if !manager.is_connected() {
            trace!("Poll skipped, not connected");
            continue;
        }

        match manager.reader().read_once().await {
            Ok(_) => trace!("Poll read done"),
            Err(RegsrvError::AlreadyInProgress) => debug!("Poll skipped, read in progress"),
            // Logged and recorded by the read coordinator
            Err(_) => {},
        }
    }
    info!("Poller stopped");
}
