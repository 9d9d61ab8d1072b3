//! Connection lifecycle manager
//!
//! Owns the connection state, the live transport client and the background
//! tasks of the current session. State transitions happen under one
//! `parking_lot` mutex that is never held across an await point.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RegsrvError, Result};
use crate::reader::ReadCoordinator;
use crate::registers::RegisterCache;
use crate::transport::{create_transport, ModbusTransport, TransportMode};

use super::keep_alive::KeepAlive;
use super::state::{ConnectionState, ConnectionStatus, LinkPhase, Target};
use super::worker::{run_connect_worker, ConnectJob, RetryPolicy, WorkerResult};

/// Timing knobs of the lifecycle
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub probe_before_connect: bool,
    pub probe_timeout: Duration,
    pub retry: RetryPolicy,
    pub keep_alive_interval: Duration,
    pub worker_join_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            probe_before_connect: true,
            probe_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            keep_alive_interval: Duration::from_secs(15),
            worker_join_timeout: Duration::from_secs(3),
        }
    }
}

/// Who asked for the disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOrigin {
    Request,
    KeepAlive,
    ReadFailure,
}

impl DisconnectOrigin {
    fn message(&self) -> &'static str {
        match self {
            DisconnectOrigin::Request => "Disconnected successfully",
            DisconnectOrigin::KeepAlive => "Connection lost (keep-alive failed)",
            DisconnectOrigin::ReadFailure => "Connection lost (read failed)",
        }
    }
}

/// The client, unit and session of an established link
#[derive(Debug, Clone)]
pub(crate) struct ActiveLink {
    pub client: Arc<dyn ModbusTransport>,
    pub unit_id: u8,
    pub session: u64,
}

#[derive(Debug)]
struct WorkerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Inner {
    state: ConnectionState,
    client: Option<Arc<dyn ModbusTransport>>,
    worker: Option<WorkerHandle>,
    keep_alive: Option<CancellationToken>,
}

#[derive(Debug)]
pub struct ConnectionManager {
    settings: LifecycleSettings,
    registers: Arc<RegisterCache>,
    reader: Arc<ReadCoordinator>,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(settings: LifecycleSettings, registers: Arc<RegisterCache>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| Self {
            settings,
            reader: Arc::new(ReadCoordinator::new(weak.clone(), registers.clone())),
            registers,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn registers(&self) -> &Arc<RegisterCache> {
        &self.registers
    }

    pub fn reader(&self) -> &Arc<ReadCoordinator> {
        &self.reader
    }

    /// Start a connect sequence
    ///
    /// Returns as soon as the worker is running; the outcome shows up in
    /// [`status`](Self::status). Fails fast when the probe cannot reach the
    /// target.
    pub async fn connect(
        self: &Arc<Self>,
        ip: &str,
        port: u16,
        unit_id: u8,
        mode: TransportMode,
    ) -> Result<String> {
        let ip = ip.trim();
        if ip.is_empty() {
            return Err(RegsrvError::invalid_parameter("ip must not be empty"));
        }
        if port == 0 {
            return Err(RegsrvError::invalid_parameter("port must be 1-65535"));
        }
        self.inner.lock().state.ensure_idle()?;

        let target = Target {
            ip: ip.to_string(),
            port,
            unit_id,
            mode,
        };
        info!(
            "Connect request: {}:{} unit {} mode {}",
            ip, port, unit_id, mode
        );

        if self.settings.probe_before_connect {
            if let Err(cause) = probe(ip, port, self.settings.probe_timeout).await {
                let err = RegsrvError::connection_failed(format!(
                    "Pre-check failed: {}:{} unreachable ({})",
                    ip, port, cause
                ));
                warn!("{}", err);
                self.inner
                    .lock()
                    .state
                    .record_probe_failure(target, err.to_string());
                return Err(err);
            }
            debug!("Pre-check passed for {}:{}", ip, port);
        }

        let client = create_transport(mode, self.settings.io_timeout);
        let token = CancellationToken::new();
        let (result_tx, result_rx) = oneshot::channel();

        let session = {
            let mut inner = self.inner.lock();
            let session = inner.state.begin_connect(target)?;
            let job = ConnectJob {
                client: client.clone(),
                ip: ip.to_string(),
                port,
                connect_timeout: self.settings.connect_timeout,
                policy: self.settings.retry,
            };
            let join = tokio::spawn(run_connect_worker(job, token.clone(), result_tx));
            inner.client = Some(client.clone());
            inner.worker = Some(WorkerHandle { token, join });
            session
        };

        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let result = match result_rx.await {
                Ok(result) => result,
                Err(_) => WorkerResult {
                    success: false,
                    error: Some(RegsrvError::Internal("connect worker vanished".to_string())),
                    message: "Connect worker stopped without a result".to_string(),
                },
            };
            if let Some(manager) = manager.upgrade() {
                manager.finish_connect(session, client, result).await;
            } else {
                client.disconnect().await;
            }
        });

        Ok(format!("Connection process ({}) started", mode))
    }

    /// Monitor side of a connect sequence
    async fn finish_connect(
        self: Arc<Self>,
        session: u64,
        client: Arc<dyn ModbusTransport>,
        result: WorkerResult,
    ) {
        if !result.success {
            let error = result
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| result.message.clone());
            let mut inner = self.inner.lock();
            if inner.state.fail_connect(session, result.message.clone(), error) {
                inner.client = None;
                inner.worker = None;
                error!("{}", result.message);
            } else {
                debug!("Stale connect result ignored: {}", result.message);
            }
            return;
        }

        let established = {
            let mut inner = self.inner.lock();
            if inner.state.mark_connected(session, &result.message) {
                inner.worker = None;
                let unit_id = inner.state.target().map(|t| t.unit_id).unwrap_or_default();
                let token = CancellationToken::new();
                let prober = KeepAlive {
                    manager: Arc::downgrade(&self),
                    session,
                    client: client.clone(),
                    unit_id,
                    interval: self.settings.keep_alive_interval,
                };
                tokio::spawn(prober.run(token.clone()));
                inner.keep_alive = Some(token);
                true
            } else {
                false
            }
        };

        if !established {
            // Superseded by a disconnect while the socket was opening
            debug!("Connect result for an abandoned session, closing socket");
            client.disconnect().await;
            return;
        }

        info!("{}", result.message);
        match self.reader.read_once().await {
            Ok(_) | Err(RegsrvError::AlreadyInProgress) => {},
            Err(e) => {
                self.inner
                    .lock()
                    .state
                    .set_last_error(session, format!("Initial read failed: {}", e));
            },
        }
    }

    /// Tear down the current session, whatever its phase
    pub async fn disconnect(&self) -> Result<String> {
        self.disconnect_from(DisconnectOrigin::Request, None, None).await
    }

    /// Tear down `session` only if it is still the current one
    pub(crate) async fn disconnect_session(
        &self,
        session: u64,
        origin: DisconnectOrigin,
        cause: Option<String>,
    ) -> Result<String> {
        self.disconnect_from(origin, cause, Some(session)).await
    }

    async fn disconnect_from(
        &self,
        origin: DisconnectOrigin,
        cause: Option<String>,
        session: Option<u64>,
    ) -> Result<String> {
        let (worker, client, keep_alive) = {
            let mut inner = self.inner.lock();
            if session.is_some_and(|s| s != inner.state.session()) {
                return Err(RegsrvError::NotConnected);
            }
            let previous = inner.state.begin_disconnect()?;
            info!(
                "Disconnecting ({:?}) from phase {}",
                origin,
                previous.as_str()
            );
            (
                inner.worker.take(),
                inner.client.take(),
                inner.keep_alive.take(),
            )
        };

        if let Some(token) = keep_alive {
            token.cancel();
        }

        if let Some(worker) = worker {
            worker.token.cancel();
            match tokio::time::timeout(self.settings.worker_join_timeout, worker.join).await {
                Ok(Ok(())) => debug!("Connect worker joined"),
                Ok(Err(e)) => warn!("Connect worker ended abnormally: {}", e),
                Err(_) => warn!(
                    "Connect worker did not stop within {:?}, detaching it",
                    self.settings.worker_join_timeout
                ),
            }
        }

        if let Some(client) = client {
            client.disconnect().await;
        }
        self.registers.clear();

        let message = origin.message().to_string();
        self.inner.lock().state.reset(message.clone(), cause);
        info!("{}", message);
        Ok(message)
    }

    /// Snapshot with uptime and counters taken from the live client
    pub fn status(&self) -> ConnectionStatus {
        let inner = self.inner.lock();
        let (uptime, stats) = match &inner.client {
            Some(client) => (client.uptime(), Some(client.stats())),
            None => (Duration::ZERO, None),
        };
        inner.state.snapshot(uptime, stats)
    }

    pub fn phase(&self) -> LinkPhase {
        self.inner.lock().state.phase()
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == LinkPhase::Connected
    }

    /// Whether a connect worker of the current session is still running
    pub fn worker_active(&self) -> bool {
        self.inner
            .lock()
            .worker
            .as_ref()
            .is_some_and(|w| !w.join.is_finished())
    }

    pub(crate) fn active_link(&self) -> Option<ActiveLink> {
        let inner = self.inner.lock();
        if inner.state.phase() != LinkPhase::Connected {
            return None;
        }
        let client = inner.client.clone()?;
        let unit_id = inner.state.target()?.unit_id;
        Some(ActiveLink {
            client,
            unit_id,
            session: inner.state.session(),
        })
    }

    /// Store read values unless the session ended while reading
    pub(crate) fn commit_values(&self, session: u64, start_address: u16, values: Vec<u16>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.is_connected_session(session) {
            return false;
        }
        inner.state.clear_last_error(session);
        self.registers.update_values(start_address, values)
    }

    pub(crate) fn record_read_error(&self, session: u64, message: String) {
        self.inner.lock().state.set_last_error(session, message);
    }

    pub(crate) fn stamp_keep_alive(&self, session: u64) {
        self.inner
            .lock()
            .state
            .stamp_keep_alive(session, chrono::Utc::now());
    }
}

/// Best-effort reachability check: open and immediately drop a socket
async fn probe(ip: &str, port: u16, timeout: Duration) -> std::result::Result<(), String> {
    match tokio::time::timeout(timeout, TcpStream::connect((ip, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Ok(())
        },
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no answer within {:?}", timeout)),
    }
}
