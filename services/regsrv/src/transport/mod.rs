//! Transport clients
//!
//! Two variants share the [`ModbusTransport`] contract: plain Modbus-TCP and
//! RTU framing tunneled through a TCP socket. Both own exactly one socket and
//! serialize connect, disconnect and every request/response exchange on it.

pub mod link;
pub mod rtu;
pub mod tcp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RegsrvError, Result};

pub use link::read_exact_within;
pub use rtu::RtuOverTcpClient;
pub use tcp::TcpClient;

/// Framing used on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    #[default]
    Tcp,
    RtuOverTcp,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Tcp => "tcp",
            TransportMode::RtuOverTcp => "rtu_over_tcp",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = RegsrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportMode::Tcp),
            "rtu_over_tcp" | "rtu-over-tcp" | "rtu" => Ok(TransportMode::RtuOverTcp),
            other => Err(RegsrvError::invalid_parameter(format!(
                "unknown transport mode '{}' (expected tcp or rtu_over_tcp)",
                other
            ))),
        }
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub disconnections: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub timeouts: u64,
    pub crc_errors: u64,
    pub exceptions: u64,
}

impl TransportStats {
    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts += 1;
    }

    pub fn record_successful_connection(&mut self) {
        self.successful_connections += 1;
    }

    pub fn record_failed_connection(&mut self) {
        self.failed_connections += 1;
    }

    pub fn record_disconnection(&mut self) {
        self.disconnections += 1;
    }

    pub fn record_bytes_sent(&mut self, bytes: usize) {
        self.requests_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_bytes_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }

    /// Classify the outcome of one exchange
    pub fn record_outcome<T>(&mut self, outcome: &Result<T>) {
        match outcome {
            Ok(_) => self.responses_received += 1,
            Err(RegsrvError::DeviceException { .. }) => {
                self.responses_received += 1;
                self.exceptions += 1;
            },
            Err(RegsrvError::ChecksumError { .. }) => self.crc_errors += 1,
            Err(RegsrvError::Timeout(_)) => self.timeouts += 1,
            Err(_) => {},
        }
    }
}

/// Shared contract of the transport clients
///
/// All methods take `&self`; the client is shared between the lifecycle
/// manager, the read coordinator and the keep-alive prober.
#[async_trait]
pub trait ModbusTransport: Send + Sync + fmt::Debug {
    fn mode(&self) -> TransportMode;

    /// Open the socket. Fails with `AlreadyConnected` when a socket is held,
    /// `ConnectionFailed` on refusal or timeout.
    async fn connect(&self, ip: &str, port: u16, timeout: Duration) -> Result<()>;

    /// Close the socket if present. Idempotent, never fails.
    async fn disconnect(&self);

    /// One complete "read holding registers" exchange
    async fn read_holding_registers(
        &self,
        unit_id: u8,
        start_address: u16,
        count: u16,
    ) -> Result<Vec<u16>>;

    fn is_connected(&self) -> bool;

    /// Time since the socket was opened, zero when disconnected
    fn uptime(&self) -> Duration;

    fn stats(&self) -> TransportStats;
}

/// Instantiate the client for `mode`
pub fn create_transport(mode: TransportMode, io_timeout: Duration) -> Arc<dyn ModbusTransport> {
    match mode {
        TransportMode::Tcp => Arc::new(TcpClient::new(io_timeout)),
        TransportMode::RtuOverTcp => Arc::new(RtuOverTcpClient::new(io_timeout)),
    }
}
