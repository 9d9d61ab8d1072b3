//! Socket ownership shared by both transport clients
//!
//! `Link` holds the one `TcpStream` behind an async mutex. Every exchange
//! runs while holding [`LinkGuard`], so bytes of two requests never
//! interleave. A link-level failure during send or receive closes the
//! socket before the error is returned.

use common::hex::encode_spaced;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, info, warn};

use super::TransportStats;
use crate::error::{RegsrvError, Result};

/// Read exactly `len` bytes, looping over partial reads until `timeout`
///
/// Never returns a short buffer: either all bytes arrive or the call fails
/// with `Timeout` (deadline passed) or `ConnectionLost` (peer closed).
pub async fn read_exact_within<R>(reader: &mut R, len: usize, timeout: Duration) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        match tokio::time::timeout_at(deadline, reader.read(&mut buf[filled..])).await {
            Err(_) => {
                return Err(RegsrvError::timeout(format!(
                    "received {} of {} bytes within {:?}",
                    filled, len, timeout
                )));
            },
            Ok(Ok(0)) => {
                return Err(RegsrvError::connection_lost(format!(
                    "connection closed by peer after {} of {} bytes",
                    filled, len
                )));
            },
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    Ok(buf)
}

#[derive(Debug)]
pub(crate) struct Link {
    label: &'static str,
    io_timeout: Duration,
    stream: AsyncMutex<Option<TcpStream>>,
    connected_at: Mutex<Option<Instant>>,
    stats: Mutex<TransportStats>,
}

impl Link {
    pub(crate) fn new(label: &'static str, io_timeout: Duration) -> Self {
        Self {
            label,
            io_timeout,
            stream: AsyncMutex::new(None),
            connected_at: Mutex::new(None),
            stats: Mutex::new(TransportStats::default()),
        }
    }

    pub(crate) async fn connect(&self, ip: &str, port: u16, timeout: Duration) -> Result<()> {
        let mut slot = self.stream.lock().await;
        if slot.is_some() {
            return Err(RegsrvError::AlreadyConnected);
        }

        self.stats.lock().record_connection_attempt();
        debug!("[{}] Connecting to {}:{}", self.label, ip, port);

        match tokio::time::timeout(timeout, TcpStream::connect((ip, port))).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("[{}] Failed to set TCP_NODELAY: {}", self.label, e);
                }
                *slot = Some(stream);
                *self.connected_at.lock() = Some(Instant::now());
                self.stats.lock().record_successful_connection();
                info!("[{}] Connected to {}:{}", self.label, ip, port);
                Ok(())
            },
            Ok(Err(e)) => {
                self.stats.lock().record_failed_connection();
                Err(RegsrvError::connection_failed(format!(
                    "{}:{}: {}",
                    ip, port, e
                )))
            },
            Err(_) => {
                self.stats.lock().record_failed_connection();
                Err(RegsrvError::connection_failed(format!(
                    "{}:{}: timed out after {:?}",
                    ip, port, timeout
                )))
            },
        }
    }

    pub(crate) async fn disconnect(&self) {
        let mut slot = self.stream.lock().await;
        if let Some(mut stream) = slot.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("[{}] Error during socket shutdown: {}", self.label, e);
            }
            self.stats.lock().record_disconnection();
            info!("[{}] Disconnected", self.label);
        }
        *self.connected_at.lock() = None;
    }

    /// Take exclusive use of the socket for one exchange
    pub(crate) async fn lock(&self) -> Result<LinkGuard<'_>> {
        let slot = self.stream.lock().await;
        if slot.is_none() {
            return Err(RegsrvError::NotConnected);
        }
        Ok(LinkGuard { link: self, slot })
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected_at.lock().is_some()
    }

    pub(crate) fn uptime(&self) -> Duration {
        self.connected_at
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub(crate) fn stats(&self) -> TransportStats {
        self.stats.lock().clone()
    }

    pub(crate) fn record_outcome<T>(&self, outcome: &Result<T>) {
        self.stats.lock().record_outcome(outcome);
    }
}

pub(crate) struct LinkGuard<'a> {
    link: &'a Link,
    slot: MutexGuard<'a, Option<TcpStream>>,
}

impl LinkGuard<'_> {
    pub(crate) async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let label = self.link.label;
        let io_timeout = self.link.io_timeout;
        let stream = self.slot.as_mut().ok_or(RegsrvError::NotConnected)?;

        let result = match tokio::time::timeout(io_timeout, stream.write_all(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RegsrvError::from(e)),
            Err(_) => Err(RegsrvError::timeout(format!(
                "sending {} bytes took longer than {:?}",
                frame.len(),
                io_timeout
            ))),
        };

        match result {
            Ok(()) => {
                self.link.stats.lock().record_bytes_sent(frame.len());
                debug!(hex = %encode_spaced(frame), length = frame.len(), direction = "send", "[{}] Raw frame", label);
                Ok(())
            },
            Err(e) => {
                self.close(&e);
                Err(e)
            },
        }
    }

    pub(crate) async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let label = self.link.label;
        let io_timeout = self.link.io_timeout;
        let stream = self.slot.as_mut().ok_or(RegsrvError::NotConnected)?;

        match read_exact_within(stream, len, io_timeout).await {
            Ok(bytes) => {
                self.link.stats.lock().record_bytes_received(bytes.len());
                debug!(hex = %encode_spaced(&bytes), length = bytes.len(), direction = "recv", "[{}] Raw frame", label);
                Ok(bytes)
            },
            Err(e) => {
                if e.is_link_failure() {
                    self.close(&e);
                }
                Err(e)
            },
        }
    }

    // Drop the socket; the stream is closed when it goes out of scope
    fn close(&mut self, cause: &RegsrvError) {
        if self.slot.take().is_some() {
            *self.link.connected_at.lock() = None;
            self.link.stats.lock().record_disconnection();
            warn!("[{}] Socket closed after failure: {}", self.link.label, cause);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_exact_across_partial_reads() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[0x00, 0x01])
            .read(&[0x00])
            .read(&[0x00, 0x00, 0x05, 0x01])
            .build();
        let bytes = read_exact_within(&mut reader, 7, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01]);
    }

    #[tokio::test]
    async fn test_read_exact_peer_closed_is_connection_lost() {
        let mut reader = tokio_test::io::Builder::new().read(&[0x01, 0x03]).build();
        let err = read_exact_within(&mut reader, 5, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RegsrvError::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn test_read_exact_times_out_on_partial_data() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(&[0x01, 0x03]).await.unwrap();

        let err = read_exact_within(&mut client, 5, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RegsrvError::Timeout(_)));
        drop(server);
    }

    #[tokio::test]
    async fn test_read_exact_zero_len() {
        let mut reader = tokio_test::io::Builder::new().build();
        let bytes = read_exact_within(&mut reader, 0, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_link_lock_without_socket() {
        let link = Link::new("test", Duration::from_secs(1));
        assert!(matches!(link.lock().await, Err(RegsrvError::NotConnected)));
        assert!(!link.is_connected());
        assert_eq!(link.uptime(), Duration::ZERO);
        // Disconnect without a socket is a no-op
        link.disconnect().await;
        assert_eq!(link.stats().disconnections, 0);
    }

    #[tokio::test]
    async fn test_link_connect_refused() {
        // Bind then drop to get a port with no listener
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let link = Link::new("test", Duration::from_secs(1));
        let err = link
            .connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RegsrvError::ConnectionFailed { .. }));
        assert!(!link.is_connected());
        assert_eq!(link.stats().failed_connections, 1);
    }
}
