//! Modbus-TCP client
//!
//! Requests carry an MBAP header with a transaction id that the device must
//! echo. The id restarts at 1 after every connect.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::link::Link;
use super::{ModbusTransport, TransportMode, TransportStats};
use crate::error::{RegsrvError, Result};
use crate::protocol::constants::MBAP_HEADER_LEN;
use crate::protocol::{encode_request, parse_response, Framing, MbapHeader, ReadRequest};

#[derive(Debug)]
pub struct TcpClient {
    link: Link,
    transaction_id: AtomicU16,
}

impl TcpClient {
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            link: Link::new("TCP", io_timeout),
            transaction_id: AtomicU16::new(0),
        }
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    async fn exchange(&self, request: &ReadRequest) -> Result<Vec<u16>> {
        let mut io = self.link.lock().await?;
        let transaction_id = self.next_transaction_id();
        let framing = Framing::Tcp { transaction_id };

        io.send(&encode_request(framing, request)).await?;

        let mut frame = io.read_exact(MBAP_HEADER_LEN).await?;
        let header = MbapHeader::from_bytes(&frame)?;

        // Always consume the announced body so the stream stays aligned,
        // whatever is wrong with the header
        let body = io.read_exact(header.remaining()).await?;

        if header.transaction_id != transaction_id {
            warn!(
                expected = transaction_id,
                received = header.transaction_id,
                drained = body.len(),
                "[TCP] Transaction id mismatch, response discarded"
            );
            return Err(RegsrvError::TransactionMismatch {
                expected: transaction_id,
                received: header.transaction_id,
            });
        }

        frame.extend_from_slice(&body);
        parse_response(framing, &frame, request)
    }
}

#[async_trait]
impl ModbusTransport for TcpClient {
    fn mode(&self) -> TransportMode {
        TransportMode::Tcp
    }

    async fn connect(&self, ip: &str, port: u16, timeout: Duration) -> Result<()> {
        self.link.connect(ip, port, timeout).await?;
        self.transaction_id.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) {
        self.link.disconnect().await;
    }

    async fn read_holding_registers(
        &self,
        unit_id: u8,
        start_address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let request = ReadRequest::new(unit_id, start_address, count)?;
        let outcome = self.exchange(&request).await;
        self.link.record_outcome(&outcome);
        if let Err(e) = &outcome {
            debug!("[TCP] Read {}@{} failed: {}", count, start_address, e);
        }
        outcome
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn uptime(&self) -> Duration {
        self.link.uptime()
    }

    fn stats(&self) -> TransportStats {
        self.link.stats()
    }
}
