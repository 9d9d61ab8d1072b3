//! RTU framing tunneled over a TCP socket
//!
//! The reply length is computed from the requested count, never from the
//! byte-count field the device sends. A disagreeing byte count is reported as
//! a malformed response after the CRC has been checked.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::link::Link;
use super::{ModbusTransport, TransportMode, TransportStats};
use crate::error::Result;
use crate::protocol::constants::{CRC_LEN, EXCEPTION_FLAG};
use crate::protocol::{encode_request, parse_response, Framing, ReadRequest};

#[derive(Debug)]
pub struct RtuOverTcpClient {
    link: Link,
}

impl RtuOverTcpClient {
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            link: Link::new("RTU-over-TCP", io_timeout),
        }
    }

    /// Bytes still expected after unit id and function code
    fn remaining_len(function_code: u8, request: &ReadRequest) -> usize {
        if function_code & EXCEPTION_FLAG != 0 {
            // exception code + crc
            1 + CRC_LEN
        } else {
            // byte count + data + crc
            1 + request.data_len() + CRC_LEN
        }
    }

    async fn exchange(&self, request: &ReadRequest) -> Result<Vec<u16>> {
        let mut io = self.link.lock().await?;

        io.send(&encode_request(Framing::Rtu, request)).await?;

        let mut frame = io.read_exact(2).await?;
        let rest = io
            .read_exact(Self::remaining_len(frame[1], request))
            .await?;
        frame.extend_from_slice(&rest);

        parse_response(Framing::Rtu, &frame, request)
    }
}

#[async_trait]
impl ModbusTransport for RtuOverTcpClient {
    fn mode(&self) -> TransportMode {
        TransportMode::RtuOverTcp
    }

    async fn connect(&self, ip: &str, port: u16, timeout: Duration) -> Result<()> {
        self.link.connect(ip, port, timeout).await
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
            debug!("[RTU-over-TCP] Read {}@{} failed: {}", count, start_address, e);
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
