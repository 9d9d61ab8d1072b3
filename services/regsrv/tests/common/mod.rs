//! In-process Modbus device for integration tests
//!
//! Listens on 127.0.0.1 with an ephemeral port and answers "read holding
//! registers" from a register image. Faults can be switched on at runtime.

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use regsrv::connection::{LifecycleSettings, RetryPolicy};
use regsrv::protocol::crc16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFraming {
    Tcp,
    Rtu,
}

#[derive(Debug)]
struct Faults {
    corrupt_crc: AtomicBool,
    exception: Mutex<Option<u8>>,
    delay_ms: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub port: u16,
    memory: Arc<Vec<u16>>,
    faults: Arc<Faults>,
    requests: Arc<AtomicUsize>,
    drop_links: CancellationToken,
}

impl MockDevice {
    /// Start a device whose register N holds the value `N * 3 + 1`
    pub async fn start(framing: DeviceFraming) -> Self {
        let memory: Vec<u16> = (0..=u16::MAX).map(|n| n.wrapping_mul(3).wrapping_add(1)).collect();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let device = Self {
            port: listener.local_addr().unwrap().port(),
            memory: Arc::new(memory),
            faults: Arc::new(Faults {
                corrupt_crc: AtomicBool::new(false),
                exception: Mutex::new(None),
                delay_ms: AtomicU64::new(0),
            }),
            requests: Arc::new(AtomicUsize::new(0)),
            drop_links: CancellationToken::new(),
        };

        let server = device.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = server.drop_links.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((sock, _)) = accepted else { break };
                        let conn = server.clone();
                        tokio::spawn(async move { conn.serve(sock, framing).await });
                    },
                }
            }
        });

        device
    }

    pub fn expected(&self, start: u16, count: u16) -> Vec<u16> {
        let start = start as usize;
        self.memory[start..start + count as usize].to_vec()
    }

    pub fn corrupt_crc(&self, on: bool) {
        self.faults.corrupt_crc.store(on, Ordering::SeqCst);
    }

    pub fn reply_exception(&self, code: Option<u8>) {
        *self.faults.exception.lock() = code;
    }

    pub fn delay_replies(&self, delay: Duration) {
        self.faults
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Close every open connection and stop accepting new ones
    pub fn kill(&self) {
        self.drop_links.cancel();
    }

    async fn serve(&self, mut sock: TcpStream, framing: DeviceFraming) {
        let request_len = match framing {
            DeviceFraming::Tcp => 12,
            DeviceFraming::Rtu => 8,
        };
        loop {
            let mut req = vec![0u8; request_len];
            tokio::select! {
                () = self.drop_links.cancelled() => return,
                read = sock.read_exact(&mut req) => {
                    if read.is_err() {
                        return;
                    }
                },
            }
            self.requests.fetch_add(1, Ordering::SeqCst);

            let delay = self.faults.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let reply = match framing {
                DeviceFraming::Tcp => self.tcp_reply(&req),
                DeviceFraming::Rtu => self.rtu_reply(&req),
            };
            if sock.write_all(&reply).await.is_err() {
                return;
            }
        }
    }

    /// Function code plus payload for a request PDU
    fn pdu_reply(&self, pdu: &[u8]) -> Vec<u8> {
        let start = u16::from_be_bytes([pdu[1], pdu[2]]);
        let count = u16::from_be_bytes([pdu[3], pdu[4]]);

        if let Some(code) = *self.faults.exception.lock() {
            return vec![pdu[0] | 0x80, code];
        }
        if start as usize + count as usize > self.memory.len() {
            return vec![pdu[0] | 0x80, 0x02];
        }

        let mut out = vec![pdu[0], (count * 2) as u8];
        for value in self.expected(start, count) {
            out.extend_from_slice(&value.to_be_bytes());
        }
        out
    }

    fn tcp_reply(&self, req: &[u8]) -> Vec<u8> {
        let pdu = self.pdu_reply(&req[7..12]);
        let mut out = vec![req[0], req[1], 0x00, 0x00];
        out.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
        out.push(req[6]);
        out.extend_from_slice(&pdu);
        out
    }

    fn rtu_reply(&self, req: &[u8]) -> Vec<u8> {
        let mut out = vec![req[0]];
        out.extend_from_slice(&self.pdu_reply(&req[1..6]));
        let mut crc = crc16(&out);
        if self.faults.corrupt_crc.load(Ordering::SeqCst) {
            crc ^= 0xFFFF;
        }
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }
}

/// A port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Lifecycle timing scaled down for tests
pub fn fast_settings() -> LifecycleSettings {
    LifecycleSettings {
        connect_timeout: Duration::from_millis(500),
        io_timeout: Duration::from_millis(500),
        probe_before_connect: true,
        probe_timeout: Duration::from_millis(300),
        retry: RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(50),
        },
        keep_alive_interval: Duration::from_secs(60),
        worker_join_timeout: Duration::from_secs(2),
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
