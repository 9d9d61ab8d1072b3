//! Transport clients against real sockets

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::time::Duration;

use common::{DeviceFraming, MockDevice};
use regsrv::{create_transport, ModbusTransport, RegsrvError, TransportMode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_millis(500);

async fn connected(mode: TransportMode, port: u16) -> std::sync::Arc<dyn ModbusTransport> {
    let client = create_transport(mode, TIMEOUT);
    client.connect("127.0.0.1", port, TIMEOUT).await.unwrap();
    client
}

#[tokio::test]
async fn tcp_reads_full_window() {
    let device = MockDevice::start(DeviceFraming::Tcp).await;
    let client = connected(TransportMode::Tcp, device.port).await;

    let values = client.read_holding_registers(1, 0, 125).await.unwrap();
    assert_eq!(values, device.expected(0, 125));

    let values = client.read_holding_registers(1, 65_000, 3).await.unwrap();
    assert_eq!(values, device.expected(65_000, 3));

    let stats = client.stats();
    assert_eq!(stats.requests_sent, 2);
    assert_eq!(stats.responses_received, 2);
    // 7 + 2 + 250, then 7 + 2 + 6
    assert_eq!(stats.bytes_received, 259 + 15);
    client.disconnect().await;
}

#[tokio::test]
async fn rtu_reads_and_rejects_bad_crc() {
    let device = MockDevice::start(DeviceFraming::Rtu).await;
    let client = connected(TransportMode::RtuOverTcp, device.port).await;

    let values = client.read_holding_registers(7, 100, 10).await.unwrap();
    assert_eq!(values, device.expected(100, 10));

    device.corrupt_crc(true);
    let err = client.read_holding_registers(7, 100, 10).await.unwrap_err();
    assert!(matches!(err, RegsrvError::ChecksumError { .. }));
    assert!(client.is_connected());

    // The bad frame was consumed whole, the stream is still aligned
    device.corrupt_crc(false);
    let values = client.read_holding_registers(7, 0, 1).await.unwrap();
    assert_eq!(values, device.expected(0, 1));
    client.disconnect().await;
}

#[tokio::test]
async fn exception_replies_for_both_framings() {
    for (framing, mode) in [
        (DeviceFraming::Tcp, TransportMode::Tcp),
        (DeviceFraming::Rtu, TransportMode::RtuOverTcp),
    ] {
        let device = MockDevice::start(framing).await;
        device.reply_exception(Some(0x03));
        let client = connected(mode, device.port).await;

        let err = client.read_holding_registers(1, 0, 4).await.unwrap_err();
        assert_eq!(err, RegsrvError::DeviceException { code: 0x03 });
        assert!(client.is_connected(), "{mode} dropped the link");
        assert_eq!(client.stats().exceptions, 1);
        client.disconnect().await;
    }
}

#[tokio::test]
async fn slow_device_times_out_and_drops_socket() {
    let device = MockDevice::start(DeviceFraming::Tcp).await;
    device.delay_replies(Duration::from_secs(2));
    let client = connected(TransportMode::Tcp, device.port).await;

    let err = client.read_holding_registers(1, 0, 1).await.unwrap_err();
    assert!(matches!(err, RegsrvError::Timeout(_)));
    assert!(!client.is_connected());
    assert_eq!(client.uptime(), Duration::ZERO);
    assert_eq!(client.stats().timeouts, 1);

    let err = client.read_holding_registers(1, 0, 1).await.unwrap_err();
    assert_eq!(err, RegsrvError::NotConnected);
}

#[tokio::test]
async fn peer_close_is_connection_lost() {
    let device = MockDevice::start(DeviceFraming::Tcp).await;
    let client = connected(TransportMode::Tcp, device.port).await;
    assert!(client.read_holding_registers(1, 0, 1).await.is_ok());

    device.kill();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = client.read_holding_registers(1, 0, 1).await.unwrap_err();
    assert!(err.is_link_failure(), "unexpected {err:?}");
    assert!(!client.is_connected());
}

#[tokio::test]
async fn tcp_transaction_mismatch_is_drained() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let device = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = [0u8; 12];

        // First reply carries a foreign transaction id
        sock.read_exact(&mut req).await.unwrap();
        let tid = u16::from_be_bytes([req[0], req[1]]).wrapping_add(7);
        let mut reply = tid.to_be_bytes().to_vec();
        reply.extend_from_slice(&[0x00, 0x00, 0x00, 0x05, req[6], 0x03, 0x02, 0x12, 0x34]);
        sock.write_all(&reply).await.unwrap();

        // Second reply is correct
        sock.read_exact(&mut req).await.unwrap();
        let reply = [
            req[0], req[1], 0x00, 0x00, 0x00, 0x05, req[6], 0x03, 0x02, 0xBE, 0xEF,
        ];
        sock.write_all(&reply).await.unwrap();

        let mut sink = [0u8; 1];
        let _ = sock.read(&mut sink).await;
    });

    let client = connected(TransportMode::Tcp, port).await;
    let err = client.read_holding_registers(1, 0, 1).await.unwrap_err();
    assert!(matches!(err, RegsrvError::TransactionMismatch { .. }));
    assert!(client.is_connected());

    assert_eq!(
        client.read_holding_registers(1, 0, 1).await.unwrap(),
        vec![0xBEEF]
    );
    client.disconnect().await;
    device.await.unwrap();
}

#[tokio::test]
async fn concurrent_exchanges_do_not_interleave() {
    let device = MockDevice::start(DeviceFraming::Tcp).await;
    let client = connected(TransportMode::Tcp, device.port).await;

    let reads = (0..8u16).map(|i| {
        let client = client.clone();
        async move { (i, client.read_holding_registers(1, i * 10, 5).await) }
    });
    for (i, result) in futures::future::join_all(reads).await {
        assert_eq!(result.unwrap(), device.expected(i * 10, 5));
    }
    assert_eq!(device.requests(), 8);
    client.disconnect().await;
}
