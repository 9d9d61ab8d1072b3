//! Background connect worker
//!
//! Retries the real transport connect with a fixed delay and reports exactly
//! one [`WorkerResult`] through a one-shot channel. The cancellation token is
//! checked before every attempt, during the attempt and during the wait.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use errors::ErrorClass;

use crate::error::RegsrvError;
use crate::transport::ModbusTransport;

/// Fixed-delay retry policy for the connect sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of one connect sequence
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub success: bool,
    pub error: Option<RegsrvError>,
    pub message: String,
}

impl WorkerResult {
    fn connected(message: String) -> Self {
        Self {
            success: true,
            error: None,
            message,
        }
    }

    fn failed(error: RegsrvError, message: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            message,
        }
    }
}

/// Everything the worker needs for one connect sequence
#[derive(Debug)]
pub(crate) struct ConnectJob {
    pub client: Arc<dyn ModbusTransport>,
    pub ip: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub policy: RetryPolicy,
}

/// Run the connect sequence and deliver its result
///
/// A dropped receiver is not an error: the monitor is gone because the
/// attempt was abandoned.
pub(crate) async fn run_connect_worker(
    job: ConnectJob,
    token: CancellationToken,
    result_tx: oneshot::Sender<WorkerResult>,
) {
    let result = connect_with_retry(&job, &token).await;
    if result_tx.send(result).is_err() {
        debug!("Connect worker result dropped, monitor already gone");
    }
}

async fn connect_with_retry(job: &ConnectJob, token: &CancellationToken) -> WorkerResult {
    let mode = job.client.mode();
    let max_attempts = job.policy.max_attempts.max(1);
    let mut last_error = RegsrvError::Cancelled;

    for attempt in 1..=max_attempts {
        if token.is_cancelled() {
            return cancelled(attempt - 1);
        }

        info!(
            "[{}] Connect attempt {}/{} to {}:{}",
            mode, attempt, max_attempts, job.ip, job.port
        );

        let outcome = tokio::select! {
            () = token.cancelled() => return cancelled(attempt),
            outcome = job.client.connect(&job.ip, job.port, job.connect_timeout) => outcome,
        };

        match outcome {
            Ok(()) => {
                // Cancel may have landed while the socket was being opened
                if token.is_cancelled() {
                    job.client.disconnect().await;
                    return cancelled(attempt);
                }
                return WorkerResult::connected(format!(
                    "Connected to {}:{} ({})",
                    job.ip, job.port, mode
                ));
            },
            Err(e) => {
                warn!(
                    "[{}] Connect attempt {}/{} failed: {}",
                    mode, attempt, max_attempts, e
                );
                let retryable = e.is_retryable();
                last_error = e;
                if !retryable {
                    break;
                }
            },
        }

        if attempt < max_attempts {
            tokio::select! {
                () = token.cancelled() => return cancelled(attempt),
                () = tokio::time::sleep(job.policy.delay) => {},
            }
        }
    }

    let message = format!(
        "Connection failed after {} attempts: {}",
        max_attempts, last_error
    );
    WorkerResult::failed(last_error, message)
}

fn cancelled(attempts: u32) -> WorkerResult {
    info!("Connect sequence cancelled after {} attempts", attempts);
    WorkerResult::failed(
        RegsrvError::Cancelled,
        "Connection attempt cancelled".to_string(),
    )
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::{create_transport, TransportMode};
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn job(port: u16, max_attempts: u32, delay: Duration) -> ConnectJob {
        ConnectJob {
            client: create_transport(TransportMode::Tcp, Duration::from_secs(1)),
            ip: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_millis(500),
            policy: RetryPolicy {
                max_attempts,
                delay,
            },
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connects_first_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let job = job(port, 6, Duration::from_millis(10));
        let client = job.client.clone();

        let (tx, rx) = oneshot::channel();
        run_connect_worker(job, CancellationToken::new(), tx).await;
        let result = rx.await.unwrap();

        assert!(result.success, "{}", result.message);
        assert!(result.message.starts_with("Connected to 127.0.0.1"));
        assert!(client.is_connected());
        assert_eq!(client.stats().connection_attempts, 1);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let job = job(closed_port().await, 3, Duration::from_millis(10));
        let client = job.client.clone();

        let (tx, rx) = oneshot::channel();
        run_connect_worker(job, CancellationToken::new(), tx).await;
        let result = rx.await.unwrap();

        assert!(!result.success);
        assert!(matches!(
            result.error,
            Some(RegsrvError::ConnectionFailed { .. })
        ));
        assert!(result.message.contains("after 3 attempts"));
        assert_eq!(client.stats().connection_attempts, 3);
    }

    #[tokio::test]
    async fn test_cancel_during_wait() {
        let job = job(closed_port().await, 6, Duration::from_secs(30));
        let client = job.client.clone();
        let token = CancellationToken::new();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(run_connect_worker(job, token.clone(), tx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("worker should stop promptly")
            .unwrap();
        assert_eq!(result.error, Some(RegsrvError::Cancelled));
        assert_eq!(client.stats().connection_attempts, 1);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let job = job(closed_port().await, 6, Duration::from_millis(10));
        let client = job.client.clone();
        let token = CancellationToken::new();
        token.cancel();

        let (tx, rx) = oneshot::channel();
        run_connect_worker(job, token, tx).await;
        assert_eq!(rx.await.unwrap().error, Some(RegsrvError::Cancelled));
        assert_eq!(client.stats().connection_attempts, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_ignored() {
        let job = job(closed_port().await, 1, Duration::from_millis(10));
        let (tx, rx) = oneshot::channel();
        drop(rx);
        run_connect_worker(job, CancellationToken::new(), tx).await;
    }
}
