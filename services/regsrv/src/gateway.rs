//! Upward interface
//!
//! Plain-value operations for whatever front end drives the reader. Every
//! operation returns a result record with a human message; failures also
//! carry the machine-checkable [`ErrorInfo`].

use serde::Serialize;
use std::sync::Arc;

use errors::{log_classified, ErrorClass, ErrorInfo};

use crate::connection::{ConnectionManager, ConnectionStatus, LifecycleSettings};
use crate::error::Result;
use crate::reader::ReadResult;
use crate::registers::{RegisterCache, RegisterWindow};
use crate::transport::TransportMode;

/// Outcome of connect, disconnect and update_parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl OperationResult {
    fn from_result(context: &str, result: Result<String>) -> Self {
        match result {
            Ok(message) => Self {
                success: true,
                message,
                error: None,
            },
            Err(e) => {
                log_classified(context, &e);
                Self {
                    success: false,
                    message: e.to_string(),
                    error: Some(e.to_error_info()),
                }
            },
        }
    }
}

/// Outcome of a single read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone)]
pub struct RegisterGateway {
    manager: Arc<ConnectionManager>,
}

impl RegisterGateway {
    pub fn new(settings: LifecycleSettings, registers: RegisterCache) -> Self {
        Self {
            manager: ConnectionManager::new(settings, Arc::new(registers)),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub async fn connect(
        &self,
        ip: &str,
        port: u16,
        unit_id: u8,
        mode: TransportMode,
    ) -> OperationResult {
        OperationResult::from_result(
            "Connect rejected",
            self.manager.connect(ip, port, unit_id, mode).await,
        )
    }

    pub async fn disconnect(&self) -> OperationResult {
        OperationResult::from_result("Disconnect rejected", self.manager.disconnect().await)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    pub async fn read_once(&self) -> ReadOutcome {
        match self.manager.reader().read_once().await {
            Ok(ReadResult::Stored(values)) => ReadOutcome {
                success: true,
                message: format!("Read {} registers", values.len()),
                data: Some(values),
                error: None,
            },
            Ok(ReadResult::Paused) => ReadOutcome {
                success: true,
                message: "Register count is 0, nothing read".to_string(),
                data: None,
                error: None,
            },
            Ok(ReadResult::Discarded) => ReadOutcome {
                success: true,
                message: "Read window changed during the read, values dropped".to_string(),
                data: None,
                error: None,
            },
            // Already logged by the coordinator
            Err(e) => ReadOutcome {
                success: false,
                message: e.to_string(),
                data: None,
                error: Some(e.to_error_info()),
            },
        }
    }

    pub fn update_parameters(&self, start_address: u32, count: u32) -> OperationResult {
        let result = self
            .manager
            .registers()
            .update_parameters(start_address, count)
            .map(|changed| {
                if changed {
                    format!(
                        "Read window set to {} registers from address {}",
                        count, start_address
                    )
                } else {
                    "Read window unchanged".to_string()
                }
            });
        OperationResult::from_result("Parameter update rejected", result)
    }

    pub fn get_register_data(&self) -> RegisterWindow {
        self.manager.registers().read_data()
    }
}
