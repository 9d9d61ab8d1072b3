//! Modbus holding-register reader (regsrv)
//!
//! Reads holding registers (function 0x03) from one remote device over
//! standard Modbus-TCP or RTU framing tunneled through a TCP socket.
//!
//! # Architecture
//!
//! ```text
//! RegisterGateway ──► ConnectionManager ──► connect worker (retries)
//!        │                   │        └──► keep-alive prober
//!        │                   ▼
//!        └──────────► ReadCoordinator ──► ModbusTransport (TCP | RTU-over-TCP)
//!                            │                    │
//!                            ▼                    ▼
//!                      RegisterCache         frame codec
//! ```
//!
//! - **`protocol`**: pure frame building and parsing
//! - **`transport`**: one socket per client, serialized exchanges
//! - **`connection`**: connect/retry/keep-alive/disconnect state machine
//! - **`reader`**: single-flight on-demand reads
//! - **`registers`**: read window and last values
//! - **`gateway`**: plain-value result records for the layer above
//! - **`poller`**: optional periodic reads

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod poller;
pub mod protocol;
pub mod reader;
pub mod registers;
pub mod transport;

pub use config::AppConfig;
pub use connection::{ConnectionManager, ConnectionStatus, LifecycleSettings, LinkPhase};
pub use error::{RegsrvError, Result};
pub use gateway::{OperationResult, ReadOutcome, RegisterGateway};
pub use reader::{ReadCoordinator, ReadResult};
pub use registers::{RegisterCache, RegisterWindow};
pub use transport::{create_transport, ModbusTransport, TransportMode, TransportStats};
