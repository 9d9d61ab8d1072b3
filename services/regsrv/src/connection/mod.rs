//! Connection lifecycle
//!
//! `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`
//!
//! - [`manager`]: the state owner and public entry points
//! - [`worker`]: bounded connect retries on a background task
//! - [`keep_alive`]: periodic liveness probe while connected
//! - [`state`]: the guarded state record and its snapshot

pub mod keep_alive;
pub mod manager;
pub mod state;
pub mod worker;

pub use manager::{ConnectionManager, DisconnectOrigin, LifecycleSettings};
pub use state::{ConnectionStatus, LinkPhase, Target};
pub use worker::{RetryPolicy, WorkerResult};
