//! Basic library shared by the register reader services
//!
//! Provides:
//! - logging bootstrap (console + optional daily file)
//! - shutdown signal handling
//! - hex rendering of raw frames

pub mod hex;
pub mod logging;
pub mod shutdown;

pub use logging::{init_logging, LogConfig};
pub use shutdown::{shutdown_token, wait_for_shutdown};
