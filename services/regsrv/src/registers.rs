//! Register cache
//!
//! Holds the configured read window and the values of the most recent
//! successful read. Values are always either empty or exactly `count` long
//! and belong to the window they were read with.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RegsrvError, Result};
use crate::protocol::constants::MAX_READ_REGISTERS;

/// Default window start
pub const DEFAULT_START_ADDRESS: u16 = 0;
/// Default window size
pub const DEFAULT_COUNT: u16 = 10;

/// Snapshot of the read window and its last values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWindow {
    pub start_address: u16,
    pub count: u16,
    pub values: Vec<u16>,
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for RegisterWindow {
    fn default() -> Self {
        Self {
            start_address: DEFAULT_START_ADDRESS,
            count: DEFAULT_COUNT,
            values: Vec::new(),
            last_update: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RegisterCache {
    window: RwLock<RegisterWindow>,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache with a validated initial window
    pub fn with_window(start_address: u32, count: u32) -> Result<Self> {
        let (start_address, count) = validate_window(start_address, count)?;
        Ok(Self {
            window: RwLock::new(RegisterWindow {
                start_address,
                count,
                ..RegisterWindow::default()
            }),
        })
    }

    /// Change the window. Values are dropped only when the window changes.
    ///
    /// Returns `true` when the window changed.
    pub fn update_parameters(&self, start_address: u32, count: u32) -> Result<bool> {
        let (start_address, count) = validate_window(start_address, count)?;

        let mut window = self.window.write();
        if window.start_address == start_address && window.count == count {
            debug!(start_address, count, "Read window unchanged");
            return Ok(false);
        }

        window.start_address = start_address;
        window.count = count;
        window.values.clear();
        window.last_update = None;
        info!(start_address, count, "Read window updated, cached values cleared");
        Ok(true)
    }

    /// Store the values of a successful read of `(start_address, count)`
    ///
    /// Values read for a window that was replaced while the read was in
    /// flight are discarded; returns `false` in that case.
    pub fn update_values(&self, start_address: u16, values: Vec<u16>) -> bool {
        let mut window = self.window.write();
        if window.start_address != start_address || window.count as usize != values.len() {
            debug!(
                start_address,
                received = values.len(),
                "Discarding values read for a stale window"
            );
            return false;
        }
        window.values = values;
        window.last_update = Some(Utc::now());
        true
    }

    /// `(start_address, count)`
    pub fn read_parameters(&self) -> (u16, u16) {
        let window = self.window.read();
        (window.start_address, window.count)
    }

    pub fn read_data(&self) -> RegisterWindow {
        self.window.read().clone()
    }

    /// Drop values and timestamp, keep the window
    pub fn clear(&self) {
        let mut window = self.window.write();
        window.values.clear();
        window.last_update = None;
    }
}

fn validate_window(start_address: u32, count: u32) -> Result<(u16, u16)> {
    let start = u16::try_from(start_address).map_err(|_| {
        RegsrvError::invalid_parameter(format!(
            "start address {} out of range (0-65535)",
            start_address
        ))
    })?;
    if count > MAX_READ_REGISTERS as u32 {
        return Err(RegsrvError::invalid_parameter(format!(
            "register count {} out of range (0-{})",
            count, MAX_READ_REGISTERS
        )));
    }
    Ok((start, count as u16))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cache = RegisterCache::new();
        assert_eq!(cache.read_parameters(), (0, 10));
        let data = cache.read_data();
        assert!(data.values.is_empty());
        assert!(data.last_update.is_none());
    }

    #[test]
    fn test_update_values_stamps_time() {
        let cache = RegisterCache::with_window(100, 3).unwrap();
        assert!(cache.update_values(100, vec![1, 2, 3]));
        let data = cache.read_data();
        assert_eq!(data.values, vec![1, 2, 3]);
        assert!(data.last_update.is_some());
    }

    #[test]
    fn test_changed_window_invalidates_values() {
        let cache = RegisterCache::new();
        cache.update_values(0, (0..10).collect());

        assert!(cache.update_parameters(0, 5).unwrap());
        let data = cache.read_data();
        assert!(data.values.is_empty());
        assert!(data.last_update.is_none());
        assert_eq!((data.start_address, data.count), (0, 5));

        cache.update_values(0, vec![9; 5]);
        assert!(cache.update_parameters(1, 5).unwrap());
        assert!(cache.read_data().values.is_empty());
    }

    #[test]
    fn test_identical_window_keeps_values() {
        let cache = RegisterCache::new();
        cache.update_values(0, (0..10).collect());
        assert!(!cache.update_parameters(0, 10).unwrap());
        let data = cache.read_data();
        assert_eq!(data.values.len(), 10);
        assert!(data.last_update.is_some());
    }

    #[test]
    fn test_window_validation() {
        let cache = RegisterCache::new();
        assert!(matches!(
            cache.update_parameters(65536, 1),
            Err(RegsrvError::InvalidParameter(_))
        ));
        assert!(matches!(
            cache.update_parameters(0, 126),
            Err(RegsrvError::InvalidParameter(_))
        ));
        // Zero is the paused state
        assert!(cache.update_parameters(65535, 0).is_ok());
        assert_eq!(cache.read_parameters(), (65535, 0));
        assert!(RegisterCache::with_window(0, 200).is_err());
    }

    #[test]
    fn test_stale_values_discarded() {
        let cache = RegisterCache::new();
        cache.update_parameters(20, 2).unwrap();
        assert!(!cache.update_values(0, (0..10).collect()));
        assert!(!cache.update_values(20, vec![1]));
        assert!(cache.read_data().values.is_empty());
    }

    #[test]
    fn test_clear_keeps_window() {
        let cache = RegisterCache::with_window(7, 2).unwrap();
        cache.update_values(7, vec![1, 2]);
        cache.clear();
        let data = cache.read_data();
        assert!(data.values.is_empty());
        assert!(data.last_update.is_none());
        assert_eq!((data.start_address, data.count), (7, 2));
    }

    #[test]
    fn test_window_serializes() {
        let window = RegisterWindow::default();
        let json = serde_json::to_value(&window).unwrap();
        assert_eq!(json["count"], 10);
        assert!(json["last_update"].is_null());
    }
}
