//! Configuration types for PieceStore
//!
//! This module defines the options a store is opened with.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest threshold whose reclaim target (a quarter of it) is non-zero
pub const MIN_THRESHOLD_BYTES: u64 = 4;

/// Store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the single database file inside the store directory
    pub file_name: String,
    /// Commit durability for writes
    pub sync_mode: SyncMode,
    /// Capacity enforcement configuration
    pub capacity: CapacityConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            file_name: "piecestore.redb".to_string(),
            sync_mode: SyncMode::default(),
            capacity: CapacityConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Create a config with the given capacity threshold and defaults otherwise
    #[must_use]
    pub fn with_threshold(threshold_bytes: u64) -> Self {
        Self {
            capacity: CapacityConfig {
                threshold_bytes,
                ..CapacityConfig::default()
            },
            ..Self::default()
        }
    }

    /// Check the configuration for values the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.file_name.is_empty() {
            return Err(Error::configuration("file_name must not be empty"));
        }
        if self.capacity.enabled {
            if self.capacity.threshold_bytes < MIN_THRESHOLD_BYTES {
                return Err(Error::configuration(format!(
                    "capacity.threshold_bytes must be at least {MIN_THRESHOLD_BYTES}, got {}",
                    self.capacity.threshold_bytes
                )));
            }
            if self.capacity.check_interval_secs == 0 {
                return Err(Error::configuration(
                    "capacity.check_interval_secs must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

/// Commit durability
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Commits are visible immediately but not fsynced (fastest, less durable)
    #[default]
    Relaxed,
    /// Every commit is fsynced before it returns (safest, slowest)
    Full,
}

/// Capacity enforcement configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Run the background enforcement daemon
    pub enabled: bool,
    /// Stored content size above which eviction starts (bytes)
    pub threshold_bytes: u64,
    /// Delay between capacity checks (seconds)
    pub check_interval_secs: u64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: 5_000_000_000, // 5 GB
            check_interval_secs: 5,
        }
    }
}

impl CapacityConfig {
    /// Delay between capacity checks
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Nominal bytes one eviction pass tries to reclaim: a quarter of the threshold
    #[must_use]
    pub const fn reclaim_target(&self) -> u64 {
        self.threshold_bytes / 4
    }
}
