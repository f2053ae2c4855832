use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_STORE_CAPACITY;

use super::audit::DEFAULT_LOG_CAPACITY;

/// Largest stored record: header, label and ciphertext together
pub const DEFAULT_MAX_RECORD_SIZE: usize = 320;
pub const DEFAULT_PIN_TRIES: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    // channel
    /// reject commands other than status, initiate and
    ///  reset-to-factory unless they arrive wrapped
    pub require_secure_channel: bool,

    // storage
    /// bytes of backing memory for the object store
    pub store_capacity: usize,
    pub max_record_size: usize,
    /// audit records kept before the oldest is dropped
    pub log_capacity: usize,

    // credentials
    /// try limit of PIN 0 on a factory-fresh device
    pub default_pin_tries: u8,

    // logging
    #[serde(skip, default = "default_log_level")]
    pub log_level: tracing::Level,
}

fn default_log_level() -> tracing::Level {
    tracing::Level::INFO
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            require_secure_channel: true,
            store_capacity: DEFAULT_STORE_CAPACITY,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            log_capacity: DEFAULT_LOG_CAPACITY,
            default_pin_tries: DEFAULT_PIN_TRIES,
            log_level: default_log_level(),
        }
    }
}
