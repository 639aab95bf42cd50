//! Node configuration
//!
//! Every field has a default, so a JSON file only needs the fields it
//! changes:
//!
//! ```json
//! { "max_attempts": 5, "network_name": "greenhouse" }
//! ```

use super::packet::NetworkName;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;

/// Accepted send attempts per hop
pub const MAX_ATTEMPTS_RANGE: RangeInclusive<u32> = 1..=10;
/// Accepted minimum interval between transmissions (ms)
pub const SEND_INTERVAL_RANGE: RangeInclusive<u32> = 20..=250;
/// Accepted route discovery wait (ms)
pub const ROUTE_WAIT_RANGE: RangeInclusive<u32> = 500..=5000;
/// Accepted send completion timeout (ms)
pub const SEND_RESULT_TIMEOUT_RANGE: RangeInclusive<u32> = 10..=60_000;
/// Accepted forwarding jitter (ms)
pub const FORWARD_JITTER_RANGE: RangeInclusive<u32> = 0..=1000;

/// Tunables for one mesh node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Send attempts per hop before a route search
    pub max_attempts: u32,
    /// Minimum gap between two transmissions (ms)
    pub min_send_interval_ms: u32,
    /// How long a frame waits for a route before it is dropped (ms)
    pub route_wait_timeout_ms: u32,
    /// Network partition name; empty accepts every network
    pub network_name: NetworkName,
    /// A send with no completion report after this long counts as failed (ms)
    pub send_result_timeout_ms: u32,
    /// Upper bound of the random delay before re-flooding (ms)
    pub forward_jitter_ms: u32,
    pub outgoing_capacity: usize,
    pub incoming_capacity: usize,
    pub waiting_capacity: usize,
    pub max_routes: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_send_interval_ms: 50,
            route_wait_timeout_ms: 500,
            network_name: NetworkName::any(),
            send_result_timeout_ms: 1000,
            forward_jitter_ms: 10,
            outgoing_capacity: 32,
            incoming_capacity: 16,
            waiting_capacity: 16,
            max_routes: 64,
        }
    }
}

/// Range check shared by config validation and the node setters
pub(crate) fn check_range(
    field: &'static str,
    value: u32,
    range: &RangeInclusive<u32>,
) -> Result<u32, ConfigError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

impl MeshConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every field against its accepted range
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("max_attempts", self.max_attempts, &MAX_ATTEMPTS_RANGE)?;
        check_range(
            "min_send_interval_ms",
            self.min_send_interval_ms,
            &SEND_INTERVAL_RANGE,
        )?;
        check_range(
            "route_wait_timeout_ms",
            self.route_wait_timeout_ms,
            &ROUTE_WAIT_RANGE,
        )?;
        check_range(
            "send_result_timeout_ms",
            self.send_result_timeout_ms,
            &SEND_RESULT_TIMEOUT_RANGE,
        )?;
        check_range(
            "forward_jitter_ms",
            self.forward_jitter_ms,
            &FORWARD_JITTER_RANGE,
        )?;

        for (field, capacity) in [
            ("outgoing_capacity", self.outgoing_capacity),
            ("incoming_capacity", self.incoming_capacity),
            ("waiting_capacity", self.waiting_capacity),
            ("max_routes", self.max_routes),
        ] {
            if capacity == 0 {
                return Err(ConfigError::ZeroCapacity(field));
            }
        }
        Ok(())
    }

    /// Parse and validate JSON
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: MeshConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Pretty JSON
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_min_send_interval_ms(mut self, ms: u32) -> Self {
        self.min_send_interval_ms = ms;
        self
    }

    pub fn with_route_wait_timeout_ms(mut self, ms: u32) -> Self {
        self.route_wait_timeout_ms = ms;
        self
    }

    pub fn with_network_name(mut self, name: NetworkName) -> Self {
        self.network_name = name;
        self
    }

    pub fn with_send_result_timeout_ms(mut self, ms: u32) -> Self {
        self.send_result_timeout_ms = ms;
        self
    }

    pub fn with_forward_jitter_ms(mut self, ms: u32) -> Self {
        self.forward_jitter_ms = ms;
        self
    }

    pub fn with_outgoing_capacity(mut self, capacity: usize) -> Self {
        self.outgoing_capacity = capacity;
        self
    }

    pub fn with_incoming_capacity(mut self, capacity: usize) -> Self {
        self.incoming_capacity = capacity;
        self
    }

    pub fn with_waiting_capacity(mut self, capacity: usize) -> Self {
        self.waiting_capacity = capacity;
        self
    }

    pub fn with_max_routes(mut self, max_routes: usize) -> Self {
        self.max_routes = max_routes;
        self
    }
}
