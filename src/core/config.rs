/*!
 * Runtime Configuration
 *
 * Per-unit settings for the global address space, with environment overrides
 */

use super::limits::{DEFAULT_LOCAL_POOL, DEFAULT_MAX_TEAMS, DEFAULT_MIN_BLOCK};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Environment variable overriding the local pool size in bytes
pub const ENV_LOCAL_POOL_BYTES: &str = "PGAS_LOCAL_POOL_BYTES";
/// Environment variable overriding the minimum buddy block size
pub const ENV_MIN_BLOCK_BYTES: &str = "PGAS_MIN_BLOCK_BYTES";
/// Environment variable overriding the number of team slots
pub const ENV_MAX_TEAMS: &str = "PGAS_MAX_TEAMS";
/// Environment variable enabling JSON trace output
pub const ENV_TRACE_JSON: &str = "PGAS_TRACE_JSON";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Bytes reserved for the local sub-allocator, always a power of two
    pub local_pool_bytes: usize,
    /// Smallest buddy block, always a power of two
    pub min_block_bytes: usize,
    /// Team slots available per unit (root team included)
    pub max_teams: usize,
    /// Emit traces as JSON
    pub trace_json: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            local_pool_bytes: DEFAULT_LOCAL_POOL,
            min_block_bytes: DEFAULT_MIN_BLOCK,
            max_teams: DEFAULT_MAX_TEAMS,
            trace_json: false,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `PGAS_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            local_pool_bytes: env_or(ENV_LOCAL_POOL_BYTES, defaults.local_pool_bytes),
            min_block_bytes: env_or(ENV_MIN_BLOCK_BYTES, defaults.min_block_bytes),
            max_teams: env_or(ENV_MAX_TEAMS, defaults.max_teams),
            trace_json: std::env::var(ENV_TRACE_JSON)
                .map(|v| v == "1" || v == "true")
                .unwrap_or(defaults.trace_json),
        }
        .normalized()
    }

    pub fn with_local_pool_bytes(mut self, bytes: usize) -> Self {
        self.local_pool_bytes = bytes;
        self.normalized()
    }

    pub fn with_min_block_bytes(mut self, bytes: usize) -> Self {
        self.min_block_bytes = bytes;
        self.normalized()
    }

    pub fn with_max_teams(mut self, teams: usize) -> Self {
        self.max_teams = teams;
        self.normalized()
    }

    /// Round sizes up to powers of two and keep the pool at least one block large
    fn normalized(mut self) -> Self {
        self.min_block_bytes = self.min_block_bytes.max(1).next_power_of_two();
        self.local_pool_bytes = self
            .local_pool_bytes
            .max(self.min_block_bytes)
            .next_power_of_two();
        self.max_teams = self.max_teams.max(1);
        self
    }
}

fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, fallback = %default, "Ignoring unparsable configuration value");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_powers_of_two() {
        let config = RuntimeConfig::default();
        assert!(config.local_pool_bytes.is_power_of_two());
        assert!(config.min_block_bytes.is_power_of_two());
        assert_eq!(config.max_teams, 256);
    }

    #[test]
    fn test_builder_rounds_up() {
        let config = RuntimeConfig::default()
            .with_min_block_bytes(48)
            .with_local_pool_bytes(3000);
        assert_eq!(config.min_block_bytes, 64);
        assert_eq!(config.local_pool_bytes, 4096);
    }

    #[test]
    fn test_pool_never_smaller_than_block() {
        let config = RuntimeConfig::default()
            .with_min_block_bytes(1024)
            .with_local_pool_bytes(10);
        assert_eq!(config.local_pool_bytes, 1024);
    }
}
