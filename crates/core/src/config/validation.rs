//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Longest TTL or age horizon accepted, in seconds (100 years).
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Longest selector horizon accepted, in days.
pub const MAX_SELECTOR_HORIZON_DAYS: u64 = 100 * 365;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `l1_capacity_bytes` is 0
    /// - `l2_timeout_ms` is below 10ms or exceeds 60 seconds
    /// - `sweep_interval_secs` or `sweep_batch_size` is 0
    /// - `min_success_rate` is outside [0, 1]
    /// - `selector_horizon_days` is 0 or exceeds `MAX_SELECTOR_HORIZON_DAYS`
    /// - the TTL table has a zero duration or large-payload threshold, or a
    ///   duration above `MAX_TTL_SECS`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.l1_capacity_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "l1_capacity_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.l2_timeout_ms < 10 {
            return Err(ConfigError::Invalid { field: "l2_timeout_ms".into(), reason: "must be at least 10ms".into() });
        }
        if self.l2_timeout_ms > 60_000 {
            return Err(ConfigError::Invalid {
                field: "l2_timeout_ms".into(),
                reason: "must not exceed 60 seconds (60000ms)".into(),
            });
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.sweep_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_batch_size".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.selector_horizon_days == 0 || self.selector_horizon_days > MAX_SELECTOR_HORIZON_DAYS {
            return Err(ConfigError::Invalid {
                field: "selector_horizon_days".into(),
                reason: format!("must be between 1 and {MAX_SELECTOR_HORIZON_DAYS}"),
            });
        }

        if !(0.0..=1.0).contains(&self.min_success_rate) {
            return Err(ConfigError::Invalid {
                field: "min_success_rate".into(),
                reason: "must be between 0 and 1".into(),
            });
        }

        let ttl = &self.ttl;
        for (field, value) in [
            ("ttl.structural_secs", ttl.structural_secs),
            ("ttl.text_secs", ttl.text_secs),
            ("ttl.page_secs", ttl.page_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must be greater than 0".into() });
            }
        }
        for (field, value) in [
            ("ttl.structural_secs", ttl.structural_secs),
            ("ttl.text_secs", ttl.text_secs),
            ("ttl.page_secs", ttl.page_secs),
            ("ttl.large_payload_min_secs", ttl.large_payload_min_secs),
            ("ttl.long_threshold_secs", ttl.long_threshold_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ] {
            if value > MAX_TTL_SECS {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: format!("must not exceed {MAX_TTL_SECS}"),
                });
            }
        }
        if ttl.large_payload_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "ttl.large_payload_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if !self.l2_enabled {
            tracing::warn!(
                db_path = %self.db_path.display(),
                "L2 tier disabled; long-lived entries will not survive restarts"
            );
        }

        Ok(())
    }
}
