use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, QuotaResult};
use crate::eviction::RetryPolicy;

/// Process-wide byte budget and the knobs of every reclaiming pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Hard ceiling on primary store usage.
    pub max_bytes: u64,
    /// Usage ratio above which a pre-write cleanup runs.
    pub cleanup_threshold_ratio: f64,
    /// Usage ratio at which health becomes `Warning`.
    pub warning_ratio: f64,
    /// Usage ratio at which health becomes `Critical`.
    pub critical_ratio: f64,
    /// Materialized artifacts demoted per eviction round.
    pub eviction_batch_size: usize,
    /// Eviction rounds allowed before a write fails with `StorageFull`.
    pub max_retries: u32,
    /// Entries larger than this are compression candidates.
    pub compression_threshold: u64,
    /// Transient entries older than this are swept, in seconds.
    pub stale_age_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            cleanup_threshold_ratio: 0.8,
            warning_ratio: 0.7,
            critical_ratio: 0.9,
            eviction_batch_size: 10,
            max_retries: 3,
            compression_threshold: 1024,
            stale_age_secs: 24 * 60 * 60,
        }
    }
}

impl QuotaConfig {
    /// Age past which transient entries are swept.
    pub fn stale_age(&self) -> Duration {
        Duration::from_secs(self.stale_age_secs)
    }

    /// The bounded retry policy for insert-with-eviction.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            batch_size: self.eviction_batch_size,
        }
    }

    /// Reject nonsensical values.
    pub fn validate(&self) -> QuotaResult<()> {
        if self.max_bytes == 0 {
            return Err(QuotaError::InvalidConfig("max_bytes must be positive".into()));
        }
        for (name, ratio) in [
            ("cleanup_threshold_ratio", self.cleanup_threshold_ratio),
            ("warning_ratio", self.warning_ratio),
            ("critical_ratio", self.critical_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(QuotaError::InvalidConfig(format!(
                    "{name} must be in (0, 1], got {ratio}"
                )));
            }
        }
        if self.warning_ratio > self.critical_ratio {
            return Err(QuotaError::InvalidConfig(format!(
                "warning_ratio {} exceeds critical_ratio {}",
                self.warning_ratio, self.critical_ratio
            )));
        }
        if self.eviction_batch_size == 0 {
            return Err(QuotaError::InvalidConfig(
                "eviction_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
