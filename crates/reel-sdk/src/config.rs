use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use reel_artifact::TierConfig;
use reel_backup::BackupConfig;
use reel_quota::QuotaConfig;

use crate::error::{ReelError, ReelResult};

/// Periodic background work started by
/// [`Reel::spawn_maintenance`](crate::Reel::spawn_maintenance).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between stale-key sweeps.
    pub stale_sweep_interval_secs: u64,
    /// Seconds between backup retention passes.
    pub retention_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            stale_sweep_interval_secs: 24 * 60 * 60,
            retention_interval_secs: 24 * 60 * 60,
        }
    }
}

impl MaintenanceConfig {
    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_interval_secs)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }
}

/// Every tunable of a [`Reel`](crate::Reel) instance.
///
/// Loaded from TOML; absent sections and fields take their defaults.
///
/// ```toml
/// [tier]
/// materialized_projects = 3
///
/// [quota]
/// max_bytes = 5242880
/// warning_ratio = 0.7
///
/// [backup]
/// max_backup_count = 10
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReelConfig {
    pub tier: TierConfig,
    pub quota: QuotaConfig,
    pub backup: BackupConfig,
    pub maintenance: MaintenanceConfig,
}

impl ReelConfig {
    pub fn from_toml_str(text: &str) -> ReelResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ReelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ReelResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> ReelResult<String> {
        toml::to_string_pretty(self).map_err(|e| ReelError::Config(e.to_string()))
    }

    pub fn validate(&self) -> ReelResult<()> {
        self.tier.validate()?;
        self.quota.validate()?;
        self.backup.validate()?;
        if self.maintenance.stale_sweep_interval_secs == 0
            || self.maintenance.retention_interval_secs == 0
        {
            return Err(ReelError::Config(
                "maintenance intervals must be positive".into(),
            ));
        }
        Ok(())
    }
}
