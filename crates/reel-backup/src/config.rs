use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};

/// Snapshot retention limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Snapshots kept by [`enforce_count_limit`](crate::BackupCoordinator::enforce_count_limit).
    pub max_backup_count: usize,
    /// Snapshots older than this are pruned.
    pub max_backup_age_days: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_backup_count: 10,
            max_backup_age_days: 30,
        }
    }
}

impl BackupConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_backup_age_days * 24 * 60 * 60)
    }

    pub fn validate(&self) -> BackupResult<()> {
        if self.max_backup_count == 0 {
            return Err(BackupError::InvalidConfig(
                "max_backup_count must be positive".into(),
            ));
        }
        if self.max_backup_age_days == 0 {
            return Err(BackupError::InvalidConfig(
                "max_backup_age_days must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = BackupConfig::default();
        assert_eq!(c.max_backup_count, 10);
        assert_eq!(c.max_age(), Duration::from_secs(30 * 86_400));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_zero_limits() {
        let c = BackupConfig {
            max_backup_count: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
        let c = BackupConfig {
            max_backup_age_days: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }
}
