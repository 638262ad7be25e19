use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, ArtifactResult};

/// Tier policy parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Number of most-recently-accessed projects whose new artifacts are
    /// materialized (K).
    pub materialized_projects: usize,
    /// Materialized artifacts a project may hold before its oldest half is
    /// demoted.
    pub max_artifacts_per_project: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            materialized_projects: 3,
            max_artifacts_per_project: 50,
        }
    }
}

impl TierConfig {
    /// Projects beyond this many (by recency) are deleted outright.
    pub fn retained_projects(&self) -> usize {
        self.materialized_projects.saturating_mul(2)
    }

    pub fn validate(&self) -> ArtifactResult<()> {
        if self.materialized_projects == 0 {
            return Err(ArtifactError::InvalidConfig(
                "materialized_projects must be at least 1".into(),
            ));
        }
        if self.max_artifacts_per_project < 2 {
            return Err(ArtifactError::InvalidConfig(
                "max_artifacts_per_project must be at least 2".into(),
            ));
        }
        Ok(())
    }
}
