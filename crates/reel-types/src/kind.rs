use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Caller-supplied classification of a generated artifact.
///
/// Opaque to the storage layer; it is recorded and reported, never
/// interpreted by tier policy or eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    /// Character sheet image.
    Character,
    /// Background plate.
    Background,
    /// Per-cut setting image.
    SettingCut,
}

impl ArtifactKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 3] = [Self::Character, Self::Background, Self::SettingCut];

    /// Stable string form used in persisted records and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Background => "background",
            Self::SettingCut => "settingCut",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(Self::Character),
            "background" => Ok(Self::Background),
            "settingCut" | "setting-cut" | "setting_cut" => Ok(Self::SettingCut),
            other => Err(TypeError::UnknownKind(other.to_string())),
        }
    }
}
