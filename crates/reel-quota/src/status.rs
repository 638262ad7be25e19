use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::QuotaConfig;

/// Health classification of the primary store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Warning,
    Critical,
}

impl Health {
    /// Classify a usage ratio: critical at or above `critical_ratio`, else
    /// warning at or above `warning_ratio`, else healthy.
    pub fn classify(ratio: f64, config: &QuotaConfig) -> Self {
        if ratio >= config.critical_ratio {
            Self::Critical
        } else if ratio >= config.warning_ratio {
            Self::Warning
        } else {
            Self::Healthy
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Urgency of an advisory recommendation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Human-readable advice for display layers. Informational only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecommendation {
    pub severity: Severity,
    pub message: String,
}

impl StorageRecommendation {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Point-in-time usage of the primary store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageStatus {
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub max_bytes: u64,
    pub ratio: f64,
    pub health: Health,
    pub recommendations: Vec<StorageRecommendation>,
}

impl StorageStatus {
    /// Build a status from raw usage. Pure; no store access.
    pub fn compute(used_bytes: u64, max_bytes: u64, config: &QuotaConfig) -> Self {
        let ratio = if max_bytes == 0 {
            1.0
        } else {
            used_bytes as f64 / max_bytes as f64
        };
        let health = Health::classify(ratio, config);
        Self {
            used_bytes,
            available_bytes: max_bytes.saturating_sub(used_bytes),
            max_bytes,
            ratio,
            health,
            recommendations: recommend(health, ratio),
        }
    }
}

fn recommend(health: Health, ratio: f64) -> Vec<StorageRecommendation> {
    let mut out = Vec::new();
    match health {
        Health::Critical => out.push(StorageRecommendation::new(
            Severity::Critical,
            "Storage is almost full; clean up immediately.",
        )),
        Health::Warning => out.push(StorageRecommendation::new(
            Severity::Warning,
            "Storage is filling up; a cleanup is recommended.",
        )),
        Health::Healthy => {}
    }
    if ratio > 0.5 {
        out.push(StorageRecommendation::new(
            Severity::Info,
            "Consider compressing stored data.",
        ));
    }
    out
}
