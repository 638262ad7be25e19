//! Usage breakdowns and optimization reports.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compress::{CompressionAnalysis, CompressionReport};
use crate::dedup::{DedupAnalysis, DedupReport};
use crate::status::StorageStatus;
use crate::sweep::CleanupReport;

/// Rough shape of a stored value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueShape {
    Array,
    Object,
    Scalar,
    /// Not parseable as JSON.
    Text,
}

impl ValueShape {
    /// Classify a raw value and count its top-level items.
    pub fn inspect(raw: &str) -> (Self, usize) {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => (Self::Array, items.len()),
            Ok(Value::Object(map)) => (Self::Object, map.len()),
            Ok(_) => (Self::Scalar, 1),
            Err(_) => (Self::Text, 1),
        }
    }
}

/// Charged size of one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub key: String,
    pub bytes: u64,
    pub shape: ValueShape,
    pub item_count: usize,
    /// Share of total used bytes, in percent.
    pub percent: f64,
}

/// Everything known about a single key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyDetails {
    pub usage: KeyUsage,
    pub compressed: bool,
    pub transient: bool,
    pub embedded_timestamp_ms: Option<u64>,
    /// At most the first 200 characters of the value.
    pub preview: String,
}

/// Headline usage numbers plus the largest entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub status: StorageStatus,
    pub item_count: usize,
    /// Up to ten largest entries, biggest first.
    pub largest: Vec<KeyUsage>,
}

/// Dry run of every optimization pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationAnalysis {
    pub status: StorageStatus,
    pub compression: CompressionAnalysis,
    pub duplicates: DedupAnalysis,
    pub stale_count: usize,
    pub stale_bytes: u64,
    pub total_potential_savings: u64,
    pub recommendations: Vec<String>,
}

impl OptimizationAnalysis {
    pub(crate) fn recommend(&mut self) {
        let mut recs = Vec::new();
        if self.compression.ratio > 0.1 {
            recs.push(format!(
                "Compressing {} large entries can reclaim about {} bytes.",
                self.compression.candidates.len(),
                self.compression.potential_savings
            ));
        }
        if self.duplicates.ratio > 0.05 {
            recs.push(format!(
                "Removing duplicate data can reclaim {} bytes.",
                self.duplicates.duplicate_bytes
            ));
        }
        if self.stale_count > 0 {
            recs.push(format!(
                "{} stale temporary entries can be cleaned up.",
                self.stale_count
            ));
        }
        if recs.is_empty() {
            recs.push("Storage is already well optimized.".to_string());
            recs.push("Regular backups are still recommended.".to_string());
        } else {
            recs.push(format!(
                "Running the optimization reclaims about {} bytes.",
                self.total_potential_savings
            ));
        }
        self.recommendations = recs;
    }
}

/// Outcome of an executed optimization: each pass runs even if an earlier
/// one failed, and failures are collected in `errors`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub compression: CompressionReport,
    pub deduplication: DedupReport,
    pub cleanup: CleanupReport,
    pub saved_bytes: u64,
    pub errors: Vec<String>,
}

impl OptimizationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Render an analysis as a plain-text report.
pub fn render_report(analysis: &OptimizationAnalysis) -> String {
    let s = &analysis.status;
    let mut out = String::new();
    let _ = writeln!(out, "Storage optimization report");
    let _ = writeln!(out, "===========================");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Usage:  {} / {} bytes ({:.1}%), {}",
        s.used_bytes,
        s.max_bytes,
        s.ratio * 100.0,
        s.health
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Compression");
    let _ = writeln!(
        out,
        "  candidates: {}, eligible: {} bytes ({:.1}%), savings: {} bytes",
        analysis.compression.candidates.len(),
        analysis.compression.eligible_bytes,
        analysis.compression.ratio * 100.0,
        analysis.compression.potential_savings
    );
    let _ = writeln!(out, "Duplicates");
    let _ = writeln!(
        out,
        "  groups: {}, duplicate: {} bytes ({:.1}%)",
        analysis.duplicates.groups.len(),
        analysis.duplicates.duplicate_bytes,
        analysis.duplicates.ratio * 100.0
    );
    for group in &analysis.duplicates.groups {
        let _ = writeln!(
            out,
            "    {} kept, {} duplicate(s)",
            group.kept,
            group.duplicates.len()
        );
    }
    let _ = writeln!(out, "Stale entries");
    let _ = writeln!(
        out,
        "  count: {}, bytes: {}",
        analysis.stale_count, analysis.stale_bytes
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Total potential savings: {} bytes",
        analysis.total_potential_savings
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Recommendations");
    for (i, rec) in analysis.recommendations.iter().enumerate() {
        let _ = writeln!(out, "  {}. {rec}", i + 1);
    }
    out
}
