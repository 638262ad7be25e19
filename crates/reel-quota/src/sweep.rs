//! Stale transient-entry detection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use reel_store::{entry_size, keys};

/// Outcome of a cleanup or sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub cleaned_count: usize,
    pub freed_bytes: u64,
}

impl CleanupReport {
    pub fn merge(&mut self, other: CleanupReport) {
        self.cleaned_count += other.cleaned_count;
        self.freed_bytes += other.freed_bytes;
    }
}

/// A transient entry old enough to delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StaleEntry {
    pub key: String,
    pub bytes: u64,
}

/// Transient entries whose embedded timestamp is more than `stale_age`
/// before `now_ms`. Entries without a timestamp are never stale.
pub(crate) fn find_stale(
    entries: &[(String, String)],
    now_ms: u64,
    stale_age: Duration,
) -> Vec<StaleEntry> {
    let max_age = stale_age.as_millis() as u64;
    entries
        .iter()
        .filter(|(key, _)| keys::is_transient_key(key) && !keys::is_compressed_tag(key))
        .filter_map(|(key, value)| {
            let stamped = keys::embedded_timestamp_ms(key)?;
            (now_ms.saturating_sub(stamped) > max_age).then(|| StaleEntry {
                key: key.clone(),
                bytes: entry_size(key, value),
            })
        })
        .collect()
}
