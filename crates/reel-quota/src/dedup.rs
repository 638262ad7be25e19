//! Content fingerprints and duplicate grouping.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use reel_store::{entry_size, keys};

/// Domain-separated BLAKE3 fingerprint of a stored value.
///
/// Fingerprints only nominate duplicates; the bytes are compared before
/// anything is deleted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    const DOMAIN: &'static str = "reel-dedup-v1";

    /// Fingerprint raw bytes.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(Self::DOMAIN.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Keys holding byte-identical values. The first key is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub fingerprint: String,
    pub kept: String,
    pub duplicates: Vec<String>,
    /// Bytes reclaimed by deleting the duplicates.
    pub duplicate_bytes: u64,
}

/// Dry-run result of the deduplication pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupAnalysis {
    pub groups: Vec<DuplicateGroup>,
    pub duplicate_bytes: u64,
    /// Duplicate bytes over total used bytes.
    pub ratio: f64,
}

/// Outcome of an executed deduplication pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupReport {
    pub removed_count: usize,
    pub saved_bytes: u64,
}

/// Group entries with identical values.
///
/// `entries` must be in key order; the first key of each group wins.
/// Compression tag entries are excluded since many share the same value.
pub(crate) fn find_duplicates(entries: &[(String, String)]) -> Vec<DuplicateGroup> {
    // Per fingerprint, every distinct value seen (collisions stay apart).
    let mut seen: HashMap<Fingerprint, Vec<usize>> = HashMap::new();
    let mut groups: Vec<(usize, DuplicateGroup)> = Vec::new();

    for (index, (key, value)) in entries.iter().enumerate() {
        if keys::is_compressed_tag(key) {
            continue;
        }
        let fp = Fingerprint::of(value.as_bytes());
        let slots = seen.entry(fp).or_default();
        let existing = slots
            .iter()
            .copied()
            .find(|&slot| entries[groups[slot].0].1 == *value);
        match existing {
            Some(slot) => {
                let group = &mut groups[slot].1;
                group.duplicates.push(key.clone());
                group.duplicate_bytes += entry_size(key, value);
            }
            None => {
                if !slots.is_empty() {
                    warn!(key = %key, fingerprint = %fp.short_hex(), "fingerprint collision with distinct bytes");
                }
                slots.push(groups.len());
                groups.push((
                    index,
                    DuplicateGroup {
                        fingerprint: fp.to_hex(),
                        kept: key.clone(),
                        duplicates: Vec::new(),
                        duplicate_bytes: 0,
                    },
                ));
            }
        }
    }

    groups
        .into_iter()
        .map(|(_, g)| g)
        .filter(|g| !g.duplicates.is_empty())
        .collect()
}
