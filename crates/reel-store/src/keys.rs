//! Reserved key-name conventions.
//!
//! The quota layer owns these patterns; application data must not use them:
//!
//! - `temp_*`, `cache_*`, `*_temp`, `*_cache` mark transient entries that the
//!   stale sweep may delete once their embedded timestamp is old enough.
//! - `<key>_compressed` is the tag entry recording that `<key>` holds the
//!   structurally optimized form of its value.
//! - `reel:*` keys hold records owned by Reel's own services. The
//!   reclaiming passes never rewrite or delete them.

/// Prefixes marking transient entries.
pub const TRANSIENT_PREFIXES: [&str; 2] = ["temp_", "cache_"];

/// Suffixes marking transient entries.
pub const TRANSIENT_SUFFIXES: [&str; 2] = ["_temp", "_cache"];

/// Suffix of compression tag entries.
pub const COMPRESSED_SUFFIX: &str = "_compressed";

/// Prefix of records owned by Reel's services.
pub const RESERVED_PREFIX: &str = "reel:";

/// Value written to a compression tag entry.
pub const COMPRESSED_TAG_VALUE: &str = "true";

/// Digits in an embedded millisecond timestamp.
const TIMESTAMP_DIGITS: usize = 13;

/// Returns `true` if the key follows the transient naming convention.
pub fn is_transient_key(key: &str) -> bool {
    TRANSIENT_PREFIXES.iter().any(|p| key.starts_with(p))
        || TRANSIENT_SUFFIXES.iter().any(|s| key.ends_with(s))
}

/// Returns `true` if `key` holds a service-owned record.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Name of the tag entry for `key`.
pub fn compressed_tag_key(key: &str) -> String {
    format!("{key}{COMPRESSED_SUFFIX}")
}

/// Returns `true` if `key` is itself a compression tag entry.
pub fn is_compressed_tag(key: &str) -> bool {
    key.ends_with(COMPRESSED_SUFFIX)
}

/// The key a tag entry refers to.
pub fn tag_target(key: &str) -> Option<&str> {
    key.strip_suffix(COMPRESSED_SUFFIX)
}

/// Extract the first 13-digit millisecond timestamp embedded in a key.
///
/// Longer digit runs contribute their first 13 digits.
pub fn embedded_timestamp_ms(key: &str) -> Option<u64> {
    let bytes = key.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end - start >= TIMESTAMP_DIGITS {
            return key[start..start + TIMESTAMP_DIGITS].parse().ok();
        }
        start = end;
    }
    None
}
