//! Bounded insert-with-eviction.
//!
//! A write that fails with `CapacityExceeded` triggers one eviction round
//! (demote the `batch_size` globally oldest materialized artifacts) and is
//! retried. At most `max_retries` rounds run, so a single logical write
//! costs at most `1 + max_retries` attempts. If a round demotes nothing the
//! write fails immediately: retrying an unchanged state cannot succeed.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use reel_store::{KeyValueStore, StoreResult};

use crate::error::{QuotaError, QuotaResult};

/// Something whose pending state can be written and whose footprint can be
/// shrunk by demoting old content.
pub trait EvictionTarget {
    /// Write pending state. Must leave the store unchanged on
    /// `CapacityExceeded`.
    fn persist(&mut self, store: &dyn KeyValueStore) -> StoreResult<()>;

    /// Demote up to `count` of the oldest materialized items. Returns the
    /// number actually demoted.
    fn evict_oldest(&mut self, count: usize) -> usize;
}

/// Retry bounds for [`persist_with_eviction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub batch_size: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            batch_size: 10,
        }
    }
}

/// What a successful [`persist_with_eviction`] had to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Eviction rounds run.
    pub rounds: u32,
    /// Items demoted across all rounds.
    pub evicted: usize,
}

/// Persist `target`, evicting in bounded rounds on capacity failure.
pub fn persist_with_eviction(
    store: &dyn KeyValueStore,
    target: &mut dyn EvictionTarget,
    policy: RetryPolicy,
) -> QuotaResult<EvictionReport> {
    let mut report = EvictionReport::default();
    loop {
        let err = match target.persist(store) {
            Ok(()) => {
                if report.rounds > 0 {
                    debug!(
                        rounds = report.rounds,
                        evicted = report.evicted,
                        "write succeeded after eviction"
                    );
                }
                return Ok(report);
            }
            Err(e) if e.is_capacity_exceeded() => e,
            Err(e) => return Err(e.into()),
        };

        if report.rounds >= policy.max_retries {
            warn!(rounds = report.rounds, evicted = report.evicted, error = %err, "eviction budget exhausted");
            return Err(QuotaError::StorageFull {
                attempts: report.rounds,
                evicted: report.evicted,
                reason: format!("retry budget exhausted: {err}"),
            });
        }

        let demoted = target.evict_oldest(policy.batch_size);
        report.rounds += 1;
        if demoted == 0 {
            warn!(rounds = report.rounds, "nothing left to evict");
            return Err(QuotaError::StorageFull {
                attempts: report.rounds,
                evicted: report.evicted,
                reason: format!("no materialized content left to demote: {err}"),
            });
        }
        report.evicted += demoted;
        warn!(
            round = report.rounds,
            demoted,
            batch = policy.batch_size,
            "capacity exceeded, demoted oldest content"
        );
    }
}
