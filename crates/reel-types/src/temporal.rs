use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Strictly ordered timestamp: wall-clock milliseconds plus a logical
/// counter for events inside the same millisecond.
///
/// Ordering: `millis` → `logical` (total order).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Wall-clock milliseconds since UNIX epoch.
    pub millis: u64,
    /// Logical counter for events at the same physical time.
    #[serde(default)]
    pub logical: u32,
}

impl Timestamp {
    /// Create a timestamp with explicit values.
    pub const fn new(millis: u64, logical: u32) -> Self {
        Self { millis, logical }
    }

    /// The zero timestamp.
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Timestamp for a plain millisecond value.
    pub const fn from_millis(millis: u64) -> Self {
        Self::new(millis, 0)
    }

    /// Milliseconds elapsed between `self` and a later wall-clock value.
    /// Saturates at zero when `now_ms` is earlier.
    pub fn age_at(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.millis))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.millis
            .cmp(&other.millis)
            .then(self.logical.cmp(&other.logical))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms.{})", self.millis, self.logical)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.millis, self.logical)
    }
}

/// Source of wall-clock time, injected into every service so tests can
/// control it.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// The operating-system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A manually driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

struct TickState {
    millis: u64,
    logical: u32,
}

/// Produces strictly increasing [`Timestamp`]s from an underlying [`Clock`].
///
/// - If the wall clock advanced past the last stamp, `logical` resets to 0.
/// - Otherwise the last millisecond is reused and `logical` increments.
///
/// Every returned stamp is strictly greater than any previously returned one,
/// even when the wall clock stalls or steps backwards.
pub struct MonotonicClock {
    clock: Arc<dyn Clock>,
    state: Mutex<TickState>,
}

impl MonotonicClock {
    /// Wrap a clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(TickState {
                millis: 0,
                logical: 0,
            }),
        }
    }

    /// Monotonic clock over the system clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Issue the next stamp.
    pub fn tick(&self) -> Timestamp {
        let wall = self.clock.now_ms();
        // The state is two integers and is valid after any panic.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if wall > state.millis {
            state.millis = wall;
            state.logical = 0;
        } else {
            state.logical += 1;
        }

        Timestamp::new(state.millis, state.logical)
    }

    /// Make sure future stamps sort after `seen` (used after reloading
    /// persisted records).
    pub fn observe(&self, seen: Timestamp) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if seen > Timestamp::new(state.millis, state.logical) {
            state.millis = seen.millis;
            state.logical = seen.logical;
        }
    }

    /// Current wall-clock milliseconds of the underlying clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The underlying wall clock.
    pub fn wall_clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}

impl fmt::Debug for MonotonicClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonotonicClock")
            .field("now_ms", &self.clock.now_ms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ordering_millis_first() {
        assert!(Timestamp::new(100, 5) < Timestamp::new(200, 0));
        assert!(Timestamp::new(100, 1) < Timestamp::new(100, 2));
    }

    #[test]
    fn zero_is_smallest() {
        assert!(Timestamp::zero() < Timestamp::from_millis(1));
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_ms(), 3_000);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn tick_is_strict_when_clock_stalls() {
        let clock = Arc::new(ManualClock::new(500));
        let mono = MonotonicClock::new(clock.clone());
        let a = mono.tick();
        let b = mono.tick();
        let c = mono.tick();
        assert!(a < b && b < c);
        assert_eq!(c, Timestamp::new(500, 2));

        clock.advance(Duration::from_millis(1));
        assert_eq!(mono.tick(), Timestamp::new(501, 0));
    }

    #[test]
    fn tick_survives_clock_going_backwards() {
        let clock = Arc::new(ManualClock::new(1_000));
        let mono = MonotonicClock::new(clock.clone());
        let before = mono.tick();
        clock.set(10);
        assert!(mono.tick() > before);
    }

    #[test]
    fn observe_pushes_future_ticks_past_seen() {
        let clock = Arc::new(ManualClock::new(100));
        let mono = MonotonicClock::new(clock);
        mono.observe(Timestamp::new(5_000, 3));
        assert!(mono.tick() > Timestamp::new(5_000, 3));
    }

    #[test]
    fn age_saturates() {
        let ts = Timestamp::from_millis(1_000);
        assert_eq!(ts.age_at(500), Duration::ZERO);
        assert_eq!(ts.age_at(3_000), Duration::from_secs(2));
    }

    proptest! {
        #[test]
        fn ticks_strictly_increase(steps in proptest::collection::vec(-5i64..5, 1..64)) {
            let clock = Arc::new(ManualClock::new(10_000));
            let mono = MonotonicClock::new(clock.clone());
            let mut last = mono.tick();
            for step in steps {
                let now = clock.now_ms() as i64 + step;
                clock.set(now.max(0) as u64);
                let next = mono.tick();
                prop_assert!(next > last);
                last = next;
            }
        }
    }
}
