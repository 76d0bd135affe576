//! Game-time ticks and the clock abstraction.
//!
//! All stream timing (start times, pauses, fades, scope windows) is kept in
//! integer ticks at [`TIME_UNITS_PER_SECOND`]. Production code uses
//! [`MonotonicClock`]; tests inject a [`ManualClock`] so pause/resume and
//! fade arithmetic can be checked at exact instants.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Monotonic game-time units per second.
pub const TIME_UNITS_PER_SECOND: i64 = 840;

/// A point or span in game time.
pub type Ticks = i64;

/// Convert milliseconds to ticks (rounding down).
pub fn ticks_from_ms(ms: u32) -> Ticks {
    ms as i64 * TIME_UNITS_PER_SECOND / 1000
}

/// Convert ticks to milliseconds (rounding down).
pub fn ms_from_ticks(ticks: Ticks) -> i64 {
    ticks * 1000 / TIME_UNITS_PER_SECOND
}

/// Convert a duration in seconds to ticks.
pub fn ticks_from_secs_f32(secs: f32) -> Ticks {
    (secs * TIME_UNITS_PER_SECOND as f32) as Ticks
}

/// Convert ticks to seconds.
pub fn secs_f32_from_ticks(ticks: Ticks) -> f32 {
    ticks as f32 / TIME_UNITS_PER_SECOND as f32
}

/// Source of the current game time.
pub trait Clock: Send + Sync {
    /// Current time in ticks since some fixed origin.
    fn now(&self) -> Ticks;
}

/// Wall-clock time anchored at construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
        })
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Ticks {
        let elapsed = self.origin.elapsed();
        (elapsed.as_micros() as i64) * TIME_UNITS_PER_SECOND / 1_000_000
    }
}

/// A clock advanced explicitly by the caller. Time never moves on its own.
pub struct ManualClock {
    ticks: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ticks: AtomicI64::new(0),
        })
    }

    /// Move time forward by `delta` ticks.
    pub fn advance(&self, delta: Ticks) {
        self.ticks.fetch_add(delta, Ordering::SeqCst);
    }

    /// Jump to an absolute tick count.
    pub fn set(&self, ticks: Ticks) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ticks {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_round_trip() {
        assert_eq!(ticks_from_ms(1000), TIME_UNITS_PER_SECOND);
        assert_eq!(ms_from_ticks(TIME_UNITS_PER_SECOND), 1000);
        assert_eq!(ticks_from_ms(0), 0);
    }

    #[test]
    fn test_secs_conversion() {
        assert_eq!(ticks_from_secs_f32(2.0), 2 * TIME_UNITS_PER_SECOND);
        assert!((secs_f32_from_ticks(420) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), 0);
        clock.advance(840);
        assert_eq!(clock.now(), 840);
        clock.set(42);
        assert_eq!(clock.now(), 42);
    }

    #[test]
    fn test_monotonic_clock_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
