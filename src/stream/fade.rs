//! Music volume fades.
//!
//! A fade is a linear ramp applied by the streaming task: the caller
//! records the parameters under the fade lock and the task interpolates on
//! every iteration until the deadline passes. The lock is separate from
//! the source slots so an active fade never contends with the music slot's
//! streaming work.

use parking_lot::Mutex;

use crate::time::Ticks;

use super::MAX_VOLUME;

#[derive(Default)]
struct FadeState {
    start_time: Ticks,
    /// 0 = no fade in progress.
    interval: Ticks,
    start_volume: i64,
    delta: i64,
}

/// The fade parameter cell shared between callers and the task.
#[derive(Default)]
pub(crate) struct FadeControl {
    state: Mutex<FadeState>,
}

impl FadeControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fade from `current_volume` to `end_volume` over `interval`
    /// ticks starting at `now`. Returns false when `interval` is zero; the
    /// caller then applies the end volume directly.
    pub fn begin(&self, now: Ticks, interval: Ticks, end_volume: u32, current_volume: u32) -> bool {
        let interval = interval.max(0);
        let mut fade = self.state.lock();
        fade.start_time = now;
        fade.interval = interval;
        fade.start_volume = current_volume as i64;
        fade.delta = end_volume as i64 - current_volume as i64;
        interval != 0
    }

    /// One interpolation step. Returns the volume to apply, or `None` when
    /// no fade is in progress. Self-terminates once the deadline passes.
    pub fn process(&self, now: Ticks) -> Option<u32> {
        let mut fade = self.state.lock();
        if fade.interval == 0 {
            return None;
        }
        let elapsed = (now - fade.start_time).clamp(0, fade.interval);
        let volume = fade.start_volume + fade.delta * elapsed / fade.interval;
        if elapsed >= fade.interval {
            fade.interval = 0;
        }
        Some(volume.clamp(0, MAX_VOLUME as i64) as u32)
    }

    /// Whether a fade is currently running.
    pub fn active(&self) -> bool {
        self.state.lock().interval != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_is_immediate() {
        let fade = FadeControl::new();
        assert!(!fade.begin(0, 0, 0, 160));
        assert_eq!(fade.process(10), None);
    }

    #[test]
    fn test_linear_ramp_down() {
        let fade = FadeControl::new();
        assert!(fade.begin(1000, 840, 0, 160));

        assert_eq!(fade.process(1000), Some(160));
        assert_eq!(fade.process(1000 + 420), Some(80));
        assert_eq!(fade.process(1000 + 840), Some(0));
        // Deadline passed: the fade is gone.
        assert_eq!(fade.process(1000 + 841), None);
        assert!(!fade.active());
    }

    #[test]
    fn test_ramp_up_clamps_to_deadline() {
        let fade = FadeControl::new();
        fade.begin(0, 100, 200, 100);
        // Way past the deadline still lands exactly on the end volume.
        assert_eq!(fade.process(10_000), Some(200));
        assert_eq!(fade.process(10_001), None);
    }

    #[test]
    fn test_negative_interval_treated_as_immediate() {
        let fade = FadeControl::new();
        assert!(!fade.begin(0, -5, 40, 160));
    }
}
