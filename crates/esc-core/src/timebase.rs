use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of the tick timestamps handed to [`crate::EscSensor::process`].
pub trait Clock {
    /// Monotonic microseconds since driver start.
    fn now_us(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for TimeBase {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}

/// Clock advanced by hand, for simulation and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_us),
        }
    }

    pub fn advance_us(&self, delta_us: u64) -> u64 {
        self.now_us.fetch_add(delta_us, Ordering::Relaxed) + delta_us
    }

    pub fn advance_ms(&self, delta_ms: u64) -> u64 {
        self.advance_us(delta_ms * 1000)
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(5);
        assert_eq!(clock.advance_ms(2), 2_005);
        assert_eq!(clock.now_us(), 2_005);
    }

    #[test]
    fn timebase_is_monotonic() {
        let tb = TimeBase::new();
        let a = tb.now_us();
        let b = tb.now_us();
        assert!(b >= a);
    }
}
