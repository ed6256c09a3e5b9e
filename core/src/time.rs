//! Monotonic time with microsecond resolution.
//!
//! All simulation timing goes through [`Time`]; wall-clock time is never used
//! by game logic, so replays and save/load stay deterministic as long as the
//! caller feeds the same deltas.

use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A point on (or an offset along) the engine's monotonic timeline.
///
/// Internally a microsecond count. Closed under addition and subtraction;
/// differences are also `Time` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Time(i64);

impl Time {
    pub const ZERO: Time = Time(0);

    pub const fn from_us(us: i64) -> Self {
        Time(us)
    }

    pub const fn from_ms(ms: i64) -> Self {
        Time(ms * 1000)
    }

    pub fn from_seconds(s: f64) -> Self {
        Time((s * 1_000_000.0) as i64)
    }

    pub fn as_us(self) -> i64 {
        self.0
    }

    pub fn as_ms(self) -> i64 {
        self.0 / 1000
    }

    pub fn to_seconds(self) -> f32 {
        self.0 as f32 / 1_000_000.0
    }

    pub fn clamp(self, min: Time, max: Time) -> Time {
        Time(self.0.clamp(min.0, max.0))
    }
}

impl Add for Time {
    type Output = Time;
    fn add(self, rhs: Time) -> Time {
        Time(self.0 + rhs.0)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Time) {
        self.0 += rhs.0;
    }
}

impl Sub for Time {
    type Output = Time;
    fn sub(self, rhs: Time) -> Time {
        Time(self.0 - rhs.0)
    }
}

impl SubAssign for Time {
    fn sub_assign(&mut self, rhs: Time) {
        self.0 -= rhs.0;
    }
}

/// Monotonic clock for the host loop. The epoch is the first call within the
/// process.
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Time {
        Time(self.start.elapsed().as_micros() as i64)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_is_closed() {
        let a = Time::from_ms(16);
        let b = Time::from_ms(4);
        assert_eq!((a + b).as_ms(), 20);
        assert_eq!((a - b).as_ms(), 12);

        let mut c = a;
        c += b;
        c -= Time::from_us(1);
        assert_eq!(c.as_us(), 19_999);
    }

    #[test]
    fn seconds_round_trip() {
        let t = Time::from_seconds(0.016);
        assert_eq!(t.as_us(), 16_000);
        assert!((t.to_seconds() - 0.016).abs() < 1e-6);
    }

    #[test]
    fn clamp_matches_tick_bounds() {
        let lo = Time::from_ms(2);
        let hi = Time::from_ms(60);
        assert_eq!(Time::from_ms(1).clamp(lo, hi), lo);
        assert_eq!(Time::from_ms(16).clamp(lo, hi), Time::from_ms(16));
        assert_eq!(Time::from_ms(100).clamp(lo, hi), hi);
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = Clock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
