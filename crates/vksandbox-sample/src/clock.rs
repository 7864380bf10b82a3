//! Frame timing.

use std::time::Instant;

/// Step reported to `update` when running with a fixed timestep.
pub const FIXED_TIMESTEP: f32 = 0.1;

const AVERAGE_WEIGHT: f32 = 0.05;

/// Timing for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime {
    /// Wall-clock seconds since the previous frame.
    pub elapsed: f32,
    /// Seconds to pass to `update`.
    pub dt: f32,
    /// Exponential moving average of `elapsed`.
    pub average: f32,
}

/// Measures time between frames and keeps a smoothed average.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    average: f32,
    fixed: bool,
}

impl FrameClock {
    pub fn new(fixed: bool) -> Self {
        Self::starting_at(Instant::now(), fixed)
    }

    pub fn starting_at(start: Instant, fixed: bool) -> Self {
        Self {
            last: start,
            average: 0.0,
            fixed,
        }
    }

    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    /// Advance the clock to `now`.
    pub fn tick_at(&mut self, now: Instant) -> FrameTime {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        self.average = elapsed * AVERAGE_WEIGHT + self.average * (1.0 - AVERAGE_WEIGHT);

        FrameTime {
            elapsed,
            dt: if self.fixed { FIXED_TIMESTEP } else { elapsed },
            average: self.average,
        }
    }

    pub fn average(&self) -> f32 {
        self.average
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    #[test]
    fn real_time_dt_follows_wall_clock() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start, false);
        let time = clock.tick_at(start + Duration::from_millis(20));
        assert_relative_eq!(time.elapsed, 0.02, epsilon = 1e-6);
        assert_relative_eq!(time.dt, 0.02, epsilon = 1e-6);
    }

    #[test]
    fn fixed_timestep_ignores_wall_clock() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start, true);
        let time = clock.tick_at(start + Duration::from_millis(500));
        assert_relative_eq!(time.dt, FIXED_TIMESTEP);
        assert_relative_eq!(time.elapsed, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn average_is_exponentially_smoothed() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start, false);

        let first = clock.tick_at(start + Duration::from_millis(100));
        assert_relative_eq!(first.average, 0.005, epsilon = 1e-6);

        let second = clock.tick_at(start + Duration::from_millis(200));
        assert_relative_eq!(second.average, 0.05 * 0.1 + 0.95 * 0.005, epsilon = 1e-6);

        let mut now = start + Duration::from_millis(200);
        for _ in 0..400 {
            now += Duration::from_millis(10);
            clock.tick_at(now);
        }
        assert_relative_eq!(clock.average(), 0.01, epsilon = 1e-4);
    }
}
