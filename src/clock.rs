//! Fixed-step simulation clock.

/// Nominal step for volumetric grids.
pub const VOLUME_STEP: f32 = 1.0 / 60.0;
/// Nominal step for single-slice grids.
pub const FLAT_STEP: f32 = 1.0 / 800.0;

/// Accumulates wall time and releases it in whole nominal steps.
///
/// Every call yields either `0.0` (not enough time banked; the kernels still
/// run but do not advance the fields) or exactly `nominal`. An accumulator
/// that lands exactly on `nominal` yields a full step and is kept, so the
/// following call releases another full step as soon as any time is added.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedStepClock {
    accumulated: f32,
    nominal: f32,
}

impl FixedStepClock {
    pub fn new(nominal: f32) -> Self {
        Self { accumulated: 0.0, nominal }
    }

    pub fn for_grid(volumetric: bool) -> Self {
        Self::new(if volumetric { VOLUME_STEP } else { FLAT_STEP })
    }

    pub fn nominal(&self) -> f32 {
        self.nominal
    }

    pub fn accumulated(&self) -> f32 {
        self.accumulated
    }

    /// Banks `elapsed` seconds and returns the step the kernels should use.
    pub fn advance(&mut self, elapsed: f32) -> f32 {
        self.accumulated += elapsed.max(0.0);
        if self.accumulated < self.nominal {
            return 0.0;
        }
        if self.accumulated > self.nominal {
            self.accumulated = 0.0;
        }
        self.nominal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_steps() {
        assert_eq!(FixedStepClock::for_grid(true).nominal(), 1.0 / 60.0);
        assert_eq!(FixedStepClock::for_grid(false).nominal(), 1.0 / 800.0);
    }

    #[test]
    fn test_small_steps_are_banked() {
        let mut clock = FixedStepClock::new(0.1);
        assert_eq!(clock.advance(0.03), 0.0);
        assert_eq!(clock.advance(0.03), 0.0);
        assert_eq!(clock.advance(0.03), 0.0);
        assert!((clock.accumulated() - 0.09).abs() < 1e-6);

        assert_eq!(clock.advance(0.03), 0.1);
        assert_eq!(clock.accumulated(), 0.0);
        assert_eq!(clock.advance(0.03), 0.0);
    }

    #[test]
    fn test_zero_time_never_advances() {
        let mut clock = FixedStepClock::new(VOLUME_STEP);
        for _ in 0..1000 {
            assert_eq!(clock.advance(0.0), 0.0);
        }
        assert_eq!(clock.accumulated(), 0.0);
    }

    #[test]
    fn test_large_elapsed_gives_single_step() {
        let mut clock = FixedStepClock::new(FLAT_STEP);
        assert_eq!(clock.advance(1.0), FLAT_STEP);
        assert_eq!(clock.accumulated(), 0.0);
    }

    #[test]
    fn test_exact_nominal_is_kept() {
        let mut clock = FixedStepClock::new(0.5);
        assert_eq!(clock.advance(0.5), 0.5);
        assert_eq!(clock.accumulated(), 0.5);
        // Any further time pushes past the threshold and resets.
        assert_eq!(clock.advance(0.25), 0.5);
        assert_eq!(clock.accumulated(), 0.0);
    }

    #[test]
    fn test_negative_elapsed_is_ignored() {
        let mut clock = FixedStepClock::new(0.5);
        assert_eq!(clock.advance(-3.0), 0.0);
        assert_eq!(clock.accumulated(), 0.0);
    }
}
