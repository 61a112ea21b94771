//! Slew Limiter
//!
//! Per-voice glide generator. A move toward a new target is planned once: the
//! distance and the total glide time fix a base rate, and the rise or fall
//! curve then scales that rate by how much of the move remains. Both curve
//! families keep the planned duration, so a 1 s glide takes 1 s whatever its
//! shape.

use crate::shaping::{CurveShape, MIN_SLEW_SEC};

/// Relative change below which the cached limiter rate is left alone
pub const RATE_EPSILON: f64 = 1e-3;

/// Re-plan threshold in volts when glide bookkeeping is in volts
const REPLAN_VOLTS: f64 = 1e-6;

/// Re-plan threshold in semitones when glide bookkeeping is pitch-safe
const REPLAN_SEMITONES: f64 = 1e-3;

/// Rise and fall curves for one block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlideShapes {
    pub rise: CurveShape,
    pub fall: CurveShape,
}

impl GlideShapes {
    pub fn new(rise_shape: f64, fall_shape: f64) -> Self {
        Self {
            rise: CurveShape::from_shape(rise_shape),
            fall: CurveShape::from_shape(fall_shape),
        }
    }
}

/// Asymmetric rate limiter with per-move planning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlewLimiter {
    current: f64,
    target: f64,
    planned_target: f64,
    /// Magnitude of the planned move (volts, or semitones when pitch-safe)
    step_norm: f64,
    step_sign: i32,
    pitch_safe: bool,
    /// Linear rate of the planned move, volts per second
    base_rate: f64,
    rise_rate: f64,
    fall_rate: f64,
}

impl SlewLimiter {
    /// Limiter at rest at 0 V
    pub fn new() -> Self {
        Self {
            current: 0.0,
            target: 0.0,
            planned_target: 0.0,
            step_norm: 0.0,
            step_sign: 0,
            pitch_safe: true,
            base_rate: 0.0,
            rise_rate: 0.0,
            fall_rate: 0.0,
        }
    }

    /// Current output
    #[inline]
    pub fn value(&self) -> f64 {
        self.current
    }

    /// Last target handed to the limiter
    #[inline]
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Direction of the planned move (-1, 0, +1)
    #[inline]
    pub fn step_sign(&self) -> i32 {
        self.step_sign
    }

    /// Whether the output has not yet reached the target
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.current != self.target
    }

    /// Jump straight to `value` and forget any planned move
    pub fn reset_to(&mut self, value: f64) {
        let pitch_safe = self.pitch_safe;
        *self = Self::new();
        self.pitch_safe = pitch_safe;
        self.current = value;
        self.target = value;
        self.planned_target = value;
    }

    #[inline]
    fn norm(&self, volts: f64) -> f64 {
        if self.pitch_safe {
            volts.abs() * 12.0
        } else {
            volts.abs()
        }
    }

    /// Set a new target; a meaningful change re-plans the move so it lasts
    /// `seconds`. Returns whether a new move was planned.
    pub fn set_target(&mut self, target: f64, seconds: f64, pitch_safe: bool) -> bool {
        if !target.is_finite() {
            return false;
        }
        self.pitch_safe = pitch_safe;
        self.target = target;

        let threshold = if pitch_safe {
            REPLAN_SEMITONES
        } else {
            REPLAN_VOLTS
        };
        let arrived = self.current == self.planned_target;
        let changed = self.norm(target - self.planned_target) > threshold;
        if !(changed || (arrived && target != self.current)) {
            return false;
        }

        let err = target - self.current;
        let seconds = if seconds.is_finite() {
            seconds.max(MIN_SLEW_SEC)
        } else {
            MIN_SLEW_SEC
        };

        self.planned_target = target;
        self.step_norm = self.norm(err);
        self.step_sign = if err > 0.0 {
            1
        } else if err < 0.0 {
            -1
        } else {
            0
        };
        self.base_rate = err.abs() / seconds;
        self.rise_rate = self.base_rate;
        self.fall_rate = self.base_rate;
        true
    }

    /// Advance one sample
    pub fn tick(&mut self, dt: f64, shapes: &GlideShapes) -> f64 {
        let err = self.target - self.current;
        if err == 0.0 {
            return self.current;
        }

        let u = if self.step_norm > 0.0 {
            (self.norm(err) / self.step_norm).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let (shape, cached) = if err > 0.0 {
            (&shapes.rise, &mut self.rise_rate)
        } else {
            (&shapes.fall, &mut self.fall_rate)
        };
        let rate = self.base_rate * shape.multiplier(u);
        if (rate - *cached).abs() > RATE_EPSILON * rate.max(*cached) {
            *cached = rate;
        }

        let step = *cached * dt;
        if step <= 0.0 {
            // No plan to follow; land on the target
            self.current = self.target;
        } else {
            self.current += err.clamp(-step, step);
        }
        self.current
    }
}

impl Default for SlewLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaping::slew_knob_to_seconds;
    use approx::assert_abs_diff_eq;

    const SR: f64 = 48_000.0;

    fn run(slew: &mut SlewLimiter, samples: usize, shapes: &GlideShapes) -> f64 {
        for _ in 0..samples {
            slew.tick(1.0 / SR, shapes);
        }
        slew.value()
    }

    #[test]
    fn test_linear_glide_midpoint() {
        let mut slew = SlewLimiter::new();
        let shapes = GlideShapes::default();
        let seconds = slew_knob_to_seconds(0.75);
        assert!(slew.set_target(1.0, seconds, true));

        let half = run(&mut slew, 24_000, &shapes);
        assert_abs_diff_eq!(half, 0.5, epsilon = 0.005);

        let done = run(&mut slew, 24_000, &shapes);
        assert_abs_diff_eq!(done, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_shaped_glides_keep_duration() {
        for &(rise, fall) in &[(-1.0, -1.0), (0.6, 0.6), (-0.3, 0.9)] {
            let shapes = GlideShapes::new(rise, fall);
            let mut slew = SlewLimiter::new();
            slew.set_target(2.0, 0.5, true);

            // 1% short of the planned duration: not yet there
            let before = run(&mut slew, 23_760, &shapes);
            assert!(before < 2.0);
            // 1% past it: arrived
            let after = run(&mut slew, 480, &shapes);
            assert_abs_diff_eq!(after, 2.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fall_uses_fall_shape() {
        let shapes = GlideShapes::new(0.0, -1.0);
        let mut slew = SlewLimiter::new();
        slew.reset_to(1.0);
        slew.set_target(0.0, 1.0, true);
        // A fast-start fall is well past half way at a quarter of the time
        let quarter = run(&mut slew, 12_000, &shapes);
        assert!(quarter < 0.5);
        assert_eq!(slew.step_sign(), -1);
    }

    #[test]
    fn test_small_target_change_mid_move_keeps_plan() {
        let shapes = GlideShapes::default();
        let mut slew = SlewLimiter::new();
        slew.set_target(1.0, 1.0, true);
        run(&mut slew, 100, &shapes);
        assert!(!slew.set_target(1.0 + 1e-6, 1.0, true));
        assert!(slew.set_target(1.5, 1.0, true));
    }

    #[test]
    fn test_reset_to() {
        let mut slew = SlewLimiter::new();
        slew.set_target(3.0, 1.0, false);
        slew.reset_to(-2.0);
        assert_eq!(slew.value(), -2.0);
        assert!(!slew.is_moving());
    }

    #[test]
    fn test_minimum_time_enforced() {
        let shapes = GlideShapes::default();
        let mut slew = SlewLimiter::new();
        slew.set_target(1.0, 0.0, true);
        // 1 ms minimum at 48 kHz is 48 samples
        let partial = run(&mut slew, 24, &shapes);
        assert_abs_diff_eq!(partial, 0.5, epsilon = 1e-6);
    }
}
