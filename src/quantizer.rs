//! Scale Quantizer
//!
//! Converts a pitch voltage to fractional steps of the active tuning and
//! latches it to an allowed step. The latch is a Schmitt trigger: it only
//! moves once the input passes the boundary toward the candidate step by the
//! hysteresis amount, so a signal sitting on a boundary does not chatter.
//!
//! Rounding is selected per call:
//!
//! - `Nearest` - closest allowed step, boundary at the midpoint
//! - `Ceil` / `Floor` - the allowed step at or above / below the input
//! - `Directional` - snaps one allowed step at a time in the direction the
//!   input is moving, with a widened direction detector

use crate::tuning::Scale;
use serde::{Deserialize, Serialize};

/// Stickiness is limited to this fraction of one step
pub const MAX_HYSTERESIS_FRACTION: f64 = 0.4;

/// Upper bound of the stickiness control in cents
pub const MAX_STICKINESS_CENTS: f64 = 20.0;

/// Residual improvement (in steps) required before nudging to the adjacent step
const NUDGE_TOLERANCE_STEPS: f64 = 0.001;

/// Rounding policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoundMode {
    #[default]
    Directional,
    Nearest,
    Ceil,
    Floor,
}

impl RoundMode {
    /// Menu label
    pub fn label(&self) -> &'static str {
        match self {
            RoundMode::Directional => "Directional",
            RoundMode::Nearest => "Nearest",
            RoundMode::Ceil => "Ceil",
            RoundMode::Floor => "Floor",
        }
    }
}

/// Quantizer settings, rebuilt once per block from the configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantConfig {
    pub scale: Scale,
    pub rounding: RoundMode,
    pub stickiness_cents: f64,
    pub strength: f64,
}

impl QuantConfig {
    pub fn new(scale: Scale, rounding: RoundMode, stickiness_cents: f64, strength: f64) -> Self {
        Self {
            scale,
            rounding,
            stickiness_cents: stickiness_cents.clamp(0.0, MAX_STICKINESS_CENTS),
            strength: strength.clamp(0.0, 1.0),
        }
    }

    /// Effective hysteresis in steps, never more than 40% of a step
    #[inline]
    pub fn hysteresis_steps(&self) -> f64 {
        let step_cents = self.scale.tuning.step_cents();
        let cents = self
            .stickiness_cents
            .clamp(0.0, MAX_HYSTERESIS_FRACTION * step_cents);
        cents / step_cents
    }

    /// Mix the quantized value back toward the unquantized one
    #[inline]
    pub fn blend(&self, pre: f64, quantized: f64) -> f64 {
        blend(pre, quantized, self.strength)
    }
}

/// `pre + strength·(quantized − pre)`
#[inline]
pub fn blend(pre: f64, quantized: f64, strength: f64) -> f64 {
    pre + strength * (quantized - pre)
}

/// Per-voice latch state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuantLatch {
    latched_step: i64,
    initialized: bool,
    last_fs: f64,
    last_dir: i32,
}

impl QuantLatch {
    /// Uninitialized latch; the first sample snaps
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the latch; the next call re-seeds to the nearest allowed step
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    /// Latched scale step, once a sample has been seen
    pub fn latched_step(&self) -> Option<i64> {
        self.initialized.then_some(self.latched_step)
    }

    /// Direction currently held by the directional detector
    pub fn direction(&self) -> i32 {
        self.last_dir
    }

    fn seed(&mut self, scale: &Scale, fs: f64) {
        self.latched_step = scale.nearest_allowed_step(fs.round() as i64, fs);
        self.initialized = true;
        self.last_fs = fs;
        self.last_dir = 0;
    }

    /// Quantize `v` (volts) and return the snapped voltage
    pub fn quantize(&mut self, v: f64, cfg: &QuantConfig) -> f64 {
        let scale = &cfg.scale;
        let tuning = scale.tuning;

        if !v.is_finite() {
            return if self.initialized {
                tuning.step_to_volts(self.latched_step)
            } else {
                0.0
            };
        }

        let fs = tuning.fractional_steps(v);
        let n = tuning.steps as i64;

        if !self.initialized {
            self.seed(scale, fs);
            return tuning.step_to_volts(self.latched_step);
        }

        // Disallowed latch (mask edited) or a jump beyond one period
        if !scale.is_allowed_step(self.latched_step)
            || (fs - self.latched_step as f64).abs() > (n + 1) as f64
        {
            let dir = self.last_dir;
            self.seed(scale, fs);
            self.last_dir = dir;
        }

        let hs = cfg.hysteresis_steps();
        let intent = match cfg.rounding {
            RoundMode::Directional => {
                self.update_direction(fs, hs);
                if self.last_dir != 0 {
                    self.walk(scale, fs, hs, n);
                }
                self.last_dir
            }
            RoundMode::Nearest => {
                let candidate = scale.nearest_allowed_step(fs.round() as i64, fs);
                let boundary = (self.latched_step + candidate) as f64 / 2.0;
                self.try_move(candidate, boundary, fs, hs);
                0
            }
            RoundMode::Ceil => {
                let candidate = scale.nearest_allowed_step(fs.ceil() as i64, fs);
                let boundary = if candidate > self.latched_step {
                    scale.next_allowed_step(candidate, -1) as f64
                } else {
                    candidate as f64
                };
                self.try_move(candidate, boundary, fs, hs);
                1
            }
            RoundMode::Floor => {
                let candidate = scale.nearest_allowed_step(fs.floor() as i64, fs);
                let boundary = if candidate > self.latched_step {
                    candidate as f64
                } else {
                    scale.next_allowed_step(candidate, 1) as f64
                };
                self.try_move(candidate, boundary, fs, hs);
                -1
            }
        };

        tuning.step_to_volts(self.nudged_step(scale, fs, intent))
    }

    fn update_direction(&mut self, fs: f64, hs: f64) {
        let hd = (0.75 * hs).max(0.02);
        let delta = fs - self.last_fs;
        if delta > hd {
            self.last_dir = 1;
            self.last_fs = fs;
        } else if delta < -hd {
            self.last_dir = -1;
            self.last_fs = fs;
        }
    }

    /// Step through allowed steps in the held direction while the input is
    /// past each midpoint by more than the hysteresis
    fn walk(&mut self, scale: &Scale, fs: f64, hs: f64, n: i64) {
        for _ in 0..=n {
            let candidate = scale.next_allowed_step(self.latched_step, self.last_dir);
            let boundary = (self.latched_step + candidate) as f64 / 2.0;
            let crossed = if self.last_dir > 0 {
                fs > boundary + hs
            } else {
                fs < boundary - hs
            };
            if !crossed {
                break;
            }
            self.latched_step = candidate;
        }
    }

    fn try_move(&mut self, candidate: i64, boundary: f64, fs: f64, hs: f64) {
        if candidate > self.latched_step && fs - boundary >= hs {
            self.latched_step = candidate;
        } else if candidate < self.latched_step && boundary - fs >= hs {
            self.latched_step = candidate;
        }
    }

    /// Adjacent allowed step in the intended direction, when strictly closer
    fn nudged_step(&self, scale: &Scale, fs: f64, intent: i32) -> i64 {
        let latched = self.latched_step;
        if intent == 0 {
            return latched;
        }
        let residual = fs - latched as f64;
        if residual * intent as f64 <= 0.0 {
            return latched;
        }
        let adjacent = scale.next_allowed_step(latched, intent);
        if (adjacent as f64 - fs).abs() < (latched as f64 - fs).abs() - NUDGE_TOLERANCE_STEPS {
            adjacent
        } else {
            latched
        }
    }
}
