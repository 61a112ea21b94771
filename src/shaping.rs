//! Shaping and Mapping Utilities
//!
//! Leaf helpers shared by the voice pipeline: clipping (hard and soft-knee),
//! range conditioning, glide curve coefficients, and the logarithmic knob
//! mappings used by the slew and randomization controls.

use serde::{Deserialize, Serialize};

/// Output safety limit in volts
pub const MAX_V: f64 = 10.0;

/// Width of the soft-clip knee in volts
pub const KNEE_V: f64 = 1.0;

/// Shortest glide time produced by the slew knob (seconds)
pub const MIN_SLEW_SEC: f64 = 0.001;

/// Longest glide time produced by the slew knob (seconds)
pub const MAX_SLEW_SEC: f64 = 10.0;

/// Half-limits selectable for pre-quant range conditioning
pub const CLIP_LIMITS: [f64; 6] = [10.0, 7.5, 5.0, 2.5, 1.0, 0.5];

/// Smallest multiplier a curve shape may produce
const CURVE_EPSILON: f64 = 1e-6;

/// Hard clamp to `±limit`
#[inline]
pub fn hard_clip(x: f64, limit: f64) -> f64 {
    x.clamp(-limit, limit)
}

/// Soft saturation with a sine-shaped knee in the last `KNEE_V` volts.
///
/// Signals below `limit - knee` pass unchanged. Inside the knee the curve
/// leaves with unity slope and arrives at `±limit` with zero slope, after
/// which the output is pinned to the limit.
pub fn soft_clip(x: f64, limit: f64) -> f64 {
    let limit = limit.max(0.0);
    let knee = KNEE_V.min(limit);
    let linear = limit - knee;
    let mag = x.abs();

    if mag <= linear || knee <= 0.0 {
        return hard_clip(x, limit);
    }

    let theta = (mag - linear) / knee;
    let y = if theta >= core::f64::consts::FRAC_PI_2 {
        limit
    } else {
        linear + knee * libm::sin(theta)
    };
    y.copysign(x)
}

/// Soft or hard clip depending on `soft`
#[inline]
pub fn clip(x: f64, limit: f64, soft: bool) -> f64 {
    if soft {
        soft_clip(x, limit)
    } else {
        hard_clip(x, limit)
    }
}

/// How the pre-quant stage keeps a signal inside the selected window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RangeMode {
    /// Clamp (or soft-saturate) at the limit
    #[default]
    Clip,
    /// Scale the full ±10 V span down to the limit, then clamp
    Scale,
}

/// Half-limit in volts for a clip preset index (out-of-range falls back to 10 V)
#[inline]
pub fn clip_limit(index: usize) -> f64 {
    CLIP_LIMITS.get(index).copied().unwrap_or(MAX_V)
}

/// Range conditioning around 0 V
pub fn apply_range(x: f64, mode: RangeMode, clip_index: usize, soft: bool) -> f64 {
    let limit = clip_limit(clip_index);
    match mode {
        RangeMode::Clip => clip(x, limit, soft),
        RangeMode::Scale => hard_clip(x * (limit / MAX_V), limit),
    }
}

/// Glide curve derived from a bipolar shape control.
///
/// The multiplier is applied to the linear base rate as a function of the
/// remaining fraction `u` of the move. Both curve families integrate to the
/// same total time as the linear glide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveShape {
    k: f64,
    c: f64,
    negative: bool,
    linear: bool,
}

impl CurveShape {
    pub const LINEAR: CurveShape = CurveShape {
        k: 0.0,
        c: 1.0,
        negative: false,
        linear: true,
    };

    /// Curve for a shape knob in [-1, 1]
    pub fn from_shape(shape: f64) -> Self {
        let shape = if shape.is_finite() {
            shape.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        if shape.abs() < 1e-9 {
            Self::LINEAR
        } else if shape < 0.0 {
            let k = 8.0 * shape.abs();
            Self {
                k,
                c: (1.0 - libm::exp(-k)) / k,
                negative: true,
                linear: false,
            }
        } else {
            let k = 6.0 * shape;
            Self {
                k,
                c: 1.0 + k / 2.0,
                negative: false,
                linear: false,
            }
        }
    }

    #[inline]
    pub fn is_linear(&self) -> bool {
        self.linear
    }

    /// Rate multiplier for remaining fraction `u` (1 at the start of a move, 0 at the end)
    #[inline]
    pub fn multiplier(&self, u: f64) -> f64 {
        if self.linear {
            return 1.0;
        }
        let u = u.clamp(0.0, 1.0);
        let m = if self.negative {
            self.c * libm::exp(self.k * u)
        } else {
            self.c / (1.0 + self.k * u)
        };
        m.max(CURVE_EPSILON)
    }
}

impl Default for CurveShape {
    fn default() -> Self {
        Self::LINEAR
    }
}

/// Map a raw knob in [0, 1] logarithmically onto `[min, max]`
#[inline]
pub fn log_map(raw: f64, min: f64, max: f64) -> f64 {
    let r = raw.clamp(0.0, 1.0);
    let lo = libm::log10(min);
    let hi = libm::log10(max);
    libm::pow(10.0, lo + r * (hi - lo))
}

/// Inverse of [`log_map`]
#[inline]
pub fn log_unmap(value: f64, min: f64, max: f64) -> f64 {
    let lo = libm::log10(min);
    let hi = libm::log10(max);
    ((libm::log10(value.clamp(min, max)) - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Slew knob → seconds, 1 ms … 10 s
#[inline]
pub fn slew_knob_to_seconds(raw: f64) -> f64 {
    log_map(raw, MIN_SLEW_SEC, MAX_SLEW_SEC)
}

/// Seconds → slew knob position
#[inline]
pub fn seconds_to_slew_knob(seconds: f64) -> f64 {
    log_unmap(seconds, MIN_SLEW_SEC, MAX_SLEW_SEC)
}

/// Volts (1 V/oct) → semitones
#[inline]
pub fn volts_to_semitones(v: f64) -> f64 {
    v * 12.0
}

/// Semitones → volts (1 V/oct)
#[inline]
pub fn semitones_to_volts(semi: f64) -> f64 {
    semi / 12.0
}

/// Round `x` to the nearest multiple of `quantum`
#[inline]
pub fn snap_to(x: f64, quantum: f64) -> f64 {
    if quantum > 0.0 && quantum.is_finite() {
        (x / quantum).round() * quantum
    } else {
        x
    }
}
