//! Parameter Surface
//!
//! Knob values the host (or a UI thread) writes and the engine reads each
//! block, plus the display/parse helpers for their text fields.
//!
//! Two global knobs are dual-mode banks: each stores an `a` and a `b` value,
//! the mode picks which one the knob edits, and the always-on flags let the
//! other function keep applying.

use crate::config::SnapMode;
use crate::shaping::{slew_knob_to_seconds, MAX_V};
use crate::tuning::Tuning;
use crate::MAX_VOICES;
use serde::{Deserialize, Serialize};

/// Range offset (bank B of the offset knob) limit in volts
pub const RANGE_OFFSET_MAX: f64 = 5.0;

/// Polyphony fade presets in milliseconds
pub const POLY_FADE_PRESETS_MS: [f64; 9] = [0.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BankMode {
    #[default]
    A,
    B,
}

/// Two values behind one knob
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DualBank {
    pub a: f64,
    pub b: f64,
    pub mode: BankMode,
    pub a_always_on: bool,
    pub b_always_on: bool,
}

impl DualBank {
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            a,
            b,
            mode: BankMode::A,
            a_always_on: false,
            b_always_on: false,
        }
    }

    /// Value currently backing the knob
    pub fn active(&self) -> f64 {
        match self.mode {
            BankMode::A => self.a,
            BankMode::B => self.b,
        }
    }

    /// Write `value` to whichever bank is active
    pub fn set_active(&mut self, value: f64) {
        match self.mode {
            BankMode::A => self.a = value,
            BankMode::B => self.b = value,
        }
    }

    /// True when bank A feeds the voices
    #[inline]
    pub fn a_applies(&self) -> bool {
        self.mode == BankMode::A || self.a_always_on
    }

    #[inline]
    pub fn b_applies(&self) -> bool {
        self.mode == BankMode::B || self.b_always_on
    }
}

/// Knob state read by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Per-voice slew knobs, raw [0, 1]
    pub slew: [f64; MAX_VOICES],
    /// Per-voice offsets in volts
    pub offset: [f64; MAX_VOICES],
    pub rise_shape: f64,
    pub fall_shape: f64,
    /// A: slew-add (raw, log seconds), B: input attenuverter (raw)
    pub global_slew: DualBank,
    /// A: global offset (volts), B: range offset (volts)
    pub global_offset: DualBank,
    /// Randomization time knob while free-running, raw [0, 1]
    pub rand_time_free: f64,
    /// Randomization time knob while clock-synced, raw [0, 1]
    pub rand_time_sync: f64,
    /// Randomization depth [0, 1]
    pub rand_amount: f64,
    /// Momentary Randomize button
    pub randomize: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            slew: [0.0; MAX_VOICES],
            offset: [0.0; MAX_VOICES],
            rise_shape: 0.0,
            fall_shape: 0.0,
            // b = 0.55 is unity attenuverter gain
            global_slew: DualBank::new(0.0, 0.55),
            global_offset: DualBank::new(0.0, 0.0),
            rand_time_free: 0.5,
            rand_time_sync: 0.5,
            rand_amount: 0.5,
            randomize: false,
        }
    }
}

impl Params {
    /// Clamp every knob into its range; non-finite values reset to defaults
    pub fn sanitize(&mut self) {
        let defaults = Params::default();
        for v in &mut self.slew {
            *v = finite_clamp(*v, 0.0, 1.0, 0.0);
        }
        for v in &mut self.offset {
            *v = finite_clamp(*v, -MAX_V, MAX_V, 0.0);
        }
        self.rise_shape = finite_clamp(self.rise_shape, -1.0, 1.0, 0.0);
        self.fall_shape = finite_clamp(self.fall_shape, -1.0, 1.0, 0.0);
        self.global_slew.a = finite_clamp(self.global_slew.a, 0.0, 1.0, 0.0);
        self.global_slew.b = finite_clamp(self.global_slew.b, 0.0, 1.0, defaults.global_slew.b);
        self.global_offset.a = finite_clamp(self.global_offset.a, -MAX_V, MAX_V, 0.0);
        self.global_offset.b =
            finite_clamp(self.global_offset.b, -RANGE_OFFSET_MAX, RANGE_OFFSET_MAX, 0.0);
        self.rand_time_free = finite_clamp(self.rand_time_free, 0.0, 1.0, defaults.rand_time_free);
        self.rand_time_sync = finite_clamp(self.rand_time_sync, 0.0, 1.0, defaults.rand_time_sync);
        self.rand_amount = finite_clamp(self.rand_amount, 0.0, 1.0, defaults.rand_amount);
    }

    /// Glide time of voice `i`'s knob in seconds
    pub fn voice_slew_seconds(&self, i: usize) -> f64 {
        slew_knob_to_seconds(self.slew.get(i).copied().unwrap_or(0.0))
    }

    /// Extra glide time from the global slew knob (bank A); zero at the knob minimum
    pub fn global_slew_add_seconds(&self) -> f64 {
        if self.global_slew.a_applies() && self.global_slew.a > 0.0 {
            slew_knob_to_seconds(self.global_slew.a)
        } else {
            0.0
        }
    }

    /// Input attenuverter gain `-10 + 20·raw` when bank B applies
    pub fn attenuverter_gain(&self) -> Option<f64> {
        self.global_slew
            .b_applies()
            .then(|| -10.0 + 20.0 * self.global_slew.b.clamp(0.0, 1.0))
    }

    /// Global offset in volts when bank A applies
    pub fn global_offset_volts(&self) -> f64 {
        if self.global_offset.a_applies() {
            self.global_offset.a
        } else {
            0.0
        }
    }

    /// Range offset in volts when bank B applies
    pub fn range_offset_volts(&self) -> f64 {
        if self.global_offset.b_applies() {
            self.global_offset.b
        } else {
            0.0
        }
    }

    /// Time knob for the current randomization mode
    pub fn rand_time(&self, sync: bool) -> f64 {
        if sync {
            self.rand_time_sync
        } else {
            self.rand_time_free
        }
    }
}

#[inline]
fn finite_clamp(v: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v.clamp(min, max)
    } else {
        fallback
    }
}

fn step_label(tuning: &Tuning) -> &'static str {
    if tuning.steps == 12 && tuning.period_oct == 1.0 {
        "st"
    } else {
        "steps"
    }
}

/// Format an offset for display in the given unit
pub fn format_offset(volts: f64, unit: SnapMode, tuning: &Tuning) -> String {
    match unit {
        SnapMode::Voltage => format!("{:+.3} V", volts),
        SnapMode::Semitone => format!(
            "{:+.2} {}",
            volts * tuning.steps_per_volt(),
            step_label(tuning)
        ),
        SnapMode::Cent => format!("{:+.1} ct", volts * 1200.0),
    }
}

/// Parse offset text. A unit suffix (`v`, `st`/`steps`/`semi`, `c`/`ct`/`cents`)
/// overrides `unit`; a bare number is read in `unit`. Result is volts.
pub fn parse_offset(text: &str, unit: SnapMode, tuning: &Tuning) -> Option<f64> {
    let lower = text.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(lower.len());
    let (number, suffix) = lower.split_at(split);
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    let unit = match suffix.trim() {
        "" => unit,
        "v" | "volt" | "volts" => SnapMode::Voltage,
        "st" | "semi" | "semis" | "semitone" | "semitones" | "step" | "steps" => SnapMode::Semitone,
        "c" | "ct" | "cent" | "cents" => SnapMode::Cent,
        _ => return None,
    };

    let volts = match unit {
        SnapMode::Voltage => value,
        SnapMode::Semitone => value / tuning.steps_per_volt(),
        SnapMode::Cent => value / 1200.0,
    };
    Some(volts.clamp(-MAX_V, MAX_V))
}

/// "Log p%", "Linear" or "Exp p%"
pub fn format_shape(shape: f64) -> String {
    let pct = (shape.clamp(-1.0, 1.0) * 100.0).round();
    if pct == 0.0 {
        "Linear".to_string()
    } else if pct < 0.0 {
        format!("Log {}%", -pct)
    } else {
        format!("Exp {}%", pct)
    }
}

/// Inverse of [`format_shape`]; also accepts a bare signed percentage
pub fn parse_shape(text: &str) -> Option<f64> {
    let lower = text.trim().to_ascii_lowercase();
    if lower == "linear" || lower == "lin" {
        return Some(0.0);
    }
    let (sign, rest) = if let Some(rest) = lower.strip_prefix("log") {
        (-1.0, rest)
    } else if let Some(rest) = lower.strip_prefix("exp") {
        (1.0, rest)
    } else {
        (1.0, lower.as_str())
    };
    let pct: f64 = rest.trim().trim_end_matches('%').trim().parse().ok()?;
    if !pct.is_finite() {
        return None;
    }
    Some((sign * pct / 100.0).clamp(-1.0, 1.0))
}

/// Seconds as "12.5 ms" or "1.50 s"
pub fn format_seconds(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{:.1} ms", seconds * 1000.0)
    } else {
        format!("{:.2} s", seconds)
    }
}
