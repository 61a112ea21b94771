//! Tuning and Scale Model
//!
//! A tuning divides a period (one octave for EDO, anything for TET) into `N`
//! equal steps. A scale mask marks which of those steps are allowed, stored
//! root-relative so bit 0 is always the root.
//!
//! Masks are 128-bit sets, large enough for the 120-step maximum, so the
//! audio path never touches the heap when resolving or querying a scale.

use serde::{Deserialize, Serialize};

/// Largest supported number of steps per period
pub const MAX_STEPS: u32 = 120;

/// Fallback step count for invalid tunings
pub const DEFAULT_STEPS: u32 = 12;

/// How the period of a tuning is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TuningMode {
    /// Equal division of the octave
    #[default]
    Edo,
    /// Equal temperament with an arbitrary period
    Tet,
}

/// Equal-step tuning with a root
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub mode: TuningMode,
    /// Steps per period (N)
    pub steps: u32,
    /// Period length in octaves (1.0 for EDO)
    pub period_oct: f64,
    /// Root step, in `[0, N)`
    pub root: u32,
}

impl Tuning {
    /// Equal division of the octave
    pub fn edo(steps: u32) -> Self {
        Self {
            mode: TuningMode::Edo,
            steps,
            period_oct: 1.0,
            root: 0,
        }
        .sanitized()
    }

    /// Equal temperament with an arbitrary period in octaves
    pub fn tet(steps: u32, period_oct: f64) -> Self {
        Self {
            mode: TuningMode::Tet,
            steps,
            period_oct,
            root: 0,
        }
        .sanitized()
    }

    /// Same tuning transposed to `root`
    pub fn with_root(mut self, root: u32) -> Self {
        self.root = root;
        self.sanitized()
    }

    /// Clamp into a usable tuning, falling back to 12-EDO
    pub fn sanitized(mut self) -> Self {
        if self.steps == 0 {
            self.mode = TuningMode::Edo;
            self.steps = DEFAULT_STEPS;
            self.period_oct = 1.0;
        }
        self.steps = self.steps.min(MAX_STEPS);
        if self.mode == TuningMode::Edo {
            self.period_oct = 1.0;
        } else if !(self.period_oct.is_finite() && self.period_oct > 0.0) {
            self.period_oct = 1.0;
        }
        if self.root >= self.steps {
            self.root %= self.steps;
        }
        self
    }

    /// `N / periodOct`
    #[inline]
    pub fn steps_per_volt(&self) -> f64 {
        self.steps as f64 / self.period_oct
    }

    /// Size of one step in cents
    #[inline]
    pub fn step_cents(&self) -> f64 {
        1200.0 * self.period_oct / self.steps as f64
    }

    /// Volts → fractional steps
    #[inline]
    pub fn fractional_steps(&self, v: f64) -> f64 {
        v * self.steps_per_volt()
    }

    /// Step index → volts
    #[inline]
    pub fn step_to_volts(&self, step: i64) -> f64 {
        step as f64 / self.steps as f64 * self.period_oct
    }

    /// Root-relative pitch class of a step
    #[inline]
    pub fn pitch_class(&self, step: i64) -> u32 {
        (step - self.root as i64).rem_euclid(self.steps as i64) as u32
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::edo(DEFAULT_STEPS)
    }
}

/// Set of allowed pitch classes, bit 0 = root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "Vec<bool>", from = "Vec<bool>")]
pub struct ScaleMask {
    bits: u128,
    len: u32,
}

impl ScaleMask {
    /// Every step allowed
    pub fn all(len: u32) -> Self {
        let len = len.min(MAX_STEPS);
        let bits = if len >= 128 {
            u128::MAX
        } else {
            (1u128 << len) - 1
        };
        Self { bits, len }
    }

    /// No step allowed
    pub fn empty(len: u32) -> Self {
        Self {
            bits: 0,
            len: len.min(MAX_STEPS),
        }
    }

    /// Mask from a list of allowed root-relative steps (wrapped into the period)
    pub fn from_steps(len: u32, steps: &[u32]) -> Self {
        let mut mask = Self::empty(len);
        for &s in steps {
            if mask.len > 0 {
                mask.set(s % mask.len, true);
            }
        }
        mask
    }

    pub fn from_bools(bits: &[bool]) -> Self {
        let mut mask = Self::empty(bits.len() as u32);
        for (i, &on) in bits.iter().take(MAX_STEPS as usize).enumerate() {
            mask.set(i as u32, on);
        }
        mask
    }

    /// One bool per pitch class
    pub fn to_bools(&self) -> Vec<bool> {
        (0..self.len).map(|i| self.get(i)).collect()
    }

    /// Number of pitch classes
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether pitch class `pc` is allowed
    #[inline]
    pub fn get(&self, pc: u32) -> bool {
        pc < self.len && (self.bits >> pc) & 1 == 1
    }

    /// Allow or block pitch class `pc`
    pub fn set(&mut self, pc: u32, on: bool) {
        if pc >= self.len {
            return;
        }
        if on {
            self.bits |= 1u128 << pc;
        } else {
            self.bits &= !(1u128 << pc);
        }
    }

    /// Number of allowed steps
    #[inline]
    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    /// Rotate so that absolute pitch class `root` becomes bit 0
    pub fn rotated_to_root(&self, root: u32) -> Self {
        if self.len == 0 {
            return *self;
        }
        let mut out = Self::empty(self.len);
        for pc in 0..self.len {
            if self.get((pc + root) % self.len) {
                out.set(pc, true);
            }
        }
        out
    }
}

/// Curated 12-EDO presets
const PRESETS_12: &[(&str, &[u32])] = &[
    ("Chromatic", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]),
    ("Major", &[0, 2, 4, 5, 7, 9, 11]),
    ("Natural Minor", &[0, 2, 3, 5, 7, 8, 10]),
    ("Harmonic Minor", &[0, 2, 3, 5, 7, 8, 11]),
    ("Melodic Minor", &[0, 2, 3, 5, 7, 9, 11]),
    ("Dorian", &[0, 2, 3, 5, 7, 9, 10]),
    ("Phrygian", &[0, 1, 3, 5, 7, 8, 10]),
    ("Lydian", &[0, 2, 4, 6, 7, 9, 11]),
    ("Mixolydian", &[0, 2, 4, 5, 7, 9, 10]),
    ("Locrian", &[0, 1, 3, 5, 6, 8, 10]),
    ("Major Pentatonic", &[0, 2, 4, 7, 9]),
    ("Minor Pentatonic", &[0, 3, 5, 7, 10]),
    ("Blues", &[0, 3, 5, 6, 7, 10]),
    ("Whole Tone", &[0, 2, 4, 6, 8, 10]),
];

/// Curated 24-EDO presets (quarter-tone and maqam approximations)
const PRESETS_24: &[(&str, &[u32])] = &[
    ("Chromatic", &[]),
    ("Major", &[0, 4, 8, 10, 14, 18, 22]),
    ("Natural Minor", &[0, 4, 6, 10, 14, 16, 20]),
    ("Rast", &[0, 4, 7, 10, 14, 18, 21]),
    ("Bayati", &[0, 3, 6, 10, 14, 16, 20]),
    ("Saba", &[0, 3, 6, 8, 14, 16, 20]),
    ("Sikah", &[0, 3, 7, 11, 14, 17, 21]),
    ("Neutral Diatonic", &[0, 3, 7, 10, 14, 17, 21]),
];

/// Shapes mapped onto the nearest steps of any other tuning, in 12-EDO semitones
const PRESETS_GENERIC: &[(&str, &[u32])] = &[
    ("Chromatic", &[]),
    ("Major (approx.)", &[0, 2, 4, 5, 7, 9, 11]),
    ("Minor (approx.)", &[0, 2, 3, 5, 7, 8, 10]),
    ("Major Pentatonic (approx.)", &[0, 2, 4, 7, 9]),
    ("Minor Pentatonic (approx.)", &[0, 3, 5, 7, 10]),
    ("Whole Tone (approx.)", &[0, 2, 4, 6, 8, 10]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PresetTable {
    Edo12,
    Edo24,
    Generic,
}

impl PresetTable {
    fn for_tuning(tuning: &Tuning) -> Self {
        match (tuning.mode, tuning.steps) {
            (TuningMode::Edo, 12) => PresetTable::Edo12,
            (TuningMode::Edo, 24) => PresetTable::Edo24,
            _ => PresetTable::Generic,
        }
    }

    fn entries(self) -> &'static [(&'static str, &'static [u32])] {
        match self {
            PresetTable::Edo12 => PRESETS_12,
            PresetTable::Edo24 => PRESETS_24,
            PresetTable::Generic => PRESETS_GENERIC,
        }
    }
}

/// Names of the presets available for a tuning, in index order
pub fn preset_names(tuning: &Tuning) -> impl Iterator<Item = &'static str> {
    PresetTable::for_tuning(tuning)
        .entries()
        .iter()
        .map(|(name, _)| *name)
}

/// Number of presets available for a tuning
pub fn preset_count(tuning: &Tuning) -> usize {
    PresetTable::for_tuning(tuning).entries().len()
}

/// Build the mask of preset `index` for `tuning` (out-of-range uses index 0)
pub fn preset_mask(tuning: &Tuning, index: usize) -> ScaleMask {
    let table = PresetTable::for_tuning(tuning);
    let entries = table.entries();
    let (_, steps) = entries.get(index).copied().unwrap_or(entries[0]);

    if steps.is_empty() {
        return ScaleMask::all(tuning.steps);
    }

    match table {
        PresetTable::Edo12 | PresetTable::Edo24 => ScaleMask::from_steps(tuning.steps, steps),
        PresetTable::Generic => {
            let n = tuning.steps as i64;
            let mut mask = ScaleMask::empty(tuning.steps);
            for &semi in steps {
                let step = (semi as f64 / 12.0 / tuning.period_oct * n as f64).round() as i64;
                mask.set(step.rem_euclid(n) as u32, true);
            }
            mask
        }
    }
}

impl From<ScaleMask> for Vec<bool> {
    fn from(mask: ScaleMask) -> Self {
        mask.to_bools()
    }
}

impl From<Vec<bool>> for ScaleMask {
    fn from(bits: Vec<bool>) -> Self {
        ScaleMask::from_bools(&bits)
    }
}

/// Which scale is selected: a preset or the custom mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScaleSelection {
    pub use_custom: bool,
    pub preset_index: usize,
    pub custom: ScaleMask,
}

impl ScaleSelection {
    /// Resolve to the effective mask for `tuning`.
    ///
    /// A custom mask whose length differs from N, or any mask with no bits
    /// set, resolves to allow-all.
    pub fn resolve(&self, tuning: &Tuning) -> ScaleMask {
        let mask = if self.use_custom {
            if self.custom.len() == tuning.steps {
                self.custom
            } else {
                ScaleMask::all(tuning.steps)
            }
        } else {
            preset_mask(tuning, self.preset_index)
        };

        if mask.count() == 0 {
            ScaleMask::all(tuning.steps)
        } else {
            mask
        }
    }
}

/// A tuning together with its resolved mask; answers step membership queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub tuning: Tuning,
    mask: ScaleMask,
}

impl Scale {
    pub fn new(tuning: Tuning, selection: &ScaleSelection) -> Self {
        let tuning = tuning.sanitized();
        Self {
            tuning,
            mask: selection.resolve(&tuning),
        }
    }

    /// Every step of `tuning` allowed
    pub fn chromatic(tuning: Tuning) -> Self {
        let tuning = tuning.sanitized();
        Self {
            tuning,
            mask: ScaleMask::all(tuning.steps),
        }
    }

    /// Allowed pitch classes
    #[inline]
    pub fn mask(&self) -> &ScaleMask {
        &self.mask
    }

    /// Steps per period
    #[inline]
    pub fn steps(&self) -> u32 {
        self.tuning.steps
    }

    /// Whether absolute step `s` lands on an allowed pitch class
    #[inline]
    pub fn is_allowed_step(&self, s: i64) -> bool {
        if self.mask.len() != self.tuning.steps {
            return true;
        }
        self.mask.get(self.tuning.pitch_class(s))
    }

    /// Allowed step closest to `guess`, searching outward ring by ring.
    /// Within a ring, the candidate closer to `fs` wins.
    pub fn nearest_allowed_step(&self, guess: i64, fs: f64) -> i64 {
        if self.is_allowed_step(guess) {
            return guess;
        }
        let n = self.tuning.steps as i64;
        for k in 1..=n {
            let lo = guess - k;
            let hi = guess + k;
            match (self.is_allowed_step(lo), self.is_allowed_step(hi)) {
                (true, true) => {
                    return if (hi as f64 - fs).abs() < (lo as f64 - fs).abs() {
                        hi
                    } else {
                        lo
                    };
                }
                (true, false) => return lo,
                (false, true) => return hi,
                (false, false) => {}
            }
        }
        guess
    }

    /// First allowed step strictly after `start` in direction `dir`
    pub fn next_allowed_step(&self, start: i64, dir: i32) -> i64 {
        let dir = if dir < 0 { -1 } else { 1 };
        let n = self.tuning.steps as i64;
        for k in 1..=n {
            let s = start + k * dir;
            if self.is_allowed_step(s) {
                return s;
            }
        }
        start + dir
    }
}
