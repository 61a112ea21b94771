//! Engine Configuration
//!
//! Menu-level options: output handling, range conditioning, tuning and
//! scale, quantizer behavior, strum, polyphony fades, randomization and the
//! per-voice settings. Everything here changes rarely; the engine reads it
//! once per block.

use crate::quantizer::{QuantConfig, RoundMode, MAX_STICKINESS_CENTS};
use crate::random::RandScope;
use crate::shaping::{RangeMode, CLIP_LIMITS, MAX_V};
use crate::strum::StrumSettings;
use crate::tuning::{preset_count, Scale, ScaleMask, ScaleSelection, Tuning, TuningMode, MAX_STEPS};
use crate::MAX_VOICES;
use serde::{Deserialize, Serialize};

/// Octave shift limit per voice
pub const MAX_OCT_SHIFT: i32 = 5;

/// Default polyphony fade in seconds
pub const DEFAULT_POLY_FADE_SEC: f64 = 0.01;

/// Offset snapping unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SnapMode {
    #[default]
    Voltage,
    Semitone,
    Cent,
}

impl SnapMode {
    /// Snap quantum in volts, `None` when offsets are free
    pub fn quantum(&self, tuning: &Tuning) -> Option<f64> {
        match self {
            SnapMode::Voltage => None,
            SnapMode::Semitone => Some(1.0 / tuning.steps_per_volt()),
            SnapMode::Cent => Some(1.0 / 1200.0),
        }
    }
}

/// Where the quantizer sits relative to the slew stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuantizerPos {
    /// Quantize, then glide between the snapped values
    #[default]
    Pre,
    /// Glide, then quantize the moving value
    Post,
}

/// Per-voice options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub qz_enabled: bool,
    /// Octave shift in [-5, 5], applied in periods of the tuning
    pub oct_shift: i32,
    pub slew_enabled: bool,
    pub pre_scale: f64,
    pub pre_offset: f64,
    /// Offset snap override; `None` follows the global mode
    pub snap: Option<SnapMode>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            qz_enabled: true,
            oct_shift: 0,
            slew_enabled: true,
            pre_scale: 1.0,
            pre_offset: 0.0,
            snap: None,
        }
    }
}

impl VoiceConfig {
    fn sanitize(&mut self) {
        self.oct_shift = self.oct_shift.clamp(-MAX_OCT_SHIFT, MAX_OCT_SHIFT);
        self.pre_scale = finite_or(self.pre_scale, 1.0).clamp(-MAX_V, MAX_V);
        self.pre_offset = finite_or(self.pre_offset, 0.0).clamp(-MAX_V, MAX_V);
    }
}

/// Randomization options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandConfig {
    /// Timer or clock firing
    pub auto: bool,
    /// Clock-synced instead of free-running
    pub sync: bool,
    /// Depth ceiling, multiplies the amount knob
    pub max_pct: f64,
    pub scope: RandScope,
}

impl Default for RandConfig {
    fn default() -> Self {
        Self {
            auto: false,
            sync: false,
            max_pct: 1.0,
            scope: RandScope::default(),
        }
    }
}

/// Identity of the tuning/scale state; a change invalidates every quantizer latch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantKey {
    mode: TuningMode,
    steps: u32,
    period_oct: f64,
    root: u32,
    use_custom: bool,
    preset_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// 0 follows the input channel count
    pub forced_channels: usize,
    pub sum_to_mono: bool,
    pub avg_when_summing: bool,
    pub soft_clip_out: bool,
    /// Index into the range half-limit presets
    pub clip_index: usize,
    pub range_mode: RangeMode,
    pub snap_mode: SnapMode,
    pub quantizer_pos: QuantizerPos,
    pub round_mode: RoundMode,
    pub stickiness_cents: f64,
    pub strength: f64,
    pub tuning_mode: TuningMode,
    pub edo_steps: u32,
    pub tet_steps: u32,
    pub tet_period_oct: f64,
    pub root: u32,
    pub use_custom_scale: bool,
    pub scale_index: usize,
    /// Root-relative custom mask, length should equal N
    pub custom_mask: ScaleMask,
    pub voices: [VoiceConfig; MAX_VOICES],
    pub strum: StrumSettings,
    pub poly_fade_sec: f64,
    pub pitch_safe_glide: bool,
    pub rand: RandConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forced_channels: 0,
            sum_to_mono: false,
            avg_when_summing: false,
            soft_clip_out: true,
            clip_index: 0,
            range_mode: RangeMode::Clip,
            snap_mode: SnapMode::Voltage,
            quantizer_pos: QuantizerPos::Pre,
            round_mode: RoundMode::Directional,
            stickiness_cents: 5.0,
            strength: 1.0,
            tuning_mode: TuningMode::Edo,
            edo_steps: 12,
            // Bohlen-Pierce: 13 steps of a tritave
            tet_steps: 13,
            tet_period_oct: libm::log2(3.0),
            root: 0,
            use_custom_scale: false,
            scale_index: 0,
            custom_mask: ScaleMask::all(12),
            voices: [VoiceConfig::default(); MAX_VOICES],
            strum: StrumSettings::default(),
            poly_fade_sec: DEFAULT_POLY_FADE_SEC,
            pitch_safe_glide: true,
            rand: RandConfig::default(),
        }
    }
}

impl Config {
    /// Active tuning (sanitized)
    pub fn tuning(&self) -> Tuning {
        let tuning = match self.tuning_mode {
            TuningMode::Edo => Tuning::edo(self.edo_steps),
            TuningMode::Tet => Tuning::tet(self.tet_steps, self.tet_period_oct),
        };
        tuning.with_root(self.root)
    }

    /// Scale source picked by the custom-scale switch
    pub fn scale_selection(&self) -> ScaleSelection {
        ScaleSelection {
            use_custom: self.use_custom_scale,
            preset_index: self.scale_index,
            custom: self.custom_mask,
        }
    }

    /// Scale built from the active tuning and selection
    pub fn scale(&self) -> Scale {
        Scale::new(self.tuning(), &self.scale_selection())
    }

    /// Quantizer settings derived from the menu
    pub fn quant_config(&self) -> QuantConfig {
        QuantConfig::new(
            self.scale(),
            self.round_mode,
            self.stickiness_cents,
            self.strength,
        )
    }

    /// Key that changes whenever tuning or scale does
    pub fn quant_key(&self) -> QuantKey {
        let tuning = self.tuning();
        QuantKey {
            mode: tuning.mode,
            steps: tuning.steps,
            period_oct: tuning.period_oct,
            root: tuning.root,
            use_custom: self.use_custom_scale,
            preset_index: self.scale_index,
        }
    }

    /// Effective snap mode of voice `i`
    pub fn voice_snap(&self, i: usize) -> SnapMode {
        self.voices
            .get(i)
            .and_then(|v| v.snap)
            .unwrap_or(self.snap_mode)
    }

    /// Randomization depth after the ceiling
    pub fn rand_depth(&self, amount: f64) -> f64 {
        (amount * self.rand.max_pct).clamp(0.0, 1.0)
    }

    /// Clamp every field into its legal range
    pub fn sanitize(&mut self) {
        self.forced_channels = self.forced_channels.min(MAX_VOICES);
        self.clip_index = self.clip_index.min(CLIP_LIMITS.len() - 1);
        self.stickiness_cents = finite_or(self.stickiness_cents, 0.0).clamp(0.0, MAX_STICKINESS_CENTS);
        self.strength = finite_or(self.strength, 1.0).clamp(0.0, 1.0);
        self.edo_steps = self.edo_steps.clamp(1, MAX_STEPS);
        self.tet_steps = self.tet_steps.clamp(1, MAX_STEPS);
        if !(self.tet_period_oct.is_finite() && self.tet_period_oct > 0.0) {
            self.tet_period_oct = 1.0;
        }
        let tuning = self.tuning();
        self.root = tuning.root;
        if self.scale_index >= preset_count(&tuning) {
            self.scale_index = 0;
        }
        self.strum.spread_ms = finite_or(self.strum.spread_ms, 0.0).max(0.0);
        self.poly_fade_sec = finite_or(self.poly_fade_sec, 0.0).max(0.0);
        self.rand.max_pct = finite_or(self.rand.max_pct, 1.0).clamp(0.0, 1.0);
        for voice in &mut self.voices {
            voice.sanitize();
        }
    }
}

#[inline]
fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        fallback
    }
}
