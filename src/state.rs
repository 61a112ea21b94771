//! Persisted State
//!
//! A versioned JSON document holding the configuration and the knob surface.
//! Reading is per key: unknown keys are ignored, missing keys or keys of the
//! wrong type keep their defaults, and everything is clamped afterwards, so
//! a damaged document still loads.
//!
//! Older documents may carry these keys:
//!
//! - `forcePoly: true` → `forcedChannels = 16`
//! - `snapOffsets: true` → Semitone offset snapping
//! - `customMaskAbsolute: true` → the custom mask is stored by absolute
//!   pitch class and is rotated to the root on load

use crate::config::{Config, QuantizerPos, SnapMode};
use crate::params::{BankMode, DualBank, Params};
use crate::quantizer::RoundMode;
use crate::shaping::RangeMode;
use crate::strum::{StrumMode, StrumType};
use crate::tuning::{ScaleMask, TuningMode};
use crate::MAX_VOICES;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Version written by [`State::capture`]
pub const STATE_VERSION: u64 = 2;

const ROUND_MODES: [RoundMode; 4] = [
    RoundMode::Directional,
    RoundMode::Nearest,
    RoundMode::Ceil,
    RoundMode::Floor,
];
const SNAP_MODES: [SnapMode; 3] = [SnapMode::Voltage, SnapMode::Semitone, SnapMode::Cent];
const RANGE_MODES: [RangeMode; 2] = [RangeMode::Clip, RangeMode::Scale];
const QUANT_POSITIONS: [QuantizerPos; 2] = [QuantizerPos::Pre, QuantizerPos::Post];
const TUNING_MODES: [TuningMode; 2] = [TuningMode::Edo, TuningMode::Tet];
const STRUM_MODES: [StrumMode; 3] = [StrumMode::Up, StrumMode::Down, StrumMode::Random];
const STRUM_TYPES: [StrumType; 2] = [StrumType::TimeStretch, StrumType::StartDelay];
const BANK_MODES: [BankMode; 2] = [BankMode::A, BankMode::B];

/// Errors from parsing a state document
#[derive(Debug, Clone, PartialEq)]
pub enum StateError {
    /// Text is not valid JSON
    Parse(String),
    /// Top level is not a JSON object
    NotAnObject,
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Parse(msg) => write!(f, "State parse failed: {}", msg),
            StateError::NotAnObject => write!(f, "State document is not an object"),
        }
    }
}

impl std::error::Error for StateError {}

fn index_of<T: PartialEq + Copy>(all: &[T], value: T) -> usize {
    all.iter().position(|&v| v == value).unwrap_or(0)
}

/// Per-key getters with defaults
struct Reader<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Reader<'a> {
    fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.map
            .get(key)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.map.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map_or(default, |v| v != 0.0),
            _ => default,
        }
    }

    fn int(&self, key: &str, default: i64) -> i64 {
        match self.map.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.round() as i64))
                .unwrap_or(default),
            _ => default,
        }
    }

    fn uint(&self, key: &str, default: u64) -> u64 {
        self.int(key, default as i64).max(0) as u64
    }

    /// Enum stored as its index; unknown indices keep the default
    fn choice<T: PartialEq + Copy>(&self, key: &str, all: &[T], default: T) -> T {
        let index = self.int(key, index_of(all, default) as i64);
        usize::try_from(index)
            .ok()
            .and_then(|i| all.get(i).copied())
            .unwrap_or(default)
    }

    fn array(&self, key: &str) -> Option<&'a Vec<Value>> {
        self.map.get(key).and_then(Value::as_array)
    }

    fn f64_array(&self, key: &str, out: &mut [f64; MAX_VOICES]) {
        if let Some(items) = self.array(key) {
            for (slot, item) in out.iter_mut().zip(items) {
                if let Some(v) = item.as_f64().filter(|v| v.is_finite()) {
                    *slot = v;
                }
            }
        }
    }

    fn bool_array(&self, key: &str, out: &mut [bool; MAX_VOICES]) {
        if let Some(items) = self.array(key) {
            for (slot, item) in out.iter_mut().zip(items) {
                match item {
                    Value::Bool(b) => *slot = *b,
                    Value::Number(n) => *slot = n.as_f64().map_or(*slot, |v| v != 0.0),
                    _ => {}
                }
            }
        }
    }

    fn bank(&self, prefix: &str, default: DualBank) -> DualBank {
        DualBank {
            a: self.f64(&format!("{}A", prefix), default.a),
            b: self.f64(&format!("{}B", prefix), default.b),
            mode: self.choice(&format!("{}Mode", prefix), &BANK_MODES, default.mode),
            a_always_on: self.bool(&format!("{}AAlwaysOn", prefix), default.a_always_on),
            b_always_on: self.bool(&format!("{}BAlwaysOn", prefix), default.b_always_on),
        }
    }
}

fn write_bank(map: &mut Map<String, Value>, prefix: &str, bank: &DualBank) {
    map.insert(format!("{}A", prefix), json!(bank.a));
    map.insert(format!("{}B", prefix), json!(bank.b));
    map.insert(format!("{}Mode", prefix), json!(index_of(&BANK_MODES, bank.mode)));
    map.insert(format!("{}AAlwaysOn", prefix), json!(bank.a_always_on));
    map.insert(format!("{}BAlwaysOn", prefix), json!(bank.b_always_on));
}

/// A persisted document
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    value: Value,
}

impl State {
    /// Wrap a JSON value. Non-object values load as all defaults.
    pub fn from_value(value: Value) -> Self {
        Self { value }
    }

    /// Parse a saved JSON document
    pub fn from_json_str(text: &str) -> Result<Self, StateError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| StateError::Parse(e.to_string()))?;
        if !value.is_object() {
            return Err(StateError::NotAnObject);
        }
        Ok(Self::from_value(value))
    }

    /// Serialize to compact JSON
    pub fn to_json_string(&self) -> String {
        self.value.to_string()
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Unwrap to the underlying JSON value
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Version recorded in the document (0 when absent)
    pub fn version(&self) -> u64 {
        self.value
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Snapshot the configuration and knob surface
    pub fn capture(config: &Config, params: &Params) -> Self {
        let voices = &config.voices;
        let scope = &config.rand.scope;
        let slew_disabled = voices
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.slew_enabled)
            .fold(0u32, |bits, (i, _)| bits | (1 << i));
        let voice_snap: Vec<i64> = voices
            .iter()
            .map(|v| v.snap.map_or(-1, |m| index_of(&SNAP_MODES, m) as i64))
            .collect();

        let mut map = Map::new();
        let mut put = |key: &str, value: Value| {
            map.insert(key.to_string(), value);
        };
        put("version", json!(STATE_VERSION));
        put("forcedChannels", json!(config.forced_channels));
        put("sumToMonoOut", json!(config.sum_to_mono));
        put("avgWhenSumming", json!(config.avg_when_summing));
        put("softClipOut", json!(config.soft_clip_out));
        put("clipVppIndex", json!(config.clip_index));
        put("rangeMode", json!(index_of(&RANGE_MODES, config.range_mode)));
        put("snapOffsetMode", json!(index_of(&SNAP_MODES, config.snap_mode)));
        put("quantizerPos", json!(index_of(&QUANT_POSITIONS, config.quantizer_pos)));
        put("quantRoundMode", json!(index_of(&ROUND_MODES, config.round_mode)));
        put("stickinessCents", json!(config.stickiness_cents));
        put("quantStrength", json!(config.strength));
        put("tuningMode", json!(index_of(&TUNING_MODES, config.tuning_mode)));
        put("edo", json!(config.edo_steps));
        put("tetSteps", json!(config.tet_steps));
        put("tetPeriodOct", json!(config.tet_period_oct));
        put("rootNote", json!(config.root));
        put("useCustomScale", json!(config.use_custom_scale));
        put("scaleIndex", json!(config.scale_index));
        put("customMaskGeneric", json!(config.custom_mask.to_bools()));
        put("qzEnabled", json!(voices.iter().map(|v| v.qz_enabled).collect::<Vec<_>>()));
        put("postOctShift", json!(voices.iter().map(|v| v.oct_shift).collect::<Vec<_>>()));
        put("slewEnabled", json!(slew_disabled));
        put("preScale", json!(voices.iter().map(|v| v.pre_scale).collect::<Vec<_>>()));
        put("preOffset", json!(voices.iter().map(|v| v.pre_offset).collect::<Vec<_>>()));
        put("voiceSnapMode", json!(voice_snap));
        put("strumEnabled", json!(config.strum.enabled));
        put("strumMode", json!(index_of(&STRUM_MODES, config.strum.mode)));
        put("strumType", json!(index_of(&STRUM_TYPES, config.strum.kind)));
        put("strumMs", json!(config.strum.spread_ms));
        put("polyFadeSec", json!(config.poly_fade_sec));
        put("pitchSafeGlide", json!(config.pitch_safe_glide));
        put("rndAutoEnabled", json!(config.rand.auto));
        put("rndSyncMode", json!(config.rand.sync));
        put("randMaxPct", json!(config.rand.max_pct));
        put("randSlew", json!(scope.slew));
        put("randOffset", json!(scope.offset));
        put("randShapes", json!(scope.shapes));
        put("lockSlew", json!(scope.lock_slew));
        put("lockOffset", json!(scope.lock_offset));
        put("lockRiseShape", json!(scope.lock_rise));
        put("lockFallShape", json!(scope.lock_fall));
        put("allowSlew", json!(scope.allow_slew));
        put("allowOffset", json!(scope.allow_offset));
        put("allowRiseShape", json!(scope.allow_rise));
        put("allowFallShape", json!(scope.allow_fall));
        put("slewKnobs", json!(params.slew));
        put("offsets", json!(params.offset));
        put("riseShape", json!(params.rise_shape));
        put("fallShape", json!(params.fall_shape));
        put("randTimeFree", json!(params.rand_time_free));
        put("randTimeSync", json!(params.rand_time_sync));
        put("randAmount", json!(params.rand_amount));

        write_bank(&mut map, "globalSlew", &params.global_slew);
        write_bank(&mut map, "globalOffset", &params.global_offset);

        Self {
            value: Value::Object(map),
        }
    }

    /// Rebuild configuration and knobs, starting from defaults
    pub fn restore(&self) -> (Config, Params) {
        let mut config = Config::default();
        let mut params = Params::default();
        let empty = Map::new();
        let map = self.value.as_object().unwrap_or(&empty);
        let r = Reader { map };

        if !self.value.is_object() {
            warn!("state document is not an object, using defaults");
        }
        let version = self.version();
        if version > STATE_VERSION {
            warn!(version, "state document is newer than this build");
        }

        config.forced_channels = r.uint("forcedChannels", 0) as usize;
        if !r.has("forcedChannels") && r.bool("forcePoly", false) {
            warn!("legacy forcePoly mapped to 16 channels");
            config.forced_channels = MAX_VOICES;
        }
        config.sum_to_mono = r.bool("sumToMonoOut", config.sum_to_mono);
        config.avg_when_summing = r.bool("avgWhenSumming", config.avg_when_summing);
        config.soft_clip_out = r.bool("softClipOut", config.soft_clip_out);
        config.clip_index = r.uint("clipVppIndex", config.clip_index as u64) as usize;
        config.range_mode = r.choice("rangeMode", &RANGE_MODES, config.range_mode);
        config.snap_mode = r.choice("snapOffsetMode", &SNAP_MODES, config.snap_mode);
        if !r.has("snapOffsetMode") && r.bool("snapOffsets", false) {
            warn!("legacy snapOffsets mapped to semitone snapping");
            config.snap_mode = SnapMode::Semitone;
        }
        config.quantizer_pos = r.choice("quantizerPos", &QUANT_POSITIONS, config.quantizer_pos);
        config.round_mode = r.choice("quantRoundMode", &ROUND_MODES, config.round_mode);
        config.stickiness_cents = r.f64("stickinessCents", config.stickiness_cents);
        config.strength = r.f64("quantStrength", config.strength);
        config.tuning_mode = r.choice("tuningMode", &TUNING_MODES, config.tuning_mode);
        config.edo_steps = r.uint("edo", config.edo_steps as u64).min(u32::MAX as u64) as u32;
        config.tet_steps = r.uint("tetSteps", config.tet_steps as u64).min(u32::MAX as u64) as u32;
        config.tet_period_oct = r.f64("tetPeriodOct", config.tet_period_oct);
        config.root = r.uint("rootNote", config.root as u64).min(u32::MAX as u64) as u32;
        config.use_custom_scale = r.bool("useCustomScale", config.use_custom_scale);
        config.scale_index = r.uint("scaleIndex", config.scale_index as u64) as usize;

        if let Some(items) = r.array("customMaskGeneric") {
            let bits: Vec<bool> = items
                .iter()
                .map(|v| v.as_bool().unwrap_or_else(|| v.as_f64().map_or(false, |x| x != 0.0)))
                .collect();
            config.custom_mask = ScaleMask::from_bools(&bits);
        }

        let mut qz = [true; MAX_VOICES];
        r.bool_array("qzEnabled", &mut qz);
        let mut oct = [0.0; MAX_VOICES];
        r.f64_array("postOctShift", &mut oct);
        let mut pre_scale = [1.0; MAX_VOICES];
        r.f64_array("preScale", &mut pre_scale);
        let mut pre_offset = [0.0; MAX_VOICES];
        r.f64_array("preOffset", &mut pre_offset);
        let mut voice_snap = [-1.0; MAX_VOICES];
        r.f64_array("voiceSnapMode", &mut voice_snap);
        let slew_disabled = r.uint("slewEnabled", 0);
        for (i, voice) in config.voices.iter_mut().enumerate() {
            voice.qz_enabled = qz[i];
            voice.oct_shift = oct[i].round() as i32;
            voice.pre_scale = pre_scale[i];
            voice.pre_offset = pre_offset[i];
            voice.slew_enabled = slew_disabled & (1 << i) == 0;
            voice.snap = if voice_snap[i] < 0.0 {
                None
            } else {
                SNAP_MODES.get(voice_snap[i].round() as usize).copied()
            };
        }

        config.strum.enabled = r.bool("strumEnabled", config.strum.enabled);
        config.strum.mode = r.choice("strumMode", &STRUM_MODES, config.strum.mode);
        config.strum.kind = r.choice("strumType", &STRUM_TYPES, config.strum.kind);
        config.strum.spread_ms = r.f64("strumMs", config.strum.spread_ms);
        config.poly_fade_sec = r.f64("polyFadeSec", config.poly_fade_sec);
        config.pitch_safe_glide = r.bool("pitchSafeGlide", config.pitch_safe_glide);

        config.rand.auto = r.bool("rndAutoEnabled", config.rand.auto);
        config.rand.sync = r.bool("rndSyncMode", config.rand.sync);
        config.rand.max_pct = r.f64("randMaxPct", config.rand.max_pct);
        let scope = &mut config.rand.scope;
        scope.slew = r.bool("randSlew", scope.slew);
        scope.offset = r.bool("randOffset", scope.offset);
        scope.shapes = r.bool("randShapes", scope.shapes);
        r.bool_array("lockSlew", &mut scope.lock_slew);
        r.bool_array("lockOffset", &mut scope.lock_offset);
        scope.lock_rise = r.bool("lockRiseShape", scope.lock_rise);
        scope.lock_fall = r.bool("lockFallShape", scope.lock_fall);
        r.bool_array("allowSlew", &mut scope.allow_slew);
        r.bool_array("allowOffset", &mut scope.allow_offset);
        scope.allow_rise = r.bool("allowRiseShape", scope.allow_rise);
        scope.allow_fall = r.bool("allowFallShape", scope.allow_fall);

        r.f64_array("slewKnobs", &mut params.slew);
        r.f64_array("offsets", &mut params.offset);
        params.rise_shape = r.f64("riseShape", params.rise_shape);
        params.fall_shape = r.f64("fallShape", params.fall_shape);
        params.global_slew = r.bank("globalSlew", params.global_slew);
        params.global_offset = r.bank("globalOffset", params.global_offset);
        params.rand_time_free = r.f64("randTimeFree", params.rand_time_free);
        params.rand_time_sync = r.f64("randTimeSync", params.rand_time_sync);
        params.rand_amount = r.f64("randAmount", params.rand_amount);

        let loaded = (config.clone(), params.clone());
        config.sanitize();
        params.sanitize();
        if loaded != (config.clone(), params.clone()) {
            warn!("out-of-range persisted values were clamped");
        }

        if r.bool("customMaskAbsolute", false) {
            warn!("legacy absolute custom mask rotated to the root");
            config.custom_mask = config.custom_mask.rotated_to_root(config.root);
        }

        (config, params)
    }
}
