//! Polyphonic Voice Engine
//!
//! Runs up to 16 voices through the pitch pipeline, one host block at a time:
//!
//! ```text
//! input → attenuverter → offsets (+snap) → preScale/preOffset → range
//!       → range offset + octave shift → Pre:  quantize → blend → slew
//!                                      Post: slew → quantize → blend
//!       → final clip → fade ramp → output
//! ```
//!
//! Per sample the engine advances the voice pipeline, the randomization
//! scheduler and the strum hold checks. Per block it advances the polyphony
//! fade, the strum countdowns and the LED smoothing.
//!
//! # Example
//!
//! ```
//! use polyslew::prelude::*;
//!
//! let mut engine = Engine::with_seed(48_000.0, 7);
//! engine.config_mut().round_mode = RoundMode::Nearest;
//!
//! let inputs = [PolyFrame::from_slice(&[0.0, 0.25, 0.58]); 64];
//! let mut outputs = [PolyFrame::empty(); 64];
//! engine.process_block(&inputs, &[], &mut outputs);
//! assert_eq!(outputs[63].channels, 3);
//! ```

use crate::config::{Config, QuantKey, QuantizerPos, VoiceConfig};
use crate::io::{LedBank, PolyFrame};
use crate::params::Params;
use crate::polyphony::{PolyTransition, PolyWidths};
use crate::quantizer::{QuantConfig, QuantLatch};
use crate::random::{randomize, RandScheduler, RandTiming};
use crate::rng::Rng;
use crate::shaping::{apply_range, clip, snap_to, RangeMode, MAX_V};
use crate::slew::{GlideShapes, SlewLimiter};
use crate::state::State;
use crate::strum::{StrumSettings, StrumType, StrumVoice};
use crate::tuning::Tuning;
use crate::MAX_VOICES;
use tracing::{debug, info};

/// Sample rate used when an invalid one is supplied
pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

/// Per-voice runtime state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Voice {
    slew: SlewLimiter,
    latch: QuantLatch,
    strum: StrumVoice,
    /// Last output before the fade ramp
    last_out: f64,
}

impl Voice {
    fn reset(&mut self, value: f64) {
        self.slew.reset_to(value);
        self.latch.invalidate();
        self.strum.reseed(value);
        self.last_out = value;
    }
}

/// Knob-derived values of one voice; rebuilt per block and after a randomization
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct VoicePlan {
    /// Voice + global offset, snapped
    offset: f64,
    slew_sec: f64,
}

fn voice_plans(config: &Config, params: &Params, tuning: &Tuning) -> [VoicePlan; MAX_VOICES] {
    let global = params.global_offset_volts();
    let slew_add = params.global_slew_add_seconds();
    std::array::from_fn(|i| {
        let mut offset = params.offset[i] + global;
        if let Some(quantum) = config.voice_snap(i).quantum(tuning) {
            offset = snap_to(offset, quantum);
        }
        VoicePlan {
            offset,
            slew_sec: params.voice_slew_seconds(i) + slew_add,
        }
    })
}

/// Settings shared by every voice for one block
#[derive(Debug, Clone, Copy)]
struct BlockCtx {
    quant: QuantConfig,
    shapes: GlideShapes,
    gain: Option<f64>,
    range_mode: RangeMode,
    clip_index: usize,
    soft: bool,
    range_offset: f64,
    period_oct: f64,
    pos: QuantizerPos,
    pitch_safe: bool,
    strum: StrumSettings,
    count: usize,
    dt: f64,
}

impl BlockCtx {
    fn new(config: &Config, params: &Params, count: usize, dt: f64) -> Self {
        let quant = config.quant_config();
        Self {
            period_oct: quant.scale.tuning.period_oct,
            quant,
            shapes: GlideShapes::new(params.rise_shape, params.fall_shape),
            gain: params.attenuverter_gain(),
            range_mode: config.range_mode,
            clip_index: config.clip_index,
            soft: config.soft_clip_out,
            range_offset: params.range_offset_volts(),
            pos: config.quantizer_pos,
            pitch_safe: config.pitch_safe_glide,
            strum: config.strum,
            count,
            dt,
        }
    }
}

/// One sample of one voice. `t` is the offset into the block in seconds.
#[allow(clippy::too_many_arguments)]
fn run_voice(
    voice: &mut Voice,
    rng: &mut Rng,
    vcfg: &VoiceConfig,
    plan: &VoicePlan,
    ctx: &BlockCtx,
    input: f64,
    index: usize,
    t: f64,
    reinit: bool,
) -> f64 {
    let mut x = input;
    if let Some(gain) = ctx.gain {
        x *= gain;
    }
    x += plan.offset;
    x = x * vcfg.pre_scale + vcfg.pre_offset;
    x = apply_range(x, ctx.range_mode, ctx.clip_index, ctx.soft);
    let vpre = x + ctx.range_offset + vcfg.oct_shift as f64 * ctx.period_oct;

    if reinit {
        voice.latch.invalidate();
    }

    let target = match ctx.pos {
        QuantizerPos::Pre if vcfg.qz_enabled => {
            let vq = voice.latch.quantize(vpre, &ctx.quant);
            ctx.quant.blend(vpre, vq)
        }
        _ => vpre,
    };

    if reinit {
        voice.slew.reset_to(target);
        voice.strum.reseed(target);
    }

    voice
        .strum
        .observe(target, t, &ctx.strum, index, ctx.count, rng);
    let strumming = ctx.strum.enabled && voice.strum.is_active(t);
    let hold = strumming && ctx.strum.kind == StrumType::StartDelay;
    let stretch = if strumming && ctx.strum.kind == StrumType::TimeStretch {
        voice.strum.delay()
    } else {
        0.0
    };

    let ys = if vcfg.slew_enabled {
        voice
            .slew
            .set_target(target, plan.slew_sec + stretch, ctx.pitch_safe);
        if hold {
            voice.slew.value()
        } else {
            voice.slew.tick(ctx.dt, &ctx.shapes)
        }
    } else {
        if !hold {
            voice.slew.reset_to(target);
        }
        voice.slew.value()
    };

    let y = match ctx.pos {
        QuantizerPos::Post if vcfg.qz_enabled => {
            // A held voice keeps its latch tracking the live target
            let seen = if hold { target } else { ys };
            let vq = voice.latch.quantize(seen, &ctx.quant);
            ctx.quant.blend(seen, vq)
        }
        _ => ys,
    };

    let y = if hold {
        voice.last_out
    } else {
        clip(y, MAX_V, ctx.soft)
    };
    voice.last_out = y;
    y
}

#[inline]
fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// The 16-voice pitch/CV processor
#[derive(Debug)]
pub struct Engine {
    sample_rate: f64,
    config: Config,
    params: Params,
    voices: [Voice; MAX_VOICES],
    poly: PolyTransition,
    rand: RandScheduler,
    rng: Rng,
    leds: LedBank,
    quant_key: Option<QuantKey>,
    /// Latest per-voice outputs after the fade ramp
    outputs: [f64; MAX_VOICES],
    rand_fires: u64,
}

impl Engine {
    /// Create an engine seeded from entropy (or a fixed seed without `std`)
    pub fn new(sample_rate: f64) -> Self {
        Self::with_rng(sample_rate, Rng::default())
    }

    /// Create an engine whose random draws are reproducible
    pub fn with_seed(sample_rate: f64, seed: u64) -> Self {
        Self::with_rng(sample_rate, Rng::from_seed(seed))
    }

    fn with_rng(sample_rate: f64, rng: Rng) -> Self {
        let mut engine = Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            config: Config::default(),
            params: Params::default(),
            voices: [Voice::default(); MAX_VOICES],
            poly: PolyTransition::new(),
            rand: RandScheduler::new(),
            rng,
            leds: LedBank::new(),
            quant_key: None,
            outputs: [0.0; MAX_VOICES],
            rand_fires: 0,
        };
        engine.set_sample_rate(sample_rate);
        engine
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Change the sample rate; invalid rates are ignored
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        if sample_rate.is_finite() && sample_rate > 0.0 {
            if sample_rate != self.sample_rate {
                debug!(sample_rate, "sample rate changed");
            }
            self.sample_rate = sample_rate;
        }
    }

    /// Menu configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable menu configuration; changes apply on the next block
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Knob surface
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    /// Per-voice LED levels from the last block
    pub fn leds(&self) -> &LedBank {
        &self.leds
    }

    /// Polyphony transition state
    pub fn poly(&self) -> &PolyTransition {
        &self.poly
    }

    pub fn rand_scheduler(&self) -> &RandScheduler {
        &self.rand
    }

    /// Randomizations fired since creation
    pub fn rand_fire_count(&self) -> u64 {
        self.rand_fires
    }

    /// Last output of voice `i` before the fade ramp
    pub fn voice_output(&self, i: usize) -> f64 {
        self.voices.get(i).map_or(0.0, |v| v.last_out)
    }

    /// Step currently latched by voice `i`'s quantizer
    pub fn latched_step(&self, i: usize) -> Option<i64> {
        self.voices.get(i).and_then(|v| v.latch.latched_step())
    }

    /// Press or release the Randomize button
    pub fn set_randomize_button(&mut self, pressed: bool) {
        self.params.randomize = pressed;
    }

    /// Fire one randomization on the next processed sample
    pub fn randomize_now(&mut self) {
        self.rand.request();
    }

    /// Schmitt thresholds of the RND_TRIG input in volts
    pub fn set_trigger_thresholds(&mut self, low: f64, high: f64) {
        self.rand.set_trigger_thresholds(low, high);
    }

    /// Re-seed every voice from 0 V and clear timers, latches and strum history
    pub fn reset(&mut self) {
        for voice in &mut self.voices {
            voice.reset(0.0);
        }
        self.rand.reset();
        self.poly.reset();
        self.leds.reset();
        self.outputs = [0.0; MAX_VOICES];
        debug!("engine reset");
    }

    /// Snapshot of config and params for persistence
    pub fn save_state(&self) -> State {
        let state = State::capture(&self.config, &self.params);
        info!("state saved");
        state
    }

    /// Apply a persisted state; missing keys keep their defaults
    pub fn load_state(&mut self, state: &State) {
        let (config, params) = state.restore();
        self.config = config;
        self.params = params;
        self.quant_key = None;
        info!("state loaded");
    }

    fn check_quant_key(&mut self) {
        let key = self.config.quant_key();
        if self.quant_key != Some(key) {
            if self.quant_key.is_some() {
                debug!("tuning or scale changed, clearing quantizer latches");
            }
            for voice in &mut self.voices {
                voice.latch.invalidate();
            }
            self.quant_key = Some(key);
        }
    }

    fn desired_widths(&self, input: &PolyFrame) -> PolyWidths {
        let process = if self.config.forced_channels > 0 {
            self.config.forced_channels.min(MAX_VOICES)
        } else {
            input.channels.min(MAX_VOICES)
        };
        if self.config.sum_to_mono {
            PolyWidths::summed(process)
        } else {
            PolyWidths::new(process, process)
        }
    }

    /// Process one block. `rnd_trig` carries the RND_TRIG voltage per sample
    /// and may be empty when unpatched. Frames beyond the shorter of `inputs`
    /// and `outputs` are not touched.
    pub fn process_block(&mut self, inputs: &[PolyFrame], rnd_trig: &[f64], outputs: &mut [PolyFrame]) {
        let frames = inputs.len().min(outputs.len());
        if frames == 0 {
            return;
        }
        let dt = 1.0 / self.sample_rate;
        let block_dt = frames as f64 * dt;

        self.check_quant_key();

        let desired = self.desired_widths(&inputs[0]);
        let span = self
            .poly
            .advance(desired, self.config.poly_fade_sec, block_dt);
        let widths = self.poly.widths();
        let mut reinit = self.poly.take_reinit();

        let mut ctx = BlockCtx::new(&self.config, &self.params, widths.process, dt);
        let tuning = ctx.quant.scale.tuning;

        let Self {
            config,
            params,
            voices,
            rand,
            rng,
            leds,
            outputs: voice_out,
            rand_fires,
            ..
        } = self;

        let mut plans = voice_plans(config, params, &tuning);
        let sync = config.rand.sync;

        for (k, (input, frame)) in inputs.iter().zip(outputs.iter_mut()).take(frames).enumerate() {
            let timing = RandTiming {
                auto: config.rand.auto,
                sync,
                raw_time: params.rand_time(sync),
            };
            let trig = rnd_trig.get(k).copied();
            if rand.tick(dt, trig, params.randomize, &timing) {
                let depth = config.rand_depth(params.rand_amount);
                randomize(params, &config.rand.scope, depth, rng);
                *rand_fires += 1;
                plans = voice_plans(config, params, &tuning);
                ctx.shapes = GlideShapes::new(params.rise_shape, params.fall_shape);
            }

            let t = k as f64 * dt;
            let gain = span.at(k, frames);
            let mut sum = 0.0;
            for i in 0..widths.process {
                let y = run_voice(
                    &mut voices[i],
                    rng,
                    &config.voices[i],
                    &plans[i],
                    &ctx,
                    finite_or_zero(input.voice(i)),
                    i,
                    t,
                    reinit,
                );
                sum += y;
                voice_out[i] = y * gain;
            }
            for v in voice_out.iter_mut().skip(widths.process) {
                *v = 0.0;
            }
            reinit = false;

            *frame = PolyFrame::empty();
            frame.channels = widths.output;
            if widths.summing {
                if widths.output > 0 {
                    let mono = if config.avg_when_summing && widths.process > 0 {
                        sum / widths.process as f64
                    } else {
                        sum
                    };
                    frame.voltages[0] = clip(mono, MAX_V, config.soft_clip_out) * gain;
                }
            } else {
                let n = widths.output.min(MAX_VOICES);
                frame.voltages[..n].copy_from_slice(&voice_out[..n]);
            }
        }

        for voice in voices.iter_mut().take(widths.process) {
            voice.strum.tick(block_dt);
        }
        leds.update(voice_out, widths.process, block_dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapMode;
    use crate::params::BankMode;
    use crate::polyphony::PolyPhase;
    use crate::quantizer::RoundMode;
    use crate::random::SyncRatio;
    use crate::shaping::seconds_to_slew_knob;
    use crate::strum::StrumMode;
    use crate::tuning::TuningMode;
    use approx::assert_abs_diff_eq;

    const SR: f64 = 48_000.0;
    const BLOCK: usize = 64;

    fn engine() -> Engine {
        let mut engine = Engine::with_seed(SR, 1);
        engine.config_mut().poly_fade_sec = 0.0;
        engine
    }

    /// Run `samples` samples of a constant input; returns every output frame
    fn run(engine: &mut Engine, input: PolyFrame, samples: usize) -> Vec<PolyFrame> {
        let mut all = Vec::with_capacity(samples);
        let mut left = samples;
        while left > 0 {
            let n = left.min(BLOCK);
            let inputs = vec![input; n];
            let mut outputs = vec![PolyFrame::empty(); n];
            engine.process_block(&inputs, &[], &mut outputs);
            all.extend_from_slice(&outputs);
            left -= n;
        }
        all
    }

    fn disable_slew_and_quant(engine: &mut Engine) {
        for v in engine.config_mut().voices.iter_mut() {
            v.slew_enabled = false;
            v.qz_enabled = false;
        }
    }

    #[test]
    fn test_nearest_snap_tracks_lattice_ramp() {
        let mut engine = engine();
        engine.config_mut().round_mode = RoundMode::Nearest;
        engine.config_mut().voices[0].slew_enabled = false;

        for step in 0..=12 {
            let v = step as f64 / 12.0;
            let out = run(&mut engine, PolyFrame::mono(v), BLOCK);
            for frame in &out {
                assert_eq!(frame.channels, 1);
                assert_abs_diff_eq!(frame.voltages[0], v, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_directional_hysteresis_holds_at_boundary() {
        let mut engine = engine();
        engine.config_mut().stickiness_cents = 10.0;
        engine.config_mut().voices[0].slew_enabled = false;

        let inputs = [
            PolyFrame::mono(-0.02),
            PolyFrame::mono(0.02),
            PolyFrame::mono(-0.02),
        ];
        let mut outputs = [PolyFrame::empty(); 3];
        engine.process_block(&inputs, &[], &mut outputs);
        for frame in &outputs {
            assert_eq!(frame.voltages[0], 0.0);
        }
    }

    #[test]
    fn test_linear_slew_half_way() {
        let mut engine = engine();
        engine.config_mut().voices[0].qz_enabled = false;
        engine.params_mut().slew[0] = seconds_to_slew_knob(1.0);

        run(&mut engine, PolyFrame::mono(0.0), BLOCK);
        let out = run(&mut engine, PolyFrame::mono(1.0), 24_000);
        let half = out[out.len() - 1].voltages[0];
        assert_abs_diff_eq!(half, 0.5, epsilon = 0.005);

        let out = run(&mut engine, PolyFrame::mono(1.0), 24_064);
        assert_abs_diff_eq!(out[out.len() - 1].voltages[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pre_mode_snaps_then_glides() {
        let mut engine = engine();
        engine.config_mut().quantizer_pos = QuantizerPos::Pre;
        engine.params_mut().slew[0] = seconds_to_slew_knob(0.5);

        run(&mut engine, PolyFrame::mono(0.0), BLOCK);
        let out = run(&mut engine, PolyFrame::mono(0.33), 24_000);

        assert_eq!(engine.latched_step(0), Some(4));
        let mid = out[9_000].voltages[0];
        assert_abs_diff_eq!(mid, 4.0 / 12.0 * 9_001.0 / 24_000.0, epsilon = 1e-4);
        // Mid-glide the output is between lattice steps
        assert!(((mid * 12.0) - (mid * 12.0).round()).abs() > 0.1);

        let settled = run(&mut engine, PolyFrame::mono(0.33), 512);
        assert_abs_diff_eq!(settled[511].voltages[0], 4.0 / 12.0, epsilon = 1e-9);
    }

    #[test]
    fn test_post_mode_emits_staircase() {
        let mut engine = engine();
        engine.config_mut().quantizer_pos = QuantizerPos::Post;
        engine.params_mut().slew[0] = seconds_to_slew_knob(0.5);

        run(&mut engine, PolyFrame::mono(0.0), BLOCK);
        let out = run(&mut engine, PolyFrame::mono(0.33), 24_512);

        let mut levels: Vec<i64> = Vec::new();
        for frame in &out {
            let steps = frame.voltages[0] * 12.0;
            assert_abs_diff_eq!(steps, steps.round(), epsilon = 1e-9);
            let step = steps.round() as i64;
            if levels.last() != Some(&step) {
                levels.push(step);
            }
        }
        assert_eq!(levels, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_strum_start_delay_staggers_voices() {
        let mut engine = engine();
        {
            let cfg = engine.config_mut();
            cfg.strum = StrumSettings {
                enabled: true,
                mode: StrumMode::Up,
                kind: StrumType::StartDelay,
                spread_ms: 100.0,
            };
            for v in cfg.voices.iter_mut() {
                v.qz_enabled = false;
            }
        }
        for i in 0..3 {
            engine.params_mut().slew[i] = seconds_to_slew_knob(1.0);
        }

        run(&mut engine, PolyFrame::splat(0.0, 3), BLOCK);
        let out = run(&mut engine, PolyFrame::splat(1.0, 3), 14_400);

        let first_move = |voice: usize| {
            out.iter()
                .position(|f| f.voltages[voice] != 0.0)
                .unwrap()
        };
        assert_eq!(first_move(0), 0);
        assert!((4_799..=4_801).contains(&first_move(1)), "{}", first_move(1));
        assert!((9_599..=9_601).contains(&first_move(2)), "{}", first_move(2));
        // Holds are exact
        assert!(out[..4_799].iter().all(|f| f.voltages[1] == 0.0));
    }

    #[test]
    fn test_strum_time_stretch_lengthens_glide() {
        let mut engine = engine();
        {
            let cfg = engine.config_mut();
            cfg.strum = StrumSettings {
                enabled: true,
                mode: StrumMode::Up,
                kind: StrumType::TimeStretch,
                spread_ms: 500.0,
            };
            for v in cfg.voices.iter_mut() {
                v.qz_enabled = false;
            }
        }
        engine.params_mut().slew[0] = seconds_to_slew_knob(0.5);
        engine.params_mut().slew[1] = seconds_to_slew_knob(0.5);

        run(&mut engine, PolyFrame::splat(0.0, 2), BLOCK);
        let out = run(&mut engine, PolyFrame::splat(1.0, 2), 24_000);
        let last = out[23_999];
        // Voice 0 glides in 0.5 s, voice 1 in 1.0 s; both start immediately
        assert_abs_diff_eq!(last.voltages[0], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(last.voltages[1], 0.5, epsilon = 0.005);
    }

    #[test]
    fn test_clock_sync_times_four() {
        let mut engine = engine();
        engine.config_mut().rand.auto = true;
        engine.config_mut().rand.sync = true;
        engine.params_mut().rand_time_sync = SyncRatio::knob_for_index(66);

        let block = 16;
        let period = 24_000;
        let inputs = vec![PolyFrame::mono(0.0); block];
        let mut outputs = vec![PolyFrame::empty(); block];
        let mut fires = Vec::new();
        let mut count = 0;
        for b in 0..(period * 3 / block) {
            let trig: Vec<f64> = (0..block)
                .map(|k| {
                    let n = b * block + k;
                    if n % period < 480 {
                        5.0
                    } else {
                        0.0
                    }
                })
                .collect();
            engine.process_block(&inputs, &trig, &mut outputs);
            if engine.rand_fire_count() != count {
                count = engine.rand_fire_count();
                fires.push((b * block) as f64 / SR);
            }
        }
        assert!(engine.rand_scheduler().clock_ready());

        let expected = [0.0, 0.5, 0.625, 0.75, 0.875, 1.0, 1.125, 1.25, 1.375];
        assert_eq!(fires.len(), expected.len(), "{:?}", fires);
        for (got, want) in fires.iter().zip(expected) {
            assert_abs_diff_eq!(*got, want, epsilon = 0.001);
        }
    }

    #[test]
    fn test_unpatched_auto_width_outputs_nothing() {
        let mut engine = engine();
        let out = run(&mut engine, PolyFrame::empty(), BLOCK);
        assert_eq!(out[0].channels, 0);

        engine.config_mut().forced_channels = 4;
        let out = run(&mut engine, PolyFrame::empty(), BLOCK);
        assert_eq!(out[0].channels, 4);
    }

    #[test]
    fn test_mono_input_broadcasts_to_forced_width() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        engine.config_mut().forced_channels = 3;
        let out = run(&mut engine, PolyFrame::mono(2.0), BLOCK);
        assert_eq!(out[0].as_slice(), &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_sum_to_mono() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        engine.config_mut().sum_to_mono = true;
        let input = PolyFrame::from_slice(&[0.5, 1.0, 1.5, 2.0]);

        let out = run(&mut engine, input, BLOCK);
        assert_eq!(out[0].channels, 1);
        assert_abs_diff_eq!(out[0].voltages[0], 5.0, epsilon = 1e-12);

        engine.config_mut().avg_when_summing = true;
        let out = run(&mut engine, input, BLOCK);
        assert_abs_diff_eq!(out[0].voltages[0], 1.25, epsilon = 1e-12);
    }

    #[test]
    fn test_offset_snap_semitones() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        engine.config_mut().snap_mode = SnapMode::Semitone;
        engine.params_mut().offset[0] = 0.13;
        engine.params_mut().global_offset.a = 0.01;

        let out = run(&mut engine, PolyFrame::mono(0.0), BLOCK);
        assert_abs_diff_eq!(out[0].voltages[0], 2.0 / 12.0, epsilon = 1e-12);

        engine.config_mut().voices[0].snap = Some(SnapMode::Cent);
        let out = run(&mut engine, PolyFrame::mono(0.0), BLOCK);
        let cents = out[0].voltages[0] * 1200.0;
        assert_abs_diff_eq!(cents, cents.round(), epsilon = 1e-9);
        assert_abs_diff_eq!(cents, 168.0, epsilon = 1e-9);
    }

    #[test]
    fn test_range_offset_is_not_snapped() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        engine.config_mut().snap_mode = SnapMode::Semitone;
        engine.params_mut().global_offset.mode = BankMode::B;
        engine.params_mut().global_offset.b = 0.13;
        let out = run(&mut engine, PolyFrame::mono(0.0), BLOCK);
        assert_abs_diff_eq!(out[0].voltages[0], 0.13, epsilon = 1e-12);
    }

    #[test]
    fn test_attenuverter_and_range() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        engine.params_mut().global_slew.mode = BankMode::B;
        engine.params_mut().global_slew.b = 0.0;
        let out = run(&mut engine, PolyFrame::mono(0.5), BLOCK);
        assert_abs_diff_eq!(out[0].voltages[0], -5.0, epsilon = 1e-12);

        engine.params_mut().global_slew.mode = BankMode::A;
        engine.config_mut().range_mode = RangeMode::Scale;
        engine.config_mut().clip_index = 2;
        let out = run(&mut engine, PolyFrame::mono(8.0), BLOCK);
        assert_abs_diff_eq!(out[0].voltages[0], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_octave_shift_and_pre_transform() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        engine.config_mut().voices[0].oct_shift = -2;
        engine.config_mut().voices[0].pre_scale = 2.0;
        engine.config_mut().voices[0].pre_offset = 0.5;
        let out = run(&mut engine, PolyFrame::mono(1.0), BLOCK);
        assert_abs_diff_eq!(out[0].voltages[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_final_clip() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        engine.config_mut().soft_clip_out = false;
        engine.params_mut().offset[0] = 10.0;
        let out = run(&mut engine, PolyFrame::mono(5.0), BLOCK);
        assert_eq!(out[0].voltages[0], 10.0);
    }

    #[test]
    fn test_poly_fade_bounds_output() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        engine.config_mut().poly_fade_sec = 0.01;

        run(&mut engine, PolyFrame::splat(1.0, 2), BLOCK);
        let out = run(&mut engine, PolyFrame::splat(1.0, 4), 4_800);

        let mut saw_silence = false;
        for frame in &out {
            for &v in frame.as_slice() {
                assert!((0.0..=1.0).contains(&v));
            }
            saw_silence |= frame.voltages[0] == 0.0;
        }
        assert!(saw_silence);
        let last = out[out.len() - 1];
        assert_eq!(last.as_slice(), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sum_to_mono_toggle_fades() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        let fade = 0.01;
        engine.config_mut().poly_fade_sec = fade;

        let input = PolyFrame::splat(1.0, 4);
        let mut out = run(&mut engine, input, BLOCK);
        engine.config_mut().sum_to_mono = true;
        out.extend(run(&mut engine, input, 4_800));

        // Loudest signal is the 4 V sum; no channel may move faster than the ramp
        let max_step = 4.0 / SR / fade + 1e-9;
        for pair in out.windows(2) {
            for c in 0..MAX_VOICES {
                let jump = (pair[1].voltages[c] - pair[0].voltages[c]).abs();
                assert!(jump <= max_step, "channel {} jumped {}", c, jump);
            }
            if pair[1].channels != pair[0].channels {
                assert!(pair[0].voltages.iter().all(|&v| v == 0.0));
            }
        }
        let last = out[out.len() - 1];
        assert_eq!(last.channels, 1);
        assert_abs_diff_eq!(last.voltages[0], 4.0, epsilon = 1e-12);
        assert!(engine.poly().widths().summing);
    }

    #[test]
    fn test_reset_switches_width_without_fade() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        engine.config_mut().poly_fade_sec = 0.01;
        run(&mut engine, PolyFrame::splat(1.0, 4), BLOCK);

        engine.reset();
        let out = run(&mut engine, PolyFrame::splat(1.0, 2), BLOCK);
        assert_eq!(engine.poly().phase(), PolyPhase::Stable);
        assert_eq!(out[0].channels, 2);
        assert_eq!(out[0].as_slice(), &[1.0, 1.0]);
    }

    #[test]
    fn test_held_voice_quantizer_tracks_live_target() {
        let mut engine = engine();
        {
            let cfg = engine.config_mut();
            cfg.quantizer_pos = QuantizerPos::Post;
            cfg.round_mode = RoundMode::Nearest;
            cfg.strum = StrumSettings {
                enabled: true,
                mode: StrumMode::Up,
                kind: StrumType::StartDelay,
                spread_ms: 100.0,
            };
        }
        for i in 0..3 {
            engine.params_mut().slew[i] = seconds_to_slew_knob(0.5);
        }

        run(&mut engine, PolyFrame::splat(0.0, 3), BLOCK);
        // 50 ms in: voice 2 is still inside its 200 ms delay
        run(&mut engine, PolyFrame::splat(0.5, 3), 2_400);
        assert_eq!(engine.voice_output(2), 0.0);
        assert_eq!(engine.latched_step(2), Some(6));
    }

    #[test]
    fn test_tuning_change_invalidates_latches() {
        let mut engine = engine();
        engine.config_mut().voices[0].slew_enabled = false;
        run(&mut engine, PolyFrame::mono(0.3), BLOCK);
        assert_eq!(engine.latched_step(0), Some(4));

        engine.config_mut().edo_steps = 24;
        run(&mut engine, PolyFrame::mono(0.3), 1);
        // 0.3 V in 24-EDO is 7.2 steps
        assert_eq!(engine.latched_step(0), Some(7));
    }

    #[test]
    fn test_every_scale_field_reseeds_latches() {
        let edits: [fn(&mut Config); 5] = [
            |c: &mut Config| c.root = 5,
            |c: &mut Config| c.tet_period_oct = 1.0001,
            |c: &mut Config| c.tuning_mode = TuningMode::Edo,
            |c: &mut Config| c.use_custom_scale = true,
            |c: &mut Config| c.scale_index = 2,
        ];
        for (n, edit) in edits.iter().enumerate() {
            let mut engine = engine();
            {
                // 12 steps over one octave, so the lattice matches 12-EDO
                let cfg = engine.config_mut();
                cfg.tuning_mode = TuningMode::Tet;
                cfg.tet_steps = 12;
                cfg.tet_period_oct = 1.0;
                cfg.round_mode = RoundMode::Nearest;
                cfg.stickiness_cents = 20.0;
                cfg.voices[0].slew_enabled = false;
            }
            run(&mut engine, PolyFrame::mono(2.0 / 12.0), BLOCK);
            // 2.55 steps stays inside the 0.2-step stickiness window
            run(&mut engine, PolyFrame::mono(2.55 / 12.0), BLOCK);
            assert_eq!(engine.latched_step(0), Some(2), "edit {}", n);

            edit(engine.config_mut());
            run(&mut engine, PolyFrame::mono(2.55 / 12.0), 1);
            assert_eq!(engine.latched_step(0), Some(3), "edit {}", n);
        }
    }

    #[test]
    fn test_manual_randomize_changes_only_scope() {
        let mut engine = engine();
        engine.config_mut().rand.scope.offset = false;
        engine.params_mut().rand_amount = 1.0;

        engine.randomize_now();
        run(&mut engine, PolyFrame::mono(0.0), BLOCK);
        assert_eq!(engine.rand_fire_count(), 1);
        assert!(engine.params().slew.iter().any(|&s| s > 0.0));
        assert!(engine.params().offset.iter().all(|&o| o == 0.0));

        engine.set_randomize_button(true);
        run(&mut engine, PolyFrame::mono(0.0), BLOCK);
        engine.set_randomize_button(false);
        run(&mut engine, PolyFrame::mono(0.0), BLOCK);
        assert_eq!(engine.rand_fire_count(), 2);
    }

    #[test]
    fn test_trigger_thresholds_are_adjustable() {
        let mut engine = engine();
        let inputs = [PolyFrame::mono(0.0); BLOCK];
        let mut outputs = [PolyFrame::empty(); BLOCK];
        let high = [0.8; BLOCK];
        let low = [0.0; BLOCK];

        // 0.8 V never reaches the default 2.5 V threshold
        engine.process_block(&inputs, &high, &mut outputs);
        assert_eq!(engine.rand_fire_count(), 0);

        engine.set_trigger_thresholds(0.2, 0.5);
        engine.process_block(&inputs, &low, &mut outputs);
        engine.process_block(&inputs, &high, &mut outputs);
        assert_eq!(engine.rand_fire_count(), 1);
    }

    #[test]
    fn test_seeded_engines_match() {
        let mut a = engine();
        let mut b = engine();
        for e in [&mut a, &mut b] {
            e.config_mut().rand.auto = true;
            e.params_mut().rand_time_free = 0.2;
        }
        run(&mut a, PolyFrame::mono(0.5), 4_800);
        run(&mut b, PolyFrame::mono(0.5), 4_800);
        assert!(a.rand_fire_count() > 0);
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn test_reset_and_leds() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        run(&mut engine, PolyFrame::from_slice(&[5.0, -5.0]), 48_000);
        let (g, r) = engine.leds().brightness(0);
        assert_abs_diff_eq!(g, 0.5, epsilon = 1e-6);
        assert_eq!(r, 0.0);
        let (_, r1) = engine.leds().brightness(1);
        assert_abs_diff_eq!(r1, 0.5, epsilon = 1e-6);

        engine.reset();
        assert_eq!(engine.voice_output(0), 0.0);
        assert_eq!(engine.latched_step(0), None);
        assert_eq!(engine.leds().brightness(0), (0.0, 0.0));
    }

    #[test]
    fn test_non_finite_input_reads_as_zero() {
        let mut engine = engine();
        disable_slew_and_quant(&mut engine);
        let out = run(&mut engine, PolyFrame::mono(f64::NAN), BLOCK);
        assert_eq!(out[0].voltages[0], 0.0);
    }

    #[test]
    fn test_invalid_sample_rate_ignored() {
        let mut engine = Engine::with_seed(0.0, 3);
        assert_eq!(engine.sample_rate(), DEFAULT_SAMPLE_RATE);
        engine.set_sample_rate(96_000.0);
        engine.set_sample_rate(f64::NAN);
        assert_eq!(engine.sample_rate(), 96_000.0);
    }
}
