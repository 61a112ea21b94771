//! Randomization Engine
//!
//! Decides when to randomize (manual button, trigger input, free-running
//! timer or a clock-synced ratio) and which knobs a randomization touches.
//!
//! # Sync ratios
//!
//! The time knob picks one of 127 ratios against the measured clock period:
//! `÷64 … ÷2`, `1×`, `×2 … ×64`. Divisions fire on every D-th clock edge,
//! multiplications fire on the edge and then at `M − 1` evenly spaced
//! subdivisions of the smoothed period.

use crate::params::Params;
use crate::rng::Rng;
use crate::shaping::{log_map, MAX_V};
use crate::trigger::{EdgeDetector, SchmittTrigger};
use crate::MAX_VOICES;
use serde::{Deserialize, Serialize};

/// Shortest free-running interval in seconds
pub const RAND_MIN_SEC: f64 = 0.001;

/// Longest free-running interval in seconds
pub const RAND_MAX_SEC: f64 = 10_000.0;

/// Smoothing factor for the measured clock period
pub const CLOCK_EMA_ALPHA: f64 = 0.25;

/// Clock intervals shorter than this are not measured
pub const MIN_CLOCK_PERIOD: f64 = 1e-4;

/// Number of selectable sync ratios
pub const RATIO_COUNT: usize = 127;

const UNITY_INDEX: usize = 63;

const SLEW_SPAN: f64 = 1.0;
const OFFSET_SPAN: f64 = 2.0 * MAX_V;
const SHAPE_SPAN: f64 = 2.0;

/// Which knobs take part in a randomization.
///
/// A scope flag selects a whole class. Per-control `lock` flags exclude a
/// knob while its class is selected; `allow` flags include a knob while its
/// class is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandScope {
    pub slew: bool,
    pub offset: bool,
    pub shapes: bool,
    pub lock_slew: [bool; MAX_VOICES],
    pub lock_offset: [bool; MAX_VOICES],
    pub lock_rise: bool,
    pub lock_fall: bool,
    pub allow_slew: [bool; MAX_VOICES],
    pub allow_offset: [bool; MAX_VOICES],
    pub allow_rise: bool,
    pub allow_fall: bool,
}

impl Default for RandScope {
    fn default() -> Self {
        Self {
            slew: true,
            offset: true,
            shapes: false,
            lock_slew: [false; MAX_VOICES],
            lock_offset: [false; MAX_VOICES],
            lock_rise: false,
            lock_fall: false,
            allow_slew: [false; MAX_VOICES],
            allow_offset: [false; MAX_VOICES],
            allow_rise: false,
            allow_fall: false,
        }
    }
}

#[inline]
fn included(scope_on: bool, lock: bool, allow: bool) -> bool {
    if scope_on {
        !lock
    } else {
        allow
    }
}

impl RandScope {
    /// Whether voice `voice` takes slew randomization
    pub fn slew_included(&self, voice: usize) -> bool {
        voice < MAX_VOICES && included(self.slew, self.lock_slew[voice], self.allow_slew[voice])
    }

    pub fn offset_included(&self, voice: usize) -> bool {
        voice < MAX_VOICES
            && included(self.offset, self.lock_offset[voice], self.allow_offset[voice])
    }

    /// Rise shape is in scope
    pub fn rise_included(&self) -> bool {
        included(self.shapes, self.lock_rise, self.allow_rise)
    }

    /// Fall shape is in scope
    pub fn fall_included(&self) -> bool {
        included(self.shapes, self.lock_fall, self.allow_fall)
    }
}

/// Nudge every selected knob by `U[-1, 1) · amount · span`, clamped to range.
///
/// Random draws are only taken for selected knobs.
pub fn randomize(params: &mut Params, scope: &RandScope, amount: f64, rng: &mut Rng) {
    let amount = amount.clamp(0.0, 1.0);
    let mut nudge =
        |value: f64, span: f64, min: f64, max: f64| rng.jitter(value, amount * span, min, max);

    for i in 0..MAX_VOICES {
        if scope.slew_included(i) {
            params.slew[i] = nudge(params.slew[i], SLEW_SPAN, 0.0, 1.0);
        }
        if scope.offset_included(i) {
            params.offset[i] = nudge(params.offset[i], OFFSET_SPAN, -MAX_V, MAX_V);
        }
    }
    if scope.rise_included() {
        params.rise_shape = nudge(params.rise_shape, SHAPE_SPAN, -1.0, 1.0);
    }
    if scope.fall_included() {
        params.fall_shape = nudge(params.fall_shape, SHAPE_SPAN, -1.0, 1.0);
    }
}

/// Clock ratio selected by the sync time knob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRatio {
    Divide(u32),
    Unity,
    Multiply(u32),
}

impl SyncRatio {
    /// Ratio for index `0..127`; out-of-range indices clamp
    pub fn from_index(index: usize) -> Self {
        let index = index.min(RATIO_COUNT - 1);
        match index {
            i if i < UNITY_INDEX => SyncRatio::Divide((64 - i) as u32),
            UNITY_INDEX => SyncRatio::Unity,
            i => SyncRatio::Multiply((i - 62) as u32),
        }
    }

    /// Index selected by a raw knob in [0, 1]
    pub fn index_for_knob(raw: f64) -> usize {
        let raw = if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.5
        };
        (raw * (RATIO_COUNT - 1) as f64).round() as usize
    }

    /// Knob position that selects `index`
    pub fn knob_for_index(index: usize) -> f64 {
        index.min(RATIO_COUNT - 1) as f64 / (RATIO_COUNT - 1) as f64
    }

    /// Menu label, e.g. `x2` or `/4`
    pub fn label(&self) -> String {
        match self {
            SyncRatio::Divide(d) => format!("÷{}", d),
            SyncRatio::Unity => "1×".to_string(),
            SyncRatio::Multiply(m) => format!("×{}", m),
        }
    }
}

/// Randomization timing settings read each block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandTiming {
    /// Timer or clock firing enabled
    pub auto: bool,
    /// Follow the clock input instead of the free timer
    pub sync: bool,
    /// Time knob for the current mode, raw [0, 1]
    pub raw_time: f64,
}

/// Free-running interval for a raw time knob
#[inline]
pub fn free_interval(raw: f64) -> f64 {
    log_map(raw, RAND_MIN_SEC, RAND_MAX_SEC).max(RAND_MIN_SEC)
}

/// Decides, sample by sample, when a randomization fires
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandScheduler {
    abs_time: f64,
    timer: f64,
    clock: SchmittTrigger,
    button: EdgeDetector,
    pending: bool,
    edges_seen: u32,
    clock_last_edge: f64,
    clock_period: f64,
    clock_ready: bool,
    div_counter: u32,
    mul_index: u32,
    mul_base: f64,
    mul_next: f64,
    last_ratio_index: Option<usize>,
}

impl RandScheduler {
    pub fn new() -> Self {
        Self {
            abs_time: 0.0,
            timer: 0.0,
            clock: SchmittTrigger::default(),
            button: EdgeDetector::default(),
            pending: false,
            edges_seen: 0,
            clock_last_edge: 0.0,
            clock_period: 0.0,
            clock_ready: false,
            div_counter: 0,
            mul_index: 0,
            mul_base: 0.0,
            mul_next: 0.0,
            last_ratio_index: None,
        }
    }

    /// Clear timers and the clock measurement
    pub fn reset(&mut self) {
        let clock = {
            let mut clock = self.clock;
            clock.reset();
            clock
        };
        *self = Self::new();
        self.clock = clock;
    }

    /// Thresholds for the external trigger input
    pub fn set_trigger_thresholds(&mut self, low: f64, high: f64) {
        self.clock.set_thresholds(low, high);
    }

    /// Fire on the next processed sample
    pub fn request(&mut self) {
        self.pending = true;
    }

    /// Whether two clock edges have been measured
    #[inline]
    pub fn clock_ready(&self) -> bool {
        self.clock_ready
    }

    /// Smoothed clock period in seconds (0 until ready)
    #[inline]
    pub fn clock_period(&self) -> f64 {
        self.clock_period
    }

    /// Seconds since creation or reset
    #[inline]
    pub fn time(&self) -> f64 {
        self.abs_time
    }

    fn register_edge(&mut self) {
        if self.edges_seen > 0 {
            let interval = self.abs_time - self.clock_last_edge;
            if interval >= MIN_CLOCK_PERIOD {
                if self.clock_ready {
                    self.clock_period += CLOCK_EMA_ALPHA * (interval - self.clock_period);
                } else {
                    self.clock_period = interval;
                    self.clock_ready = true;
                }
            }
        }
        self.clock_last_edge = self.abs_time;
        self.edges_seen = self.edges_seen.saturating_add(1);
    }

    /// Point the multiplier at the first subdivision after now
    fn reanchor(&mut self, mul: u32) {
        self.mul_base = self.clock_last_edge;
        self.mul_index = 0;
        if !self.clock_ready || mul < 2 {
            return;
        }
        let sub = self.clock_period / mul as f64;
        for k in 1..mul {
            let at = self.mul_base + k as f64 * sub;
            if at > self.abs_time {
                self.mul_index = k;
                self.mul_next = at;
                return;
            }
        }
    }

    /// Advance one sample. `trig` is the RND_TRIG voltage (None when unpatched),
    /// `button` the Randomize button state. Returns true when a randomization fires.
    pub fn tick(&mut self, dt: f64, trig: Option<f64>, button: bool, timing: &RandTiming) -> bool {
        let mut fire = self.button.rising(button);
        if self.pending {
            self.pending = false;
            fire = true;
        }

        let edge = trig.map_or(false, |v| self.clock.process(v));
        if edge {
            self.register_edge();
            if !timing.sync {
                fire = true;
            }
        }

        if !timing.auto {
            self.timer = 0.0;
        } else if !timing.sync {
            let interval = free_interval(timing.raw_time);
            self.timer += dt;
            if self.timer >= interval {
                fire = true;
                while self.timer >= interval {
                    self.timer -= interval;
                }
            }
        } else {
            self.timer = 0.0;
            let index = SyncRatio::index_for_knob(timing.raw_time);
            let ratio = SyncRatio::from_index(index);
            if self.last_ratio_index != Some(index) {
                self.last_ratio_index = Some(index);
                self.div_counter = 0;
                if let SyncRatio::Multiply(m) = ratio {
                    self.reanchor(m);
                }
            }

            match ratio {
                SyncRatio::Divide(d) => {
                    if edge {
                        self.div_counter += 1;
                        if self.div_counter >= d {
                            self.div_counter = 0;
                            fire = true;
                        }
                    }
                }
                SyncRatio::Unity => fire |= edge,
                SyncRatio::Multiply(m) => {
                    if edge {
                        fire = true;
                        self.reanchor(m);
                    } else if self.mul_index > 0 && self.abs_time >= self.mul_next {
                        fire = true;
                        self.mul_index += 1;
                        if self.mul_index < m {
                            self.mul_next = self.mul_base
                                + self.mul_index as f64 * self.clock_period / m as f64;
                        } else {
                            self.mul_index = 0;
                        }
                    }
                }
            }
        }

        self.abs_time += dt;
        fire
    }
}

impl Default for RandScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: f64 = 48_000.0;

    fn clock_voltage(sample: usize, period_samples: usize) -> f64 {
        if sample % period_samples < 480 {
            5.0
        } else {
            0.0
        }
    }

    #[test]
    fn test_ratio_table() {
        assert_eq!(SyncRatio::from_index(0), SyncRatio::Divide(64));
        assert_eq!(SyncRatio::from_index(62), SyncRatio::Divide(2));
        assert_eq!(SyncRatio::from_index(63), SyncRatio::Unity);
        assert_eq!(SyncRatio::from_index(64), SyncRatio::Multiply(2));
        assert_eq!(SyncRatio::from_index(126), SyncRatio::Multiply(64));
        assert_eq!(SyncRatio::from_index(500), SyncRatio::Multiply(64));
        assert_eq!(SyncRatio::index_for_knob(0.5), 63);
        assert_eq!(SyncRatio::index_for_knob(SyncRatio::knob_for_index(66)), 66);
        assert_eq!(SyncRatio::from_index(66).label(), "×4");
    }

    #[test]
    fn test_free_interval_range() {
        assert_abs_diff_eq!(free_interval(0.0), 0.001, epsilon = 1e-12);
        assert_abs_diff_eq!(free_interval(1.0), 10_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(free_interval(0.5), 3.1623, epsilon = 1e-3);
    }

    #[test]
    fn test_free_timer_fires_on_interval() {
        let mut sched = RandScheduler::new();
        let raw = crate::shaping::log_unmap(0.1, RAND_MIN_SEC, RAND_MAX_SEC);
        let timing = RandTiming {
            auto: true,
            sync: false,
            raw_time: raw,
        };
        let fires = (0..48_000)
            .filter(|_| sched.tick(1.0 / SR, None, false, &timing))
            .count();
        assert!((9..=10).contains(&fires), "fired {} times", fires);
    }

    #[test]
    fn test_manual_sources() {
        let mut sched = RandScheduler::new();
        let off = RandTiming {
            auto: false,
            sync: false,
            raw_time: 0.5,
        };
        let dt = 1.0 / SR;
        assert!(sched.tick(dt, None, true, &off));
        assert!(!sched.tick(dt, None, true, &off));

        assert!(sched.tick(dt, Some(5.0), false, &off));
        assert!(!sched.tick(dt, Some(5.0), false, &off));

        sched.request();
        assert!(sched.tick(dt, None, false, &off));
        assert!(!sched.tick(dt, None, false, &off));
    }

    #[test]
    fn test_trigger_does_not_fire_in_sync_mode() {
        let mut sched = RandScheduler::new();
        let sync_off = RandTiming {
            auto: false,
            sync: true,
            raw_time: 0.5,
        };
        assert!(!sched.tick(1.0 / SR, Some(5.0), false, &sync_off));
    }

    #[test]
    fn test_clock_sync_multiply_by_four() {
        let mut sched = RandScheduler::new();
        let timing = RandTiming {
            auto: true,
            sync: true,
            raw_time: SyncRatio::knob_for_index(66),
        };
        let period = 24_000;
        let dt = 1.0 / SR;

        let mut fires = Vec::new();
        for n in 0..(period * 4) {
            if sched.tick(dt, Some(clock_voltage(n, period)), false, &timing) {
                fires.push(n as f64 / SR);
            }
            if n == period {
                assert!(sched.clock_ready());
            }
        }
        assert!(sched.clock_ready());
        assert_abs_diff_eq!(sched.clock_period(), 0.5, epsilon = 1e-6);

        // First edge only fires; subdivisions start once the period is known
        let expected: Vec<f64> = std::iter::once(0.0)
            .chain((1..4).flat_map(|edge| {
                let t0 = edge as f64 * 0.5;
                [t0, t0 + 0.125, t0 + 0.25, t0 + 0.375]
            }))
            .collect();
        assert_eq!(fires.len(), expected.len(), "fires: {:?}", fires);
        for (got, want) in fires.iter().zip(&expected) {
            assert_abs_diff_eq!(*got, *want, epsilon = 0.001);
        }
    }

    #[test]
    fn test_clock_sync_divide() {
        let mut sched = RandScheduler::new();
        let timing = RandTiming {
            auto: true,
            sync: true,
            raw_time: SyncRatio::knob_for_index(61), // ÷3
        };
        let period = 4_800;
        let fires = (0..period * 9)
            .filter(|&n| sched.tick(1.0 / SR, Some(clock_voltage(n, period)), false, &timing))
            .count();
        assert_eq!(fires, 3);
    }

    #[test]
    fn test_clock_period_smoothing() {
        let mut sched = RandScheduler::new();
        let timing = RandTiming {
            auto: false,
            sync: true,
            raw_time: 0.5,
        };
        let dt = 1.0 / SR;
        for &interval in &[4_800usize, 4_800, 9_600] {
            for k in 0..interval {
                let v = if k < 100 { 5.0 } else { 0.0 };
                sched.tick(dt, Some(v), false, &timing);
            }
        }
        // One more edge closes the 9600-sample interval
        sched.tick(dt, Some(5.0), false, &timing);
        assert_abs_diff_eq!(sched.clock_period(), 0.1 + 0.25 * 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_scope_selection() {
        let mut scope = RandScope::default();
        assert!(scope.slew_included(0));
        scope.lock_slew[0] = true;
        assert!(!scope.slew_included(0));

        assert!(!scope.rise_included());
        scope.allow_rise = true;
        assert!(scope.rise_included());
        // Allow has no effect while the class is selected; lock does
        scope.shapes = true;
        scope.lock_fall = true;
        assert!(scope.rise_included());
        assert!(!scope.fall_included());
    }

    #[test]
    fn test_unselected_knobs_never_change() {
        let mut params = Params::default();
        params.offset[3] = 1.25;
        params.rise_shape = 0.3;
        let mut scope = RandScope::default();
        scope.lock_offset[3] = true;
        scope.slew = false;
        scope.allow_slew[5] = true;

        let mut rng = Rng::from_seed(9);
        for _ in 0..500 {
            randomize(&mut params, &scope, 1.0, &mut rng);
        }
        assert_eq!(params.offset[3], 1.25);
        assert_eq!(params.rise_shape, 0.3);
        assert_eq!(params.fall_shape, 0.0);
        for i in (0..MAX_VOICES).filter(|&i| i != 5) {
            assert_eq!(params.slew[i], 0.0);
        }
        assert!(params.slew[5] > 0.0);
        for &v in &params.offset {
            assert!((-MAX_V..=MAX_V).contains(&v));
        }
    }

    #[test]
    fn test_zero_amount_is_noop() {
        let mut params = Params::default();
        params.slew[0] = 0.4;
        let before = params.clone();
        let mut rng = Rng::from_seed(1);
        randomize(&mut params, &RandScope::default(), 0.0, &mut rng);
        assert_eq!(params, before);
    }
}
