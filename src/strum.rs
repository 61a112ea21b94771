//! Strum Scheduler
//!
//! Spreads the onset of simultaneous target changes across the active voices.
//! Each voice gets a delay from the spread and its position in the chord.
//! The delay either stretches the glide (`TimeStretch`) or holds the voice's
//! previous output until it runs out (`StartDelay`).

use crate::rng::Rng;
use serde::{Deserialize, Serialize};

/// Target movement below this (volts) is not a new strum event
pub const STRUM_CHANGE_THRESHOLD: f64 = 1e-4;

/// Order in which voices are delayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrumMode {
    #[default]
    Up,
    Down,
    Random,
}

/// What a voice's delay does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrumType {
    /// Delay is added to the glide time
    #[default]
    TimeStretch,
    /// Voice holds its previous output until the delay elapses
    StartDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrumSettings {
    pub enabled: bool,
    pub mode: StrumMode,
    pub kind: StrumType,
    /// Spread between adjacent voices in milliseconds
    pub spread_ms: f64,
}

impl Default for StrumSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: StrumMode::Up,
            kind: StrumType::TimeStretch,
            spread_ms: 30.0,
        }
    }
}

impl StrumSettings {
    /// Delay in seconds for voice `index` of `count`
    pub fn delay_for(&self, index: usize, count: usize, rng: &mut Rng) -> f64 {
        if !self.enabled || count <= 1 || !(self.spread_ms > 0.0) {
            return 0.0;
        }
        let spread = self.spread_ms / 1000.0;
        match self.mode {
            StrumMode::Up => spread * index as f64,
            StrumMode::Down => spread * (count.saturating_sub(1 + index)) as f64,
            StrumMode::Random => spread * rng.unit(),
        }
    }
}

/// Per-voice strum state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StrumVoice {
    assigned: bool,
    delay: f64,
    /// Seconds left, measured from the start of the current block
    remaining: f64,
    prev_target: f64,
    has_prev: bool,
    last_jump: f64,
}

impl StrumVoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget history and start tracking from `target`
    pub fn reseed(&mut self, target: f64) {
        *self = Self {
            prev_target: target,
            has_prev: true,
            ..Self::default()
        };
    }

    /// Whether a countdown is still running `offset` seconds into the block
    #[inline]
    pub fn is_active(&self, offset: f64) -> bool {
        self.assigned && self.remaining - offset > 0.0
    }

    /// Delay assigned to the current strum event
    #[inline]
    pub fn delay(&self) -> f64 {
        self.delay
    }

    /// Watch the voice target. On a meaningful change that starts a new
    /// event (idle voice, direction flip, or a larger jump) a delay is drawn
    /// and returned.
    pub fn observe(
        &mut self,
        target: f64,
        offset: f64,
        settings: &StrumSettings,
        index: usize,
        count: usize,
        rng: &mut Rng,
    ) -> Option<f64> {
        if !self.has_prev {
            self.prev_target = target;
            self.has_prev = true;
            return None;
        }

        let jump = target - self.prev_target;
        if jump.abs() <= STRUM_CHANGE_THRESHOLD {
            return None;
        }
        self.prev_target = target;

        let flipped = jump.signum() != self.last_jump.signum();
        let larger = jump.abs() > self.last_jump.abs();
        if self.is_active(offset) && !flipped && !larger {
            return None;
        }

        self.last_jump = jump;
        let delay = settings.delay_for(index, count, rng);
        self.delay = delay;
        self.assigned = delay > 0.0;
        self.remaining = if self.assigned { delay + offset } else { 0.0 };
        Some(delay)
    }

    /// Advance the countdown by one block
    pub fn tick(&mut self, block_dt: f64) {
        if self.assigned {
            self.remaining -= block_dt;
            if self.remaining <= 1e-12 {
                self.remaining = 0.0;
                self.assigned = false;
            }
        }
    }
}
