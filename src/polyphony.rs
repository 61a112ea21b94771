//! Polyphony Transitions
//!
//! Changing the number of processed voices mid-stream would make voices pop
//! in and out. Instead the output fades to silence, the widths switch, and
//! the output fades back in. The fade gain is linear in time and is handed
//! to the engine as a per-block span so it can be interpolated per sample.
//!
//! # States
//!
//! - `Stable` - widths match what was requested, gain 1
//! - `FadeOut` - gain falling toward 0 with the old widths
//! - `FadeIn` - widths switched, gain rising toward 1

use tracing::debug;

/// Ramp values at or below this count as silent
const RAMP_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolyPhase {
    #[default]
    Stable,
    FadeOut,
    FadeIn,
}

/// Number of processed voices and of output channels, and whether the
/// voices are summed onto one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolyWidths {
    pub process: usize,
    pub output: usize,
    pub summing: bool,
}

impl PolyWidths {
    /// One output channel per voice up to `output`
    pub fn new(process: usize, output: usize) -> Self {
        Self {
            process,
            output,
            summing: false,
        }
    }

    /// `process` voices summed onto a single channel
    pub fn summed(process: usize) -> Self {
        Self {
            process,
            output: 1,
            summing: true,
        }
    }
}

/// Gain at the start and end of one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampSpan {
    pub start: f64,
    pub end: f64,
}

impl RampSpan {
    /// Gain for sample `k` of a block of `frames` samples
    #[inline]
    pub fn at(&self, k: usize, frames: usize) -> f64 {
        if frames == 0 || self.start == self.end {
            return self.end;
        }
        self.start + (self.end - self.start) * (k + 1) as f64 / frames as f64
    }
}

/// Fade-out, switch, fade-in state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolyTransition {
    current: PolyWidths,
    pending: PolyWidths,
    phase: PolyPhase,
    ramp: f64,
    reinit: bool,
    primed: bool,
}

impl PolyTransition {
    /// Idle transition at zero width
    pub fn new() -> Self {
        Self {
            current: PolyWidths::default(),
            pending: PolyWidths::default(),
            phase: PolyPhase::Stable,
            ramp: 1.0,
            reinit: false,
            primed: false,
        }
    }

    #[inline]
    pub fn phase(&self) -> PolyPhase {
        self.phase
    }

    /// Current fade gain in [0, 1]
    #[inline]
    pub fn ramp(&self) -> f64 {
        self.ramp
    }

    /// Widths in effect for the current block
    #[inline]
    pub fn widths(&self) -> PolyWidths {
        self.current
    }

    /// Widths waiting for the fade-out to finish
    #[inline]
    pub fn pending(&self) -> PolyWidths {
        self.pending
    }

    /// Consume the request to re-seed voice state after a switch
    pub fn take_reinit(&mut self) -> bool {
        std::mem::take(&mut self.reinit)
    }

    /// Forget the current widths; the next block switches without fading
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn set_phase(&mut self, phase: PolyPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, ramp = self.ramp, "polyphony phase");
            self.phase = phase;
        }
    }

    fn switch(&mut self, widths: PolyWidths) {
        debug!(
            process = widths.process,
            output = widths.output,
            summing = widths.summing,
            "polyphony width switch"
        );
        self.current = widths;
        self.pending = widths;
        self.reinit = true;
    }

    /// Advance one block toward the `desired` widths. Call at the start of
    /// each block, before reading [`widths`](Self::widths).
    pub fn advance(&mut self, desired: PolyWidths, fade_sec: f64, block_dt: f64) -> RampSpan {
        let fading = fade_sec.is_finite() && fade_sec > 0.0;
        let step = if fading { block_dt / fade_sec } else { 1.0 };

        if !self.primed {
            self.primed = true;
            self.switch(desired);
            self.ramp = 1.0;
            self.set_phase(PolyPhase::Stable);
            return RampSpan { start: 1.0, end: 1.0 };
        }

        if !fading {
            if desired != self.current {
                self.switch(desired);
            }
            self.ramp = 1.0;
            self.set_phase(PolyPhase::Stable);
            return RampSpan { start: 1.0, end: 1.0 };
        }

        match self.phase {
            PolyPhase::Stable => {
                if desired != self.current {
                    self.pending = desired;
                    self.set_phase(PolyPhase::FadeOut);
                }
            }
            PolyPhase::FadeOut => {
                self.pending = desired;
                if self.ramp <= RAMP_EPSILON {
                    self.ramp = 0.0;
                    self.switch(desired);
                    self.set_phase(PolyPhase::FadeIn);
                } else if desired == self.current {
                    // Request withdrawn before the switch
                    self.set_phase(PolyPhase::FadeIn);
                }
            }
            PolyPhase::FadeIn => {
                if desired != self.current {
                    self.pending = desired;
                    self.set_phase(PolyPhase::FadeOut);
                }
            }
        }

        let start = self.ramp;
        match self.phase {
            PolyPhase::Stable => {}
            PolyPhase::FadeOut => {
                self.ramp = (self.ramp - step).max(0.0);
                if self.ramp <= RAMP_EPSILON {
                    self.ramp = 0.0;
                }
            }
            PolyPhase::FadeIn => {
                self.ramp = (self.ramp + step).min(1.0);
                if self.ramp >= 1.0 - RAMP_EPSILON {
                    self.ramp = 1.0;
                    self.set_phase(PolyPhase::Stable);
                }
            }
        }
        RampSpan {
            start,
            end: self.ramp,
        }
    }
}

impl Default for PolyTransition {
    fn default() -> Self {
        Self::new()
    }
}
