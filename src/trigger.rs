//! Edge Detection
//!
//! Schmitt trigger for CV trigger/clock inputs and a plain rising-edge
//! detector for momentary buttons.

/// Default high threshold for trigger inputs (volts)
pub const TRIGGER_HIGH: f64 = 2.5;

/// Default low threshold for trigger inputs (volts)
pub const TRIGGER_LOW: f64 = 1.0;

/// Schmitt trigger with hysteresis. Reports rising edges only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchmittTrigger {
    low: f64,
    high: f64,
    high_state: bool,
}

impl SchmittTrigger {
    /// Trigger with the given low/high thresholds, starting low
    pub fn new(low: f64, high: f64) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        Self {
            low,
            high,
            high_state: false,
        }
    }

    /// Replace thresholds without losing state
    pub fn set_thresholds(&mut self, low: f64, high: f64) {
        let state = self.high_state;
        *self = Self::new(low, high);
        self.high_state = state;
    }

    /// Feed one sample; returns true on a low → high transition
    #[inline]
    pub fn process(&mut self, v: f64) -> bool {
        if self.high_state {
            if v <= self.low {
                self.high_state = false;
            }
            false
        } else if v >= self.high {
            self.high_state = true;
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn is_high(&self) -> bool {
        self.high_state
    }

    /// Return to the low state
    pub fn reset(&mut self) {
        self.high_state = false;
    }
}

impl Default for SchmittTrigger {
    fn default() -> Self {
        Self::new(TRIGGER_LOW, TRIGGER_HIGH)
    }
}

/// Rising-edge detector for boolean controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeDetector {
    last: bool,
}

impl EdgeDetector {
    /// Feed a level; true on a low-to-high edge
    #[inline]
    pub fn rising(&mut self, state: bool) -> bool {
        let edge = state && !self.last;
        self.last = state;
        edge
    }
}
