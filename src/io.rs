//! Host I/O
//!
//! Polyphonic frames in and out of the engine, and the LED bank a UI thread
//! may read while audio runs.

use crate::shaping::MAX_V;
use crate::MAX_VOICES;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// LED smoothing time constant in seconds
pub const LED_TAU_SEC: f64 = 0.05;

/// Atomic f64 for lock-free communication between threads
///
/// Uses AtomicU64 internally since there's no native AtomicF64.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Relaxed load
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Relaxed store
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clone for AtomicF64 {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

/// One sample of a polyphonic cable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolyFrame {
    /// Active channels, 0 means unpatched
    pub channels: usize,
    pub voltages: [f64; MAX_VOICES],
}

impl PolyFrame {
    /// Frame with no channels
    pub const fn empty() -> Self {
        Self {
            channels: 0,
            voltages: [0.0; MAX_VOICES],
        }
    }

    /// Single-channel frame
    pub fn mono(v: f64) -> Self {
        let mut frame = Self::empty();
        frame.channels = 1;
        frame.voltages[0] = v;
        frame
    }

    /// Frame from a slice of channel voltages (extra channels are dropped)
    pub fn from_slice(values: &[f64]) -> Self {
        let mut frame = Self::empty();
        frame.channels = values.len().min(MAX_VOICES);
        frame.voltages[..frame.channels].copy_from_slice(&values[..frame.channels]);
        frame
    }

    /// Same voltage on `channels` channels
    pub fn splat(v: f64, channels: usize) -> Self {
        let mut frame = Self::empty();
        frame.channels = channels.min(MAX_VOICES);
        frame.voltages[..frame.channels].fill(v);
        frame
    }

    /// True when at least one channel is present
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.channels > 0
    }

    /// Voltage seen by voice `i`. A mono cable feeds every voice; voices past
    /// a polyphonic cable's width read 0 V.
    #[inline]
    pub fn voice(&self, i: usize) -> f64 {
        match self.channels {
            0 => 0.0,
            1 => self.voltages[0],
            n if i < n => self.voltages[i],
            _ => 0.0,
        }
    }

    /// Active channel voltages
    pub fn as_slice(&self) -> &[f64] {
        &self.voltages[..self.channels.min(MAX_VOICES)]
    }
}

impl Default for PolyFrame {
    fn default() -> Self {
        Self::empty()
    }
}

/// Green/red brightness pair for one voice
#[derive(Debug, Default)]
pub struct Led {
    pub green: AtomicF64,
    pub red: AtomicF64,
}

/// Per-voice bipolar LEDs: green for positive output, red for negative,
/// brightness `|v| / 10 V`, smoothed once per block.
#[derive(Debug)]
pub struct LedBank {
    leds: Arc<[Led; MAX_VOICES]>,
    green: [f64; MAX_VOICES],
    red: [f64; MAX_VOICES],
}

impl LedBank {
    pub fn new() -> Self {
        Self {
            leds: Arc::new(std::array::from_fn(|_| Led::default())),
            green: [0.0; MAX_VOICES],
            red: [0.0; MAX_VOICES],
        }
    }

    /// Shared handle for a UI thread
    pub fn handle(&self) -> Arc<[Led; MAX_VOICES]> {
        Arc::clone(&self.leds)
    }

    /// Current smoothed brightness of voice `i` as (green, red)
    pub fn brightness(&self, i: usize) -> (f64, f64) {
        self.leds
            .get(i)
            .map_or((0.0, 0.0), |led| (led.green.get(), led.red.get()))
    }

    /// Smooth toward the last output of each voice and publish. Voices past
    /// `active` go dark.
    pub fn update(&mut self, outputs: &[f64; MAX_VOICES], active: usize, block_dt: f64) {
        let alpha = 1.0 - libm::exp(-block_dt.max(0.0) / LED_TAU_SEC);
        for i in 0..MAX_VOICES {
            let v = if i < active { outputs[i] } else { 0.0 };
            let level = (v.abs() / MAX_V).min(1.0);
            let (g, r) = if v >= 0.0 { (level, 0.0) } else { (0.0, level) };
            self.green[i] += alpha * (g - self.green[i]);
            self.red[i] += alpha * (r - self.red[i]);
            self.leds[i].green.set(self.green[i]);
            self.leds[i].red.set(self.red[i]);
        }
    }

    /// Dark all LEDs
    pub fn reset(&mut self) {
        self.green = [0.0; MAX_VOICES];
        self.red = [0.0; MAX_VOICES];
        for led in self.leds.iter() {
            led.green.set(0.0);
            led.red.set(0.0);
        }
    }
}

impl Default for LedBank {
    fn default() -> Self {
        Self::new()
    }
}
