//! # Polyslew: Polyphonic Pitch/CV Processor
//!
//! `polyslew` processes up to 16 voices of 1 V/oct pitch or control voltage.
//! Each voice runs through gain and offset stages, a range stage, an optional
//! scale quantizer, and a slew limiter with shaped rise and fall curves.
//! Strumming staggers the voices in time, and a randomizer perturbs the knob
//! surface on a free-running timer, a clock-synced ratio or a trigger.
//!
//! ## Architecture
//!
//! - **Primitives** - curve shaping, clipping, tuning systems, the quantizer
//!   latch, the slew limiter, strum timing
//! - **Control** - [`Config`] (menu surface) and [`Params`] (knob surface),
//!   the randomizer and its scheduler, persisted [`State`]
//! - **Engine** - [`Engine`] runs one block of [`PolyFrame`]s at a time and
//!   owns all per-voice state
//!
//! ## Quick Start
//!
//! ```rust
//! use polyslew::prelude::*;
//!
//! let mut engine = Engine::with_seed(48_000.0, 1);
//! engine.params_mut().slew[0] = 0.3;
//!
//! let input = [PolyFrame::from_slice(&[0.0, 0.25, 0.5]); 64];
//! let mut output = [PolyFrame::empty(); 64];
//! engine.process_block(&input, &[], &mut output);
//!
//! assert_eq!(output[63].channels, 3);
//! ```

/// Maximum number of voices
pub const MAX_VOICES: usize = 16;

pub mod config;
pub mod engine;
pub mod io;
pub mod params;
pub mod polyphony;
pub mod quantizer;
pub mod random;
pub mod rng;
pub mod shaping;
pub mod slew;
pub mod state;
pub mod strum;
pub mod trigger;
pub mod tuning;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::MAX_VOICES;

    // Primitives
    pub use crate::quantizer::{QuantConfig, QuantLatch, RoundMode};
    pub use crate::rng::Rng;
    pub use crate::shaping::{CurveShape, RangeMode};
    pub use crate::slew::{GlideShapes, SlewLimiter};
    pub use crate::strum::{StrumMode, StrumSettings, StrumType};
    pub use crate::trigger::SchmittTrigger;
    pub use crate::tuning::{Scale, ScaleMask, ScaleSelection, Tuning, TuningMode};

    // Control surface
    pub use crate::config::{Config, QuantizerPos, RandConfig, SnapMode, VoiceConfig};
    pub use crate::params::{BankMode, DualBank, Params};
    pub use crate::random::{RandScheduler, RandScope, SyncRatio};
    pub use crate::state::{State, StateError};

    // Engine and I/O
    pub use crate::engine::Engine;
    pub use crate::io::{AtomicF64, LedBank, PolyFrame};
    pub use crate::polyphony::{PolyPhase, PolyTransition, PolyWidths};
}

// Re-export prelude at crate root for convenience
pub use prelude::*;
