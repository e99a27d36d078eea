// Copyright 2025-2026 CEMAXECUTER LLC

//! Channel Sounding distance estimators.
//!
//! Everything in this crate is a pure function of caller-owned buffers and
//! precomputed, immutable parameter tables. Nothing here keeps state between
//! calls, so estimators can run on any thread.

pub mod cali;
pub mod combine;
pub mod error;
pub mod fcs;
pub mod fft;
pub mod music;
pub mod nadm;
pub mod pes;
pub mod prim;
pub mod tes;
pub mod window;

pub use error::{DspError, EstimationFailure};

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Maximum number of interleaved IQ scalars delivered for one step.
pub const MAX_IQ_LEN: usize = 804;

/// Maximum number of complex samples in the frequency-compensation window.
pub const MAX_FCS_LEN: usize = MAX_IQ_LEN / 2;

/// Highest CS channel index plus one (channels 0..=78).
pub const MAX_CHANNEL_NUM: usize = 79;

/// Maximum number of antenna paths per step.
pub const MAX_ANTENNA_PATHS: usize = 4;

/// Half-width of the PES fine-sync correlation search, in samples.
pub const MAX_PES_CORR_WIN: usize = 10;

/// Spacing of adjacent CS channels in Hz.
pub const CS_CHANNEL_SPACING_HZ: f64 = 1e6;
