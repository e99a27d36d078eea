// Copyright 2025-2026 CEMAXECUTER LLC

//! Carrier frequency offset refinement over the frequency-compensation
//! sequence (FCS) of a CS step.

use num_complex::Complex64;
use std::f64::consts::PI;

use crate::error::{check_max_len, DspError, Result};
use crate::prim::{linear_fit, wrap_phase};
use crate::MAX_FCS_LEN;

/// Refine the carrier frequency offset between initiator and reflector.
///
/// The window is first de-rotated by `cfo_coarse_hz`; the residual rotation
/// rate is then the slope of a least-squares line through the accumulated
/// sample-to-sample phase increments. Returns the refined offset in Hz.
pub fn calc_freq(iq: &[Complex64], cfo_coarse_hz: f64, sample_rate_hz: f64) -> Result<f64> {
    check_max_len(iq.len(), MAX_FCS_LEN)?;
    if iq.len() < 2 {
        return Err(DspError::InvalidArgument(format!(
            "FCS window needs at least 2 samples, got {}",
            iq.len()
        )));
    }
    if !(sample_rate_hz > 0.0) {
        return Err(DspError::InvalidArgument(format!(
            "sample rate must be positive, got {}",
            sample_rate_hz
        )));
    }

    let step = -2.0 * PI * cfo_coarse_hz / sample_rate_hz;
    let derotated: Vec<Complex64> = iq
        .iter()
        .enumerate()
        .map(|(n, &s)| s * Complex64::from_polar(1.0, step * n as f64))
        .collect();

    // Accumulated phase: robust against the absolute phase sitting near +/-pi.
    let mut phase = Vec::with_capacity(derotated.len());
    let mut acc = derotated[0].arg();
    phase.push(acc);
    for pair in derotated.windows(2) {
        acc += wrap_phase((pair[1] * pair[0].conj()).arg());
        phase.push(acc);
    }

    let n = phase.len();
    let t: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let mean = (n as f64 - 1.0) / 2.0;
    let den: f64 = t.iter().map(|&v| (v - mean) * (v - mean)).sum();
    let fit = linear_fit(&t, &phase, 1.0 / den);

    Ok(cfo_coarse_hz + fit.slope * sample_rate_hz / (2.0 * PI))
}
