// Copyright 2025-2026 CEMAXECUTER LLC

//! Normalized attack detector metric (NADM) for sounding sequences and
//! random payloads.
//!
//! An early-commit relay has to guess each symbol before it has seen enough
//! of it, so the first sample of a wrongly guessed symbol swings the wrong
//! way. The metric is the mean wrong-way swing at the symbol starts,
//! normalized by the nominal deviation. A value above the threshold for the
//! detector type, found at the expected sync offset, marks the step as
//! suspect.

use num_complex::Complex64;
use serde::Serialize;

use crate::error::{DspError, Result};
use crate::pes::{calc_fine_sync_aars, sync_template, PesParams};
use crate::prim::freq_discriminate;

/// Highest NADM level reported on the wire ("attack extremely likely").
pub const NADM_MAX_LEVEL: u8 = 6;
/// NADM value meaning "unknown".
pub const NADM_UNKNOWN: u8 = 0xFF;

/// Which random sequence the detector ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdType {
    SoundingSequence = 0,
    RandomPayload = 1,
}

/// Detector thresholds, fixed at init.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NadmParams {
    /// Attack threshold per `AdType`.
    pub ad_thr: [f64; 2],
    /// Metric width of one NADM level.
    pub ad_step: f64,
    /// Largest tolerated distance between the detected peak and the expected
    /// offset, in samples.
    pub offset_tol: usize,
}

pub fn nadm_init(ad_thr: [f64; 2], ad_step: f64, offset_tol: usize) -> Result<NadmParams> {
    if ad_thr.iter().any(|t| !t.is_finite() || *t < 0.0) {
        return Err(DspError::InvalidArgument(format!("invalid NADM thresholds {:?}", ad_thr)));
    }
    if !(ad_step > 0.0) {
        return Err(DspError::InvalidArgument(format!("NADM step must be positive, got {}", ad_step)));
    }
    Ok(NadmParams {
        ad_thr,
        ad_step,
        offset_tol,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NadmStatus {
    NoAttack = 0,
    AttackSuspected = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NadmResult {
    pub status: NadmStatus,
    /// Raw NADM level (0..=6), or `NADM_UNKNOWN`.
    pub rdm: u8,
    pub amplitude: f64,
}

/// Early-commit metric of the pattern `template` aligned at `offset`.
pub fn nadm_statistic(pes: &PesParams, iq: &[Complex64], template: &[f64], offset: usize) -> Result<f64> {
    if offset + template.len() > iq.len() {
        return Err(DspError::InvalidArgument(format!(
            "pattern at offset {} runs past {} samples",
            offset,
            iq.len()
        )));
    }
    let disc = freq_discriminate(iq);
    let symbols = template.len() / pes.sps;
    if symbols == 0 {
        return Ok(0.0);
    }
    let mut wrong = 0.0;
    for s in 0..symbols {
        let idx = offset + s * pes.sps;
        let swing = disc[idx] * template[s * pes.sps];
        if swing < 0.0 {
            wrong += -swing;
        }
    }
    Ok(wrong / (symbols as f64 * pes.deviation_rad))
}

/// Classify one step.
///
/// `amplitude` is the detector metric at the detected peak and `peak_offset`
/// the distance of that peak from the expected sync position. A peak outside
/// the offset tolerance gives no verdict (`rdm == NADM_UNKNOWN`). The
/// threshold test is strict: an amplitude equal to the threshold is not an
/// attack.
pub fn calc_pes_nadm(params: &NadmParams, ad_type: AdType, amplitude: f64, peak_offset: isize) -> Result<NadmResult> {
    if !amplitude.is_finite() {
        return Err(DspError::InvalidArgument("NADM amplitude is not finite".into()));
    }
    if peak_offset.unsigned_abs() > params.offset_tol {
        return Ok(NadmResult {
            status: NadmStatus::NoAttack,
            rdm: NADM_UNKNOWN,
            amplitude,
        });
    }
    let level = (amplitude.max(0.0) / params.ad_step).floor();
    let rdm = level.min(NADM_MAX_LEVEL as f64) as u8;
    let status = if amplitude > params.ad_thr[ad_type as usize] {
        NadmStatus::AttackSuspected
    } else {
        NadmStatus::NoAttack
    };
    Ok(NadmResult { status, rdm, amplitude })
}

/// Fine sync on the received random sequence, then classify the metric
/// taken at the expected position. The sync peak only gates the verdict.
pub fn calc_pes_nadm_iq(
    pes: &PesParams,
    params: &NadmParams,
    ad_type: AdType,
    iq: &[Complex64],
    aa: u32,
    rs_bits: &[u8],
    expected: usize,
) -> Result<NadmResult> {
    let sync = calc_fine_sync_aars(pes, iq, aa, rs_bits, expected)?;
    let template = sync_template(pes, aa, rs_bits);
    let amplitude = nadm_statistic(pes, iq, &template, expected)?;
    calc_pes_nadm(params, ad_type, amplitude, sync.peak_index as isize - expected as isize)
}
