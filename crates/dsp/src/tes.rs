// Copyright 2025-2026 CEMAXECUTER LLC

//! Tone-exchange (phase-based ranging) estimator.
//!
//! The two-way product of initiator and reflector phase correction terms is
//! `H(f) ~ exp(-j 4 pi f d / c)`. The per-channel table of these products
//! (`H2wr`) feeds both the linear phase-slope estimator in this module and
//! the subspace estimator in `music`.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::cali::CaliTable;
use crate::error::{check_len, check_max_len, DspError, EstimationFailure, Result};
use crate::fcs::calc_freq;
use crate::fft::{padded_size, DelayFft};
use crate::prim::{f64_to_fixed, fixed_to_f64, linear_fit, mean_phasor, median, parabolic_offset, wrap_phase};
use crate::window::{self, kaiser};
use crate::{CS_CHANNEL_SPACING_HZ, MAX_ANTENNA_PATHS, MAX_CHANNEL_NUM, MAX_FCS_LEN, SPEED_OF_LIGHT};

/// Oversampling of the delay profile relative to the channel count.
const DELAY_OVERSAMPLE: usize = 8;

/// Precomputed constants for one channel plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TesParams {
    pub channum: usize,
    pub fstep_hz: f64,
    pub step_size: usize,
    /// Frequency of entry k relative to entry 0, Hz.
    pub x: Vec<f64>,
    /// Subarray length for the smoothed covariance.
    pub matlen: usize,
    /// Upper bound on the signal subspace dimension.
    pub hmatlen: usize,
    /// Number of smoothing subarrays.
    pub numsep: usize,
    /// `1 / sum((x - mean)^2)` for the phase-slope fit.
    pub inv_den: f64,
    /// Metres per radian of phase step between consecutive entries.
    pub l2s2r: f64,
    /// Metres per rad/Hz of phase slope.
    pub c_phase2r: f64,
    /// Unambiguous range of the plan, metres.
    pub range_period: f64,
    /// Delay-profile FFT length.
    pub nfft: usize,
}

impl TesParams {
    /// Metres per delay-profile bin.
    pub fn bin_m(&self) -> f64 {
        self.range_period / self.nfft as f64
    }

    /// Frequency spacing between consecutive entries, Hz.
    pub fn df(&self) -> f64 {
        self.fstep_hz * self.step_size as f64
    }
}

/// Build the tables for `channum` entries spaced `step_size * fstep_hz` apart.
/// Must be called again whenever the channel plan changes.
pub fn tes_init(channum: usize, fstep_hz: f64, step_size: usize) -> Result<TesParams> {
    if channum < 2 || channum > MAX_CHANNEL_NUM {
        return Err(DspError::InvalidArgument(format!(
            "channel count {} outside 2..={}",
            channum, MAX_CHANNEL_NUM
        )));
    }
    if !(fstep_hz > 0.0) || step_size == 0 {
        return Err(DspError::InvalidArgument(format!(
            "invalid frequency step {} Hz x {}",
            fstep_hz, step_size
        )));
    }
    if (channum - 1) * step_size >= MAX_CHANNEL_NUM {
        return Err(DspError::InvalidArgument(format!(
            "{} channels at step {} exceed the band",
            channum, step_size
        )));
    }

    let df = fstep_hz * step_size as f64;
    let x: Vec<f64> = (0..channum).map(|k| k as f64 * df).collect();
    let mean = x.iter().sum::<f64>() / channum as f64;
    let den: f64 = x.iter().map(|&v| (v - mean) * (v - mean)).sum();

    let matlen = (channum + 1) / 2;
    Ok(TesParams {
        channum,
        fstep_hz,
        step_size,
        x,
        matlen,
        hmatlen: (matlen / 2).max(1),
        numsep: channum - matlen + 1,
        inv_den: 1.0 / den,
        l2s2r: SPEED_OF_LIGHT / (4.0 * PI * df),
        c_phase2r: SPEED_OF_LIGHT / (4.0 * PI),
        range_period: SPEED_OF_LIGHT / (2.0 * df),
        nfft: padded_size(channum, DELAY_OVERSAMPLE),
    })
}

// ---------------------------------------------------------------------------
// Per-step tone processing
// ---------------------------------------------------------------------------

/// Tone quality indicator values.
pub const TQI_HIGH: u8 = 0;
pub const TQI_MEDIUM: u8 = 1;
pub const TQI_LOW: u8 = 2;
pub const TQI_UNAVAILABLE: u8 = 3;

const TQI_HIGH_COHERENCE: f64 = 0.9;
const TQI_MEDIUM_COHERENCE: f64 = 0.7;

/// Phase corrections applied to a tone before calibration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToneCorrection {
    /// Carrier offset between the two sides, Hz.
    pub cfo_hz: f64,
    /// TX/RX timing difference, seconds.
    pub delta_t_s: f64,
}

/// Processed tone: compensated phase correction term and its quality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TesInfo {
    pub pct: Complex64,
    pub tqi: u8,
}

/// SoC family of the radio, selecting its fixed-point conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IcMode {
    Jaguar,
    Tercel,
}

/// Fixed-point conventions of one SoC family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcScaling {
    pub frac_bits: u32,
    /// Q is delivered with inverted sign.
    pub conjugate: bool,
}

impl IcMode {
    pub fn scaling(self) -> IcScaling {
        match self {
            IcMode::Jaguar => IcScaling { frac_bits: 10, conjugate: false },
            IcMode::Tercel => IcScaling { frac_bits: 12, conjugate: true },
        }
    }

    /// Convert one raw hardware sample.
    pub fn to_complex(self, raw: [i16; 2]) -> Complex64 {
        let s = self.scaling();
        let c = Complex64::new(
            fixed_to_f64(raw[0] as i32, s.frac_bits),
            fixed_to_f64(raw[1] as i32, s.frac_bits),
        );
        if s.conjugate {
            c.conj()
        } else {
            c
        }
    }
}

fn tone_quality(samples: &[Complex64]) -> u8 {
    let total: f64 = samples.iter().map(|s| s.norm()).sum();
    if total < 1e-12 {
        return TQI_UNAVAILABLE;
    }
    let coherence = samples.iter().sum::<Complex64>().norm() / total;
    if coherence >= TQI_HIGH_COHERENCE {
        TQI_HIGH
    } else if coherence >= TQI_MEDIUM_COHERENCE {
        TQI_MEDIUM
    } else {
        TQI_LOW
    }
}

/// Average the tone samples of one step and apply offset, timing and
/// calibration corrections.
pub fn calc_tes_info(samples: &[Complex64], channel: u8, corr: &ToneCorrection, cali: &CaliTable) -> Result<TesInfo> {
    check_max_len(samples.len(), MAX_FCS_LEN)?;
    if samples.is_empty() {
        return Err(DspError::InvalidArgument("tone step without samples".into()));
    }
    if channel as usize >= MAX_CHANNEL_NUM {
        return Err(DspError::InvalidArgument(format!("channel {} out of range", channel)));
    }

    let tqi = tone_quality(samples);
    let freq = corr.cfo_hz + channel as f64 * CS_CHANNEL_SPACING_HZ;
    let rotation = Complex64::from_polar(1.0, -2.0 * PI * freq * corr.delta_t_s);
    let pct = mean_phasor(samples) * rotation * cali.get(channel);
    Ok(TesInfo { pct, tqi })
}

/// Tones straight from the hardware in the SoC's fixed-point format.
pub fn calc_tes_info_asic_hard(
    raw: &[[i16; 2]],
    channel: u8,
    corr: &ToneCorrection,
    cali: &CaliTable,
    mode: IcMode,
) -> Result<TesInfo> {
    let samples: Vec<Complex64> = raw.iter().map(|&r| mode.to_complex(r)).collect();
    calc_tes_info(&samples, channel, corr, cali)
}

/// Fixed-point output of `calc_tes_info_asic_hard_fix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TesInfoFix {
    pub i: i32,
    pub q: i32,
    pub tqi: u8,
}

/// Same as `calc_tes_info_asic_hard`, output in the SoC's fixed-point format.
pub fn calc_tes_info_asic_hard_fix(
    raw: &[[i16; 2]],
    channel: u8,
    corr: &ToneCorrection,
    cali: &CaliTable,
    mode: IcMode,
) -> Result<TesInfoFix> {
    let info = calc_tes_info_asic_hard(raw, channel, corr, cali, mode)?;
    let s = mode.scaling();
    let pct = if s.conjugate { info.pct.conj() } else { info.pct };
    Ok(TesInfoFix {
        i: f64_to_fixed(pct.re, s.frac_bits),
        q: f64_to_fixed(pct.im, s.frac_bits),
        tqi: info.tqi,
    })
}

/// Software path: the residual rotation across the tone is estimated from
/// the samples themselves and removed before averaging.
pub fn calc_tes_info_asic_soft(
    samples: &[Complex64],
    channel: u8,
    delta_t_s: f64,
    sample_rate_hz: f64,
    cali: &CaliTable,
) -> Result<TesInfo> {
    if !(sample_rate_hz > 0.0) {
        return Err(DspError::InvalidArgument(format!(
            "sample rate must be positive, got {}",
            sample_rate_hz
        )));
    }
    let cfo_hz = if samples.len() >= 2 {
        calc_freq(samples, 0.0, sample_rate_hz)?
    } else {
        0.0
    };
    let step = -2.0 * PI * cfo_hz / sample_rate_hz;
    // Centre the de-rotation so the mean keeps the mid-window phase.
    let mid = (samples.len() as f64 - 1.0) / 2.0;
    let derotated: Vec<Complex64> = samples
        .iter()
        .enumerate()
        .map(|(n, &s)| s * Complex64::from_polar(1.0, step * (n as f64 - mid)))
        .collect();
    calc_tes_info(&derotated, channel, &ToneCorrection { cfo_hz, delta_t_s }, cali)
}

// ---------------------------------------------------------------------------
// PCT compression
// ---------------------------------------------------------------------------

/// Gain of one amplitude-factor step.
pub const CALIFACTOR: f64 = 1.0 / 64.0;
/// Largest magnitude of a 12-bit PCT component.
pub const PCT_MAX: i16 = 2047;

/// Amplitude factor to linear gain.
#[inline]
pub fn cali_factor_to_gain(factor: u8) -> f64 {
    factor as f64 * CALIFACTOR
}

/// PCT compressed to an amplitude factor plus the 24-bit wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompressedTone {
    pub factor: u8,
    pub pct: [u8; 3],
}

/// Pack two signed 12-bit components: I in bits 0..12, Q in bits 12..24.
pub fn pack_pct(i: i16, q: i16) -> [u8; 3] {
    let i = (i as u16 & 0x0FFF) as u32;
    let q = (q as u16 & 0x0FFF) as u32;
    let v = i | (q << 12);
    [v as u8, (v >> 8) as u8, (v >> 16) as u8]
}

/// Inverse of `pack_pct`, sign-extending both components.
pub fn unpack_pct(b: [u8; 3]) -> (i16, i16) {
    let v = b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16;
    let sext = |x: u32| ((x << 4) as u16 as i16) >> 4;
    (sext(v & 0x0FFF), sext((v >> 12) & 0x0FFF))
}

/// Choose the smallest amplitude factor that keeps both components within
/// 12 bits, then quantize. Values beyond the largest factor saturate.
pub fn compress_tes_info(pct: Complex64) -> CompressedTone {
    let m = pct.re.abs().max(pct.im.abs());
    let factor = (m / (PCT_MAX as f64 * CALIFACTOR)).ceil().clamp(1.0, 255.0) as u8;
    let gain = cali_factor_to_gain(factor);
    let q = |v: f64| (v / gain).round().clamp(-(PCT_MAX as f64), PCT_MAX as f64) as i16;
    CompressedTone {
        factor,
        pct: pack_pct(q(pct.re), q(pct.im)),
    }
}

pub fn decompress_tes_info(tone: &CompressedTone) -> Complex64 {
    let (i, q) = unpack_pct(tone.pct);
    Complex64::new(i as f64, q as f64) * cali_factor_to_gain(tone.factor)
}

// ---------------------------------------------------------------------------
// Two-way channel response
// ---------------------------------------------------------------------------

/// Two-way response per antenna path and channel, path-major.
#[derive(Debug, Clone, PartialEq)]
pub struct H2wr {
    pub channum: usize,
    pub num_ap: usize,
    pub data: Vec<Complex64>,
}

impl H2wr {
    pub fn path(&self, ap: usize) -> &[Complex64] {
        &self.data[ap * self.channum..(ap + 1) * self.channum]
    }

    /// Build directly from a per-path, per-channel response.
    pub fn from_paths(paths: &[Vec<Complex64>]) -> Result<Self> {
        let channum = paths.first().map(|p| p.len()).unwrap_or(0);
        if paths.is_empty() || paths.len() > MAX_ANTENNA_PATHS {
            return Err(DspError::InvalidArgument(format!("{} antenna paths", paths.len())));
        }
        let mut data = Vec::with_capacity(channum * paths.len());
        for p in paths {
            check_len(p.len(), channum)?;
            data.extend_from_slice(p);
        }
        Ok(Self {
            channum,
            num_ap: paths.len(),
            data,
        })
    }
}

/// Combine initiator and reflector PCTs (path-major, `num_ap * channum`
/// each) with their per-channel calibration into the two-way response.
pub fn calc_ipm_pct(
    params: &TesParams,
    num_ap: usize,
    init: &[Complex64],
    refl: &[Complex64],
    cali_init: &[Complex64],
    cali_refl: &[Complex64],
) -> Result<H2wr> {
    if num_ap == 0 || num_ap > MAX_ANTENNA_PATHS {
        return Err(DspError::InvalidArgument(format!("{} antenna paths", num_ap)));
    }
    let n = params.channum;
    check_len(init.len(), n * num_ap)?;
    check_len(refl.len(), n * num_ap)?;
    check_len(cali_init.len(), n)?;
    check_len(cali_refl.len(), n)?;

    let data = (0..n * num_ap)
        .map(|idx| {
            let k = idx % n;
            init[idx] * refl[idx] * cali_init[k] * cali_refl[k]
        })
        .collect();
    Ok(H2wr {
        channum: n,
        num_ap,
        data,
    })
}

fn check_h2wr(params: &TesParams, h: &H2wr) -> Result<()> {
    check_len(h.channum, params.channum)?;
    check_len(h.data.len(), h.channum * h.num_ap)?;
    if h.num_ap == 0 {
        return Err(DspError::InvalidArgument("response without antenna paths".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Phase-slope estimator
// ---------------------------------------------------------------------------

/// Tuning of the first-peak ambiguity resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Largest disagreement between phase slope and first peak, in bins.
    pub first_peak_tolx: f64,
    /// Minimum first-peak level relative to the strongest peak.
    pub first_peak_min_level: f64,
    /// Kaiser shape of the delay-profile window.
    pub kaiser_beta: f64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            first_peak_tolx: 2.0,
            first_peak_min_level: 0.3,
            kaiser_beta: 4.0,
        }
    }
}

/// Phase-slope estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TesPhaseResult {
    pub distance: f64,
    /// Coherence of consecutive phase steps (1 = perfectly linear).
    pub diff_mean: f64,
    /// Coherence of the fitted line with the response (0..=1).
    pub likeliness: f64,
    /// Delay-profile first-peak distance.
    pub first_peak: f64,
    /// Antenna path the estimate came from.
    pub path: usize,
    pub failure: Option<EstimationFailure>,
}

/// Earliest local maximum of `mag` at or above `min_level * max`, refined to
/// a fractional bin.
pub(crate) fn first_peak(mag: &[f64], min_level: f64) -> Option<f64> {
    let n = mag.len();
    let max = mag.iter().cloned().fold(0.0, f64::max);
    if n < 3 || max <= 0.0 {
        return None;
    }
    let thr = max * min_level;
    for i in 0..n {
        let left = mag[(i + n - 1) % n];
        let right = mag[(i + 1) % n];
        if mag[i] >= thr && mag[i] >= left && mag[i] >= right {
            return Some(i as f64 + parabolic_offset(left, mag[i], right));
        }
    }
    None
}

/// Map into [-guard, period - guard).
pub(crate) fn fold_range(d: f64, period: f64, guard: f64) -> f64 {
    let r = d.rem_euclid(period);
    if r >= period - guard {
        r - period
    } else {
        r
    }
}

fn circular_gap(a: f64, b: f64, period: f64) -> f64 {
    let g = (a - b).rem_euclid(period);
    g.min(period - g)
}

fn phase_path(params: &TesParams, cfg: &PhaseConfig, h: &[Complex64], fft: &mut DelayFft, taper: &[f64]) -> TesPhaseResult {
    let mut acc = Complex64::new(0.0, 0.0);
    let mut mag_acc = 0.0;
    for pair in h.windows(2) {
        acc += pair[1] * pair[0].conj();
        mag_acc += pair[1].norm() * pair[0].norm();
    }
    let diff_mean = if mag_acc > 0.0 { acc.norm() / mag_acc } else { 0.0 };
    let phi_bar = acc.arg();

    // Unwrap relative to the mean step so single bad channels do not slip 2 pi.
    let mut psi = Vec::with_capacity(h.len());
    let mut cur = h[0].arg();
    psi.push(cur);
    for pair in h.windows(2) {
        let step = (pair[1] * pair[0].conj()).arg();
        cur += phi_bar + wrap_phase(step - phi_bar);
        psi.push(cur);
    }
    let fit = linear_fit(&params.x, &psi, params.inv_den);

    let total: f64 = h.iter().map(|c| c.norm()).sum();
    let likeliness = if total > 0.0 {
        h.iter()
            .zip(params.x.iter())
            .map(|(c, &x)| c * Complex64::from_polar(1.0, -(fit.slope * x + fit.intercept)))
            .sum::<Complex64>()
            .norm()
            / total
    } else {
        0.0
    };

    let period = params.range_period;
    let bin = params.bin_m();
    let guard = cfg.first_peak_tolx * bin;
    let d_fine = (-fit.slope * params.c_phase2r).rem_euclid(period);

    let windowed = window::apply(h, taper);
    let profile = fft.magnitude(&windowed);
    let (distance, first, failure) = match first_peak(&profile, cfg.first_peak_min_level) {
        Some(bin_pos) => {
            let first = (bin_pos * bin).rem_euclid(period);
            if circular_gap(d_fine, first, period) <= guard {
                (d_fine, first, None)
            } else {
                // The slope follows the power centroid; the first peak is the direct path.
                (first, first, None)
            }
        }
        None => (d_fine, f64::NAN, Some(EstimationFailure::NoPeak)),
    };

    TesPhaseResult {
        distance: fold_range(distance, period, guard),
        diff_mean,
        likeliness,
        first_peak: if first.is_nan() { first } else { fold_range(first, period, guard) },
        path: 0,
        failure,
    }
}

/// Phase-slope distance with first-peak ambiguity resolution. Every antenna
/// path is evaluated; the path with the best likeliness wins.
pub fn tes_phase(params: &TesParams, h: &H2wr, cfg: &PhaseConfig) -> Result<TesPhaseResult> {
    check_h2wr(params, h)?;
    let mut fft = DelayFft::new(params.nfft);
    let taper = kaiser(params.channum, cfg.kaiser_beta);

    let mut best: Option<TesPhaseResult> = None;
    for ap in 0..h.num_ap {
        let mut r = phase_path(params, cfg, h.path(ap), &mut fft, &taper);
        r.path = ap;
        match best {
            Some(b) if b.likeliness >= r.likeliness => {}
            _ => best = Some(r),
        }
    }
    best.ok_or_else(|| DspError::InvalidArgument("response without antenna paths".into()))
}

/// Median refinement result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TesMedianResult {
    pub distance: f64,
    /// Channel pairs that survived outlier rejection.
    pub used: usize,
    /// Median absolute deviation of the per-pair distances, metres.
    pub spread: f64,
}

/// Robust refinement around `prior_m`: every consecutive channel pair gives
/// a local distance resolved within half a period of the prior; outliers
/// beyond three scaled MADs are dropped and the median of the rest returned.
pub fn tes_phase_median(params: &TesParams, h: &H2wr, prior_m: f64) -> Result<TesMedianResult> {
    check_h2wr(params, h)?;
    if !prior_m.is_finite() {
        return Err(DspError::InvalidArgument("prior distance is not finite".into()));
    }
    let expected = -prior_m / params.l2s2r;
    let mut local = Vec::with_capacity(h.num_ap * (h.channum - 1));
    for ap in 0..h.num_ap {
        for pair in h.path(ap).windows(2) {
            if pair[0].norm() < 1e-12 || pair[1].norm() < 1e-12 {
                continue;
            }
            let step = (pair[1] * pair[0].conj()).arg();
            local.push(prior_m - wrap_phase(step - expected) * params.l2s2r);
        }
    }
    if local.is_empty() {
        return Ok(TesMedianResult {
            distance: prior_m,
            used: 0,
            spread: f64::NAN,
        });
    }

    let centre = median(&mut local.clone());
    let mut dev: Vec<f64> = local.iter().map(|d| (d - centre).abs()).collect();
    let mad = median(&mut dev);
    let limit = (3.0 * 1.4826 * mad).max(1e-9);
    let mut kept: Vec<f64> = local.into_iter().filter(|d| (d - centre).abs() <= limit).collect();
    let used = kept.len();
    Ok(TesMedianResult {
        distance: median(&mut kept),
        used,
        spread: mad,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn los_response(params: &TesParams, paths: &[(f64, f64)]) -> Vec<Complex64> {
        params
            .x
            .iter()
            .map(|&f| {
                paths
                    .iter()
                    .map(|&(d, a)| Complex64::from_polar(a, -4.0 * PI * f * d / SPEED_OF_LIGHT))
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_tes_init_tables() {
        let p = tes_init(72, 1e6, 1).unwrap();
        assert_eq!(p.x.len(), 72);
        assert_eq!(p.x[71], 71e6);
        assert_eq!(p.matlen, 36);
        assert_eq!(p.numsep, 37);
        assert_eq!(p.nfft, 1024);
        assert!((p.range_period - SPEED_OF_LIGHT / 2e6).abs() < 1e-9);
        assert_eq!(tes_init(72, 1e6, 1).unwrap(), p);
    }

    #[test]
    fn test_tes_init_rejects_bad_plan() {
        assert!(tes_init(1, 1e6, 1).is_err());
        assert!(tes_init(80, 1e6, 1).is_err());
        assert!(tes_init(40, 1e6, 2).is_err());
        assert!(tes_init(10, 0.0, 1).is_err());
    }

    #[test]
    fn test_phase_distance_line_of_sight() {
        let params = tes_init(72, 1e6, 1).unwrap();
        for &d in &[0.8, 7.5, 23.4, 61.0] {
            let h = H2wr::from_paths(&[los_response(&params, &[(d, 1.0)])]).unwrap();
            let r = tes_phase(&params, &h, &PhaseConfig::default()).unwrap();
            assert!((r.distance - d).abs() < 0.05, "d = {}, got {}", d, r.distance);
            assert!(r.likeliness > 0.99);
            assert!(r.diff_mean > 0.99);
            assert!(r.failure.is_none());
        }
    }

    #[test]
    fn test_phase_distance_stepped_plan() {
        let params = tes_init(37, 1e6, 2).unwrap();
        let d = 12.0;
        let h = H2wr::from_paths(&[los_response(&params, &[(d, 1.0)])]).unwrap();
        let r = tes_phase(&params, &h, &PhaseConfig::default()).unwrap();
        assert!((r.distance - d).abs() < 0.05, "got {}", r.distance);
    }

    #[test]
    fn test_phase_prefers_direct_path() {
        let params = tes_init(72, 1e6, 1).unwrap();
        let h = H2wr::from_paths(&[los_response(&params, &[(5.0, 1.0), (20.0, 0.5)])]).unwrap();
        let r = tes_phase(&params, &h, &PhaseConfig::default()).unwrap();
        assert!((r.distance - 5.0).abs() < 0.5, "got {}", r.distance);
        assert!(r.likeliness < 0.99);
    }

    #[test]
    fn test_phase_picks_best_path() {
        let params = tes_init(40, 1e6, 1).unwrap();
        let clean = los_response(&params, &[(9.0, 1.0)]);
        let noisy: Vec<Complex64> = clean
            .iter()
            .enumerate()
            .map(|(k, c)| c * Complex64::from_polar(1.0, if k % 3 == 0 { 1.2 } else { -0.4 }))
            .collect();
        let h = H2wr::from_paths(&[noisy, clean]).unwrap();
        let r = tes_phase(&params, &h, &PhaseConfig::default()).unwrap();
        assert_eq!(r.path, 1);
        assert!((r.distance - 9.0).abs() < 0.05);
    }

    #[test]
    fn test_phase_median_rejects_outliers() {
        let params = tes_init(40, 1e6, 1).unwrap();
        let mut resp = los_response(&params, &[(14.2, 1.0)]);
        resp[7] *= Complex64::from_polar(1.0, 2.5);
        resp[22] *= Complex64::from_polar(1.0, -2.0);
        let h = H2wr::from_paths(&[resp]).unwrap();
        let r = tes_phase_median(&params, &h, 13.0).unwrap();
        assert!((r.distance - 14.2).abs() < 0.05, "got {}", r.distance);
        assert!(r.used < 39);
    }

    #[test]
    fn test_ipm_pct_combines_sides() {
        let params = tes_init(4, 1e6, 1).unwrap();
        let init = vec![Complex64::from_polar(1.0, 0.3); 8];
        let refl = vec![Complex64::from_polar(2.0, 0.2); 8];
        let cali = vec![Complex64::from_polar(1.0, -0.1); 4];
        let unity = vec![Complex64::new(1.0, 0.0); 4];
        let h = calc_ipm_pct(&params, 2, &init, &refl, &cali, &unity).unwrap();
        assert_eq!(h.num_ap, 2);
        for c in &h.data {
            assert!((c.norm() - 2.0).abs() < 1e-12);
            assert!((c.arg() - 0.4).abs() < 1e-12);
        }
        assert!(calc_ipm_pct(&params, 2, &init[..7], &refl, &cali, &unity).is_err());
    }

    #[test]
    fn test_tes_info_corrections() {
        let samples = vec![Complex64::from_polar(0.5, 0.25); 8];
        let corr = ToneCorrection { cfo_hz: 0.0, delta_t_s: 0.0 };
        let info = calc_tes_info(&samples, 10, &corr, &CaliTable::unity()).unwrap();
        assert_eq!(info.tqi, TQI_HIGH);
        assert!((info.pct.arg() - 0.25).abs() < 1e-12);

        // 1 ns timing delta on channel 10 (10 MHz): -2 pi * 1e7 * 1e-9 rad
        let corr = ToneCorrection { cfo_hz: 0.0, delta_t_s: 1e-9 };
        let info = calc_tes_info(&samples, 10, &corr, &CaliTable::unity()).unwrap();
        assert!((info.pct.arg() - (0.25 - 2.0 * PI * 1e-2)).abs() < 1e-12);

        assert!(calc_tes_info(&[], 10, &corr, &CaliTable::unity()).is_err());
        assert!(calc_tes_info(&samples, 90, &corr, &CaliTable::unity()).is_err());
    }

    #[test]
    fn test_tes_info_quality_drops_with_spread() {
        let samples: Vec<Complex64> = (0..8).map(|i| Complex64::from_polar(1.0, i as f64 * 0.6)).collect();
        let info = calc_tes_info(&samples, 3, &ToneCorrection::default(), &CaliTable::unity()).unwrap();
        assert_eq!(info.tqi, TQI_LOW);
        let zeros = vec![Complex64::new(0.0, 0.0); 4];
        let info = calc_tes_info(&zeros, 3, &ToneCorrection::default(), &CaliTable::unity()).unwrap();
        assert_eq!(info.tqi, TQI_UNAVAILABLE);
    }

    #[test]
    fn test_asic_modes() {
        let raw = vec![[512i16, -256i16]; 4];
        let corr = ToneCorrection::default();
        let cali = CaliTable::unity();
        let j = calc_tes_info_asic_hard(&raw, 5, &corr, &cali, IcMode::Jaguar).unwrap();
        assert!((j.pct - Complex64::new(0.5, -0.25)).norm() < 1e-12);
        let t = calc_tes_info_asic_hard(&raw, 5, &corr, &cali, IcMode::Tercel).unwrap();
        assert!((t.pct - Complex64::new(0.125, 0.0625)).norm() < 1e-12);

        let fix = calc_tes_info_asic_hard_fix(&raw, 5, &corr, &cali, IcMode::Tercel).unwrap();
        assert_eq!((fix.i, fix.q), (512, -256));
    }

    #[test]
    fn test_asic_soft_removes_rotation() {
        let fs = 2e6;
        let samples: Vec<Complex64> = (0..40)
            .map(|n| Complex64::from_polar(1.0, 0.9 + 2.0 * PI * 20e3 * (n as f64 - 19.5) / fs))
            .collect();
        let info = calc_tes_info_asic_soft(&samples, 0, 0.0, fs, &CaliTable::unity()).unwrap();
        assert_eq!(info.tqi, TQI_HIGH);
        assert!((info.pct.arg() - 0.9).abs() < 1e-6, "phase {}", info.pct.arg());
        assert!((info.pct.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_asic_soft_rejects_bad_rate() {
        let one = [Complex64::new(1.0, 0.0)];
        for fs in [0.0, -1.0, f64::NAN] {
            assert!(calc_tes_info_asic_soft(&one, 0, 0.0, fs, &CaliTable::unity()).is_err());
        }
    }

    #[test]
    fn test_pct_pack_layout() {
        assert_eq!(pack_pct(1, -1), [0x01, 0xF0, 0xFF]);
        assert_eq!(unpack_pct([0x01, 0xF0, 0xFF]), (1, -1));
        assert_eq!(unpack_pct(pack_pct(-2047, 2047)), (-2047, 2047));
    }

    #[test]
    fn test_compress_decompress_error_bound() {
        for &z in &[
            Complex64::new(0.3, -0.7),
            Complex64::new(120.0, 5.5),
            Complex64::new(-3000.0, 1.0),
            Complex64::new(0.0, 0.0),
        ] {
            let c = compress_tes_info(z);
            let back = decompress_tes_info(&c);
            let gain = cali_factor_to_gain(c.factor);
            assert!((back.re - z.re).abs() <= gain / 2.0 + 1e-12, "{} -> {}", z, back);
            assert!((back.im - z.im).abs() <= gain / 2.0 + 1e-12, "{} -> {}", z, back);
        }
        // Beyond the largest factor the components saturate
        let c = compress_tes_info(Complex64::new(1e6, 0.0));
        assert_eq!(c.factor, 255);
        assert_eq!(unpack_pct(c.pct).0, PCT_MAX);
    }
}
