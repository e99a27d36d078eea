// Copyright 2025-2026 CEMAXECUTER LLC

//! Packet-exchange (RTT) estimator: fine sync on the access address or on
//! access address plus random sequence, per-step timing info, and the
//! round-trip distance.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{DspError, EstimationFailure, Result};
use crate::prim::{freq_discriminate, median_filter, normalized_correlation, parabolic_offset};
use crate::{MAX_PES_CORR_WIN, SPEED_OF_LIGHT};

/// Access-address length in bits.
pub const AA_BITS: usize = 32;
/// Longest random sequence (sounding sequence / random payload) in bits.
pub const MAX_RS_BITS: usize = 128;
/// One unit of the reported ToA-ToD value, in seconds.
pub const TOA_TOD_UNIT_S: f64 = 0.5e-9;
/// Reported when the ToA-ToD value is unavailable.
pub const TOA_TOD_NOT_AVAILABLE: i16 = i16::MIN;
/// Packet quality nibble meaning "access address not found".
pub const QUALITY_AA_NOT_FOUND: u8 = 0x2;

/// CS sync PHY rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataRate {
    Le1M,
    Le2M,
}

impl DataRate {
    pub fn bps(self) -> f64 {
        match self {
            DataRate::Le1M => 1e6,
            DataRate::Le2M => 2e6,
        }
    }

    /// Nominal GFSK frequency deviation in Hz.
    pub fn deviation_hz(self) -> f64 {
        match self {
            DataRate::Le1M => 250e3,
            DataRate::Le2M => 500e3,
        }
    }
}

/// Precomputed PES constants for one clock / PHY configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PesParams {
    pub fclk_hz: f64,
    pub data_rate: DataRate,
    /// Samples per symbol.
    pub sps: usize,
    /// Width of the median filter applied to the discriminator output.
    pub search_median: usize,
    /// Half-width of the fine-sync search around the coarse position.
    pub corr_win: usize,
    /// Sync pattern length in bits (access address plus optional sequence).
    pub bits: usize,
    /// Seconds per sample tick.
    pub tick_s: f64,
    /// Sample ticks per reported ToA-ToD unit.
    pub ticks_per_unit: f64,
    /// Expected discriminator output per sample for a '1', rad.
    pub deviation_rad: f64,
}

/// Derive the PES constants. Pure; identical inputs give identical tables.
pub fn pes_init(
    fclk_hz: f64,
    data_rate: DataRate,
    search_median: usize,
    corr_win: usize,
    bits: usize,
) -> Result<PesParams> {
    if !(fclk_hz > 0.0) {
        return Err(DspError::InvalidArgument(format!("fclk must be positive, got {}", fclk_hz)));
    }
    let ratio = fclk_hz / data_rate.bps();
    let sps = ratio.round() as usize;
    if sps == 0 || (ratio - sps as f64).abs() > 1e-9 {
        return Err(DspError::InvalidArgument(format!(
            "fclk {} Hz is not a multiple of the symbol rate",
            fclk_hz
        )));
    }
    if corr_win == 0 || corr_win > MAX_PES_CORR_WIN {
        return Err(DspError::InvalidArgument(format!(
            "correlation window {} outside 1..={}",
            corr_win, MAX_PES_CORR_WIN
        )));
    }
    if search_median > 1 && search_median % 2 == 0 {
        return Err(DspError::InvalidArgument(format!(
            "median width {} must be odd",
            search_median
        )));
    }
    if bits < AA_BITS || bits > AA_BITS + MAX_RS_BITS {
        return Err(DspError::InvalidArgument(format!(
            "sync length {} bits outside {}..={}",
            bits,
            AA_BITS,
            AA_BITS + MAX_RS_BITS
        )));
    }

    let tick_s = 1.0 / fclk_hz;
    Ok(PesParams {
        fclk_hz,
        data_rate,
        sps,
        search_median: search_median.max(1),
        corr_win,
        bits,
        tick_s,
        ticks_per_unit: TOA_TOD_UNIT_S / tick_s,
        deviation_rad: 2.0 * PI * data_rate.deviation_hz() / fclk_hz,
    })
}

/// +/-1 template for the access address (LSB first) followed by `rs_bits`.
pub fn sync_template(params: &PesParams, aa: u32, rs_bits: &[u8]) -> Vec<f64> {
    let mut template = Vec::with_capacity((AA_BITS + rs_bits.len()) * params.sps);
    let aa_bits = (0..AA_BITS).map(|i| ((aa >> i) & 1) as u8);
    for bit in aa_bits.chain(rs_bits.iter().copied()) {
        let val = if bit & 1 == 1 { 1.0 } else { -1.0 };
        for _ in 0..params.sps {
            template.push(val);
        }
    }
    template
}

/// Result of a fine-sync search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FineSync {
    /// Sync position in fractional sample ticks from the start of the buffer.
    pub timestamp: f64,
    /// Integer sample index of the best correlation.
    pub peak_index: usize,
    /// Normalized correlation at the peak.
    pub peak: f64,
}

fn fine_sync(params: &PesParams, iq: &[Complex64], template: &[f64], coarse: usize) -> Result<FineSync> {
    if template.len() > iq.len() {
        return Err(DspError::InvalidArgument(format!(
            "IQ buffer of {} samples shorter than sync template ({})",
            iq.len(),
            template.len()
        )));
    }
    let last_start = iq.len() - template.len();
    let lo = coarse.saturating_sub(params.corr_win);
    let hi = coarse.saturating_add(params.corr_win).min(last_start);
    if lo > hi {
        return Err(DspError::InvalidArgument(format!(
            "coarse position {} leaves no room for the sync pattern",
            coarse
        )));
    }

    let disc = median_filter(&freq_discriminate(iq), params.search_median);
    let corr: Vec<f64> = (lo..=hi)
        .map(|k| normalized_correlation(&disc, template, k))
        .collect();

    let mut best = 0;
    for (i, &c) in corr.iter().enumerate() {
        if c > corr[best] {
            best = i;
        }
    }
    let frac = if best > 0 && best + 1 < corr.len() {
        parabolic_offset(corr[best - 1], corr[best], corr[best + 1])
    } else {
        0.0
    };

    let peak_index = lo + best;
    Ok(FineSync {
        timestamp: peak_index as f64 + frac,
        peak_index,
        peak: corr[best],
    })
}

/// Fine sync against the access address only. Returns the sync position in
/// fractional sample ticks.
pub fn calc_fine_sync_aa(params: &PesParams, iq: &[Complex64], aa: u32, coarse: usize) -> Result<f64> {
    let template = sync_template(params, aa, &[]);
    Ok(fine_sync(params, iq, &template, coarse)?.timestamp)
}

/// Fine sync against access address plus random sequence.
pub fn calc_fine_sync_aars(
    params: &PesParams,
    iq: &[Complex64],
    aa: u32,
    rs_bits: &[u8],
    coarse: usize,
) -> Result<FineSync> {
    if AA_BITS + rs_bits.len() > params.bits {
        return Err(DspError::InvalidArgument(format!(
            "random sequence of {} bits exceeds configured sync length {}",
            rs_bits.len(),
            params.bits
        )));
    }
    let template = sync_template(params, aa, rs_bits);
    fine_sync(params, iq, &template, coarse)
}

/// Per-step timing as seen by one side of the exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PesStepTiming {
    /// Tick at which the local packet left.
    pub tod_tick: u32,
    /// Tick at which the receive window for the peer packet opened.
    pub rx_tick: u32,
    /// Nominal turnaround between the two packets, seconds.
    pub turnaround_s: f64,
    pub channel: u8,
    /// Packet quality nibble from the sync detector.
    pub quality: u8,
}

/// Compact per-step PES result.
///
/// Encoded as an `i32`: bits 0..16 ToA-ToD (0.5 ns units, two's complement),
/// bits 16..23 channel index, bits 24..28 packet quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PesInfo {
    pub toa_tod: i16,
    pub channel: u8,
    pub quality: u8,
}

impl PesInfo {
    pub fn encode(&self) -> i32 {
        ((self.quality as i32 & 0x0F) << 24)
            | ((self.channel as i32 & 0x7F) << 16)
            | (self.toa_tod as u16 as i32)
    }

    pub fn decode(raw: i32) -> Self {
        Self {
            toa_tod: (raw & 0xFFFF) as u16 as i16,
            channel: ((raw >> 16) & 0x7F) as u8,
            quality: ((raw >> 24) & 0x0F) as u8,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.toa_tod != TOA_TOD_NOT_AVAILABLE && (self.quality & 0x0F) != QUALITY_AA_NOT_FOUND
    }
}

fn pes_info(params: &PesParams, step: &PesStepTiming, sync_ticks: f64) -> i32 {
    let toa_tod = if (step.quality & 0x0F) == QUALITY_AA_NOT_FOUND {
        TOA_TOD_NOT_AVAILABLE
    } else {
        let elapsed = step.rx_tick.wrapping_sub(step.tod_tick) as f64 + sync_ticks;
        let nominal = step.turnaround_s / params.tick_s;
        let units = ((elapsed - nominal) / params.ticks_per_unit).round();
        // i16::MIN is reserved for "not available"
        units.clamp(i16::MIN as f64 + 1.0, i16::MAX as f64) as i16
    };
    PesInfo {
        toa_tod,
        channel: step.channel,
        quality: step.quality,
    }
    .encode()
}

/// Encode one step using an integer sync index.
pub fn calc_pes_info_sdk(params: &PesParams, step: &PesStepTiming, sync_index: u32) -> i32 {
    pes_info(params, step, sync_index as f64)
}

/// Encode one step using a fractional sync timestamp (from fine sync).
pub fn calc_pes_info_fine(params: &PesParams, step: &PesStepTiming, sync_timestamp: f64) -> Result<i32> {
    if !sync_timestamp.is_finite() {
        return Err(DspError::InvalidArgument("sync timestamp is not finite".into()));
    }
    Ok(pes_info(params, step, sync_timestamp))
}

/// How the matched ToA-ToD pair maps to a distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeMode {
    /// Initiator ToA-ToD minus reflector ToD-ToA is twice the flight time.
    RoundTrip,
    /// The difference already is the one-way flight time.
    OneWay,
}

/// Distance-averaging parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PesDistParams {
    pub n_average: usize,
    pub mode: RangeMode,
    /// Metres per ToA-ToD unit after the mode scaling.
    pub unit_to_m: f64,
}

pub fn pes_dist_init(n_average: usize, mode: RangeMode) -> Result<PesDistParams> {
    if n_average == 0 {
        return Err(DspError::InvalidArgument("n_average must be at least 1".into()));
    }
    let scale = match mode {
        RangeMode::RoundTrip => 0.5,
        RangeMode::OneWay => 1.0,
    };
    Ok(PesDistParams {
        n_average,
        mode,
        unit_to_m: SPEED_OF_LIGHT * TOA_TOD_UNIT_S * scale,
    })
}

/// PES distance over matched initiator/reflector steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PesDistance {
    /// Metres; NaN when no pair was usable.
    pub distance: f64,
    pub used: usize,
    pub failure: Option<EstimationFailure>,
}

/// Average the distance over the first `n_average` usable pairs. A pair is
/// usable when both sides are valid and were measured on the same channel.
pub fn pes_calc_dist_sdk(params: &PesDistParams, pairs: &[(PesInfo, PesInfo)]) -> PesDistance {
    let mut sum = 0.0;
    let mut used = 0;
    for (init, refl) in pairs {
        if used == params.n_average {
            break;
        }
        if !init.is_valid() || !refl.is_valid() || init.channel != refl.channel {
            continue;
        }
        sum += (init.toa_tod as f64 - refl.toa_tod as f64) * params.unit_to_m;
        used += 1;
    }
    if used == 0 {
        return PesDistance {
            distance: f64::NAN,
            used,
            failure: Some(EstimationFailure::TooFewChannels),
        };
    }
    PesDistance {
        distance: sum / used as f64,
        used,
        failure: None,
    }
}
