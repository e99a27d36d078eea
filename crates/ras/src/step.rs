// Copyright 2025-2026 CEMAXECUTER LLC

//! Per-mode step result layouts and the filters that strip optional fields
//! from them on the wire.
//!
//! Mode 0 (initiator adds the measured frequency offset):
//! ```text
//!  quality(1) rssi(1) antenna(1) [freq_offset(2)]
//! ```
//! Mode 1 (PCT1/PCT2 only when a sounding sequence is used):
//! ```text
//!  quality(1) nadm(1) rssi(1) toa_tod(2) antenna(1) [pct1(4) pct2(4)]
//! ```
//! Mode 2, one tone per antenna path plus the extension tone:
//! ```text
//!  api(1) { pct(3) tqi(1) } x (paths + 1)
//! ```
//! Mode 3 is mode 1 followed by mode 2.

use cs_hci::CsRole;
use serde::{Deserialize, Serialize};

use crate::error::{RasError, Result};

/// Value written into fields a filter removed.
pub const FILTER_UNPACK_FILLER: u8 = 0xFF;

pub mod mode0 {
    pub const QUALITY: u16 = 1 << 0;
    pub const RSSI: u16 = 1 << 1;
    pub const ANTENNA: u16 = 1 << 2;
    pub const FREQ_OFFSET: u16 = 1 << 3;
    pub const ALL: u16 = 0x000F;
}

/// Mode 1 bits; mode 3 uses the same bits for its mode 1 part.
pub mod mode1 {
    pub const QUALITY: u16 = 1 << 0;
    pub const NADM: u16 = 1 << 1;
    pub const RSSI: u16 = 1 << 2;
    pub const TOA_TOD: u16 = 1 << 3;
    pub const ANTENNA: u16 = 1 << 4;
    pub const PCT1: u16 = 1 << 5;
    pub const PCT2: u16 = 1 << 6;
    pub const ALL: u16 = 0x007F;
}

pub mod mode2 {
    pub const API: u16 = 1 << 0;
    pub const PCT: u16 = 1 << 1;
    pub const TQI: u16 = 1 << 2;
    /// Tones of antenna path `n` (0-based). The extension tone has no bit.
    pub const fn path(n: u8) -> u16 {
        1 << (3 + n)
    }
    pub const ALL: u16 = 0x007F;
}

/// Mode 3 tone bits, shifted above the mode 1 bits.
pub const MODE3_TONE_SHIFT: u32 = 7;
pub const MODE3_ALL: u16 = 0x3FFF;

/// Which optional fields are kept, per mode. A set bit keeps the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub mode0: u16,
    pub mode1: u16,
    pub mode2: u16,
    pub mode3: u16,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            mode0: mode0::ALL,
            mode1: mode1::ALL,
            mode2: mode2::ALL,
            mode3: MODE3_ALL,
        }
    }
}

impl FilterSettings {
    pub fn mask(&self, mode: u8) -> u16 {
        match mode {
            0 => self.mode0,
            1 => self.mode1,
            2 => self.mode2,
            _ => self.mode3,
        }
    }
}

/// What the step layout depends on besides the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContext {
    pub role: CsRole,
    pub num_antenna_paths: u8,
    /// Mode 1 steps carry PCT1/PCT2.
    pub sounding_sequence: bool,
}

/// One field of a step layout. The field is kept only if every bit of
/// `requires` is set in the filter mask; `requires == 0` is always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub len: usize,
    pub requires: u16,
}

fn field(len: usize, requires: u16) -> Field {
    Field { len, requires }
}

fn tone_fields(out: &mut Vec<Field>, n_ap: u8, shift: u32) {
    out.push(field(1, mode2::API << shift));
    for t in 0..=n_ap {
        let path = if t < n_ap { mode2::path(t) << shift } else { 0 };
        out.push(field(3, (mode2::PCT << shift) | path));
        out.push(field(1, (mode2::TQI << shift) | path));
    }
}

fn rtt_fields(out: &mut Vec<Field>, sounding: bool) {
    out.push(field(1, mode1::QUALITY));
    out.push(field(1, mode1::NADM));
    out.push(field(1, mode1::RSSI));
    out.push(field(2, mode1::TOA_TOD));
    out.push(field(1, mode1::ANTENNA));
    if sounding {
        out.push(field(4, mode1::PCT1));
        out.push(field(4, mode1::PCT2));
    }
}

/// Ordered fields of one step's result data.
pub fn step_fields(mode: u8, ctx: &StepContext) -> Result<Vec<Field>> {
    if ctx.num_antenna_paths == 0 || ctx.num_antenna_paths > 4 {
        return Err(RasError::InvalidLength(format!(
            "{} antenna paths",
            ctx.num_antenna_paths
        )));
    }
    let mut f = Vec::new();
    match mode {
        0 => {
            f.push(field(1, mode0::QUALITY));
            f.push(field(1, mode0::RSSI));
            f.push(field(1, mode0::ANTENNA));
            if ctx.role == CsRole::Initiator {
                f.push(field(2, mode0::FREQ_OFFSET));
            }
        }
        1 => rtt_fields(&mut f, ctx.sounding_sequence),
        2 => tone_fields(&mut f, ctx.num_antenna_paths, 0),
        3 => {
            rtt_fields(&mut f, ctx.sounding_sequence);
            tone_fields(&mut f, ctx.num_antenna_paths, MODE3_TONE_SHIFT);
        }
        other => return Err(RasError::InvalidLength(format!("unknown step mode {}", other))),
    }
    Ok(f)
}

/// Unfiltered result length of a step.
pub fn step_data_len(mode: u8, ctx: &StepContext) -> Result<usize> {
    Ok(step_fields(mode, ctx)?.iter().map(|f| f.len).sum())
}

/// Result length of a step on the wire under `mask`.
pub fn packed_len(mode: u8, ctx: &StepContext, mask: u16) -> Result<usize> {
    Ok(step_fields(mode, ctx)?
        .iter()
        .filter(|f| f.requires & mask == f.requires)
        .map(|f| f.len)
        .sum())
}

/// Drop filtered fields from a full step result.
pub fn pack_step(mode: u8, ctx: &StepContext, mask: u16, data: &[u8]) -> Result<Vec<u8>> {
    let fields = step_fields(mode, ctx)?;
    let full: usize = fields.iter().map(|f| f.len).sum();
    if data.len() != full {
        return Err(RasError::InvalidLength(format!(
            "mode {} step has {} bytes, layout needs {}",
            mode,
            data.len(),
            full
        )));
    }
    let mut out = Vec::with_capacity(full);
    let mut pos = 0;
    for f in &fields {
        if f.requires & mask == f.requires {
            out.extend_from_slice(&data[pos..pos + f.len]);
        }
        pos += f.len;
    }
    Ok(out)
}

/// Rebuild a full step result from its packed form, filling filtered fields
/// with `FILTER_UNPACK_FILLER`. Returns the result and the bytes consumed.
pub fn unpack_step(mode: u8, ctx: &StepContext, mask: u16, packed: &[u8]) -> Result<(Vec<u8>, usize)> {
    let fields = step_fields(mode, ctx)?;
    let mut out = Vec::with_capacity(fields.iter().map(|f| f.len).sum());
    let mut pos = 0;
    for f in &fields {
        if f.requires & mask == f.requires {
            if pos + f.len > packed.len() {
                return Err(RasError::Truncated {
                    what: "step data",
                    need: pos + f.len,
                    have: packed.len(),
                });
            }
            out.extend_from_slice(&packed[pos..pos + f.len]);
            pos += f.len;
        } else {
            out.extend(std::iter::repeat(FILTER_UNPACK_FILLER).take(f.len));
        }
    }
    Ok((out, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: CsRole, n_ap: u8, sounding: bool) -> StepContext {
        StepContext {
            role,
            num_antenna_paths: n_ap,
            sounding_sequence: sounding,
        }
    }

    #[test]
    fn test_step_lengths() {
        assert_eq!(step_data_len(0, &ctx(CsRole::Initiator, 1, false)).unwrap(), 5);
        assert_eq!(step_data_len(0, &ctx(CsRole::Reflector, 1, false)).unwrap(), 3);
        assert_eq!(step_data_len(1, &ctx(CsRole::Reflector, 1, false)).unwrap(), 6);
        assert_eq!(step_data_len(1, &ctx(CsRole::Reflector, 1, true)).unwrap(), 14);
        assert_eq!(step_data_len(2, &ctx(CsRole::Reflector, 1, false)).unwrap(), 9);
        assert_eq!(step_data_len(2, &ctx(CsRole::Reflector, 4, false)).unwrap(), 21);
        assert_eq!(step_data_len(3, &ctx(CsRole::Reflector, 2, true)).unwrap(), 14 + 13);
        assert!(step_data_len(4, &ctx(CsRole::Reflector, 1, false)).is_err());
        assert!(step_data_len(2, &ctx(CsRole::Reflector, 0, false)).is_err());
    }

    #[test]
    fn test_mode1_filter_strips_and_refills() {
        let c = ctx(CsRole::Reflector, 1, false);
        let data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let mask = mode1::ALL & !mode1::NADM & !mode1::TOA_TOD;
        let packed = pack_step(1, &c, mask, &data).unwrap();
        assert_eq!(packed, vec![0x11, 0x33, 0x66]);
        assert_eq!(packed_len(1, &c, mask).unwrap(), 3);
        let (full, used) = unpack_step(1, &c, mask, &packed).unwrap();
        assert_eq!(used, 3);
        assert_eq!(full, vec![0x11, 0xFF, 0x33, 0xFF, 0xFF, 0x66]);
    }

    #[test]
    fn test_mode2_path_filter_keeps_extension_tone() {
        let c = ctx(CsRole::Initiator, 2, false);
        // api, then (pct, tqi) for path 0, path 1, extension
        let data = [9, 1, 1, 1, 10, 2, 2, 2, 20, 3, 3, 3, 30];
        let mask = mode2::ALL & !mode2::path(1);
        let packed = pack_step(2, &c, mask, &data).unwrap();
        assert_eq!(packed, vec![9, 1, 1, 1, 10, 3, 3, 3, 30]);
        let (full, _) = unpack_step(2, &c, mask, &packed).unwrap();
        assert_eq!(full, vec![9, 1, 1, 1, 10, 0xFF, 0xFF, 0xFF, 0xFF, 3, 3, 3, 30]);

        // Without the TQI bit every tone loses its TQI, the extension included
        let packed = pack_step(2, &c, mode2::ALL & !mode2::TQI, &data).unwrap();
        assert_eq!(packed, vec![9, 1, 1, 1, 2, 2, 2, 3, 3, 3]);
    }

    #[test]
    fn test_mode3_tone_bits_shifted() {
        let c = ctx(CsRole::Reflector, 1, false);
        let data: Vec<u8> = (0..15).collect();
        let mask = MODE3_ALL & !(mode2::API << MODE3_TONE_SHIFT);
        let packed = pack_step(3, &c, mask, &data).unwrap();
        assert_eq!(packed.len(), 14);
        assert_eq!(packed[6], 7);
        let (full, _) = unpack_step(3, &c, mask, &packed).unwrap();
        assert_eq!(full[6], FILTER_UNPACK_FILLER);
        assert_eq!(&full[7..], &data[7..]);
    }

    #[test]
    fn test_pack_rejects_wrong_length() {
        let c = ctx(CsRole::Reflector, 1, false);
        assert!(pack_step(0, &c, mode0::ALL, &[1, 2]).is_err());
        assert!(unpack_step(0, &c, mode0::ALL, &[1, 2]).is_err());
    }
}
