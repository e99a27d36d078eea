// Copyright 2025-2026 CEMAXECUTER LLC

//! Per-channel calibration table, loaded once from its flash image.

use num_complex::Complex64;

use crate::error::{check_max_len, DspError, Result};
use crate::prim::fixed_to_f64;
use crate::MAX_CHANNEL_NUM;

/// Fractional bits of the stored compensation phasors.
pub const CALI_FRAC_BITS: u32 = 12;
const ENTRY_LEN: usize = 4;

/// Complex compensation per CS channel index. Unprogrammed channels are unity.
#[derive(Debug, Clone, PartialEq)]
pub struct CaliTable {
    entries: Vec<Complex64>,
}

impl CaliTable {
    pub fn unity() -> Self {
        Self {
            entries: vec![Complex64::new(1.0, 0.0); MAX_CHANNEL_NUM],
        }
    }

    /// Parse the flash image: little-endian `(i16 I, i16 Q)` in Q12 per
    /// channel, starting at channel 0. Erased entries (`0xFFFF, 0xFFFF`) and
    /// channels past the end of the image stay at unity.
    pub fn from_bytes(image: &[u8]) -> Result<Self> {
        check_max_len(image.len(), MAX_CHANNEL_NUM * ENTRY_LEN)?;
        if image.len() % ENTRY_LEN != 0 {
            return Err(DspError::InvalidArgument(format!(
                "calibration image length {} is not a multiple of {}",
                image.len(),
                ENTRY_LEN
            )));
        }
        let mut table = Self::unity();
        for (ch, chunk) in image.chunks_exact(ENTRY_LEN).enumerate() {
            if chunk.iter().all(|&b| b == 0xFF) {
                continue;
            }
            let i = i16::from_le_bytes([chunk[0], chunk[1]]);
            let q = i16::from_le_bytes([chunk[2], chunk[3]]);
            table.entries[ch] = Complex64::new(
                fixed_to_f64(i as i32, CALI_FRAC_BITS),
                fixed_to_f64(q as i32, CALI_FRAC_BITS),
            );
        }
        log::debug!("loaded calibration for {} channels", image.len() / ENTRY_LEN);
        Ok(table)
    }

    /// Compensation for `channel`; unity outside the table.
    pub fn get(&self, channel: u8) -> Complex64 {
        self.entries
            .get(channel as usize)
            .copied()
            .unwrap_or(Complex64::new(1.0, 0.0))
    }

    /// Compensation for an ordered channel plan.
    pub fn for_channels(&self, channels: &[u8]) -> Vec<Complex64> {
        channels.iter().map(|&ch| self.get(ch)).collect()
    }
}

impl Default for CaliTable {
    fn default() -> Self {
        Self::unity()
    }
}
