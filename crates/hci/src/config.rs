// Copyright 2025-2026 CEMAXECUTER LLC

//! CS configuration as reported by the controller.

use serde::{Deserialize, Serialize};

use crate::error::{HciError, Result};

/// Channel indices that may never be used for CS.
pub const RESERVED_CHANNELS: [u8; 7] = [0, 1, 23, 24, 25, 77, 78];
/// Number of CS channel indices (0..=78).
pub const CS_CHANNEL_COUNT: u8 = 79;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CsRole {
    Initiator = 0,
    Reflector = 1,
}

impl CsRole {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(CsRole::Initiator),
            1 => Ok(CsRole::Reflector),
            _ => Err(HciError::InvalidField { field: "role", value: v as u32 }),
        }
    }
}

/// Round-trip timing variant of mode 1 steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RttType {
    AaOnly = 0,
    Sounding32 = 1,
    Sounding96 = 2,
    Random32 = 3,
    Random64 = 4,
    Random96 = 5,
    Random128 = 6,
}

impl RttType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => RttType::AaOnly,
            1 => RttType::Sounding32,
            2 => RttType::Sounding96,
            3 => RttType::Random32,
            4 => RttType::Random64,
            5 => RttType::Random96,
            6 => RttType::Random128,
            _ => return Err(HciError::InvalidField { field: "RTT type", value: v as u32 }),
        })
    }

    /// Mode 1 steps carry the sounding-sequence phase correction terms.
    pub fn has_sounding_sequence(self) -> bool {
        matches!(self, RttType::Sounding32 | RttType::Sounding96)
    }
}

/// One CS configuration of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsConfig {
    pub config_id: u8,
    pub main_mode_type: u8,
    pub sub_mode_type: u8,
    pub min_main_mode_steps: u8,
    pub max_main_mode_steps: u8,
    pub main_mode_repetition: u8,
    pub mode_0_steps: u8,
    pub role: CsRole,
    pub rtt_type: RttType,
    pub cs_sync_phy: u8,
    pub channel_map: [u8; 10],
    pub channel_map_repetition: u8,
    pub channel_selection_type: u8,
    pub ch3c_shape: u8,
    pub ch3c_jump: u8,
    pub t_ip1_us: u8,
    pub t_ip2_us: u8,
    pub t_fcs_us: u8,
    pub t_pm_us: u8,
}

impl CsConfig {
    /// Enabled channel indices in ascending order, reserved ones removed.
    pub fn channels(&self) -> Vec<u8> {
        channels_from_map(&self.channel_map)
    }
}

/// Expand a 10-byte CS channel map (bit n = channel n, LSB first).
pub fn channels_from_map(map: &[u8; 10]) -> Vec<u8> {
    (0..CS_CHANNEL_COUNT)
        .filter(|ch| map[*ch as usize / 8] & (1 << (ch % 8)) != 0)
        .filter(|ch| !RESERVED_CHANNELS.contains(ch))
        .collect()
}

/// Number of antenna paths for a tone antenna configuration index.
pub fn antenna_paths_for_aci(aci: u8) -> Result<u8> {
    match aci {
        0 => Ok(1),
        1 | 4 => Ok(2),
        2 | 5 => Ok(3),
        3 | 6 | 7 => Ok(4),
        _ => Err(HciError::InvalidField { field: "antenna config index", value: aci as u32 }),
    }
}
