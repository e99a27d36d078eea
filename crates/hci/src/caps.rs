// Copyright 2025-2026 CEMAXECUTER LLC

use serde::{Deserialize, Serialize};

use crate::config::CsRole;
use crate::error::Result;
use crate::reader::Reader;

/// Channel Sounding capabilities of one side of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsCapabilities {
    pub num_config_supported: u8,
    pub max_consecutive_procedures: u16,
    pub num_antennas: u8,
    pub max_antenna_paths: u8,
    /// Bit 0 initiator, bit 1 reflector.
    pub roles_supported: u8,
    pub modes_supported: u8,
    pub rtt_capability: u8,
    pub rtt_aa_only_n: u8,
    pub rtt_sounding_n: u8,
    pub rtt_random_payload_n: u8,
    pub nadm_sounding: u16,
    pub nadm_random: u16,
    pub cs_sync_phys: u8,
    pub subfeatures: u16,
    pub t_ip1_times: u16,
    pub t_ip2_times: u16,
    pub t_fcs_times: u16,
    pub t_pm_times: u16,
    pub t_sw_time: u8,
    pub tx_snr_capability: u8,
}

/// Encoded size of the capability block.
pub const CAPS_LEN: usize = 28;

impl CsCapabilities {
    pub fn supports_role(&self, role: CsRole) -> bool {
        self.roles_supported & (1 << role as u8) != 0
    }

    /// Mode 3 is the only optional main mode (bit 0 of the modes field).
    pub fn supports_mode3(&self) -> bool {
        self.modes_supported & 0x01 != 0
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self> {
        Ok(Self {
            num_config_supported: r.u8()?,
            max_consecutive_procedures: r.u16()?,
            num_antennas: r.u8()?,
            max_antenna_paths: r.u8()?,
            roles_supported: r.u8()?,
            modes_supported: r.u8()?,
            rtt_capability: r.u8()?,
            rtt_aa_only_n: r.u8()?,
            rtt_sounding_n: r.u8()?,
            rtt_random_payload_n: r.u8()?,
            nadm_sounding: r.u16()?,
            nadm_random: r.u16()?,
            cs_sync_phys: r.u8()?,
            subfeatures: r.u16()?,
            t_ip1_times: r.u16()?,
            t_ip2_times: r.u16()?,
            t_fcs_times: r.u16()?,
            t_pm_times: r.u16()?,
            t_sw_time: r.u8()?,
            tx_snr_capability: r.u8()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(CAPS_LEN);
        b.push(self.num_config_supported);
        b.extend_from_slice(&self.max_consecutive_procedures.to_le_bytes());
        b.extend_from_slice(&[
            self.num_antennas,
            self.max_antenna_paths,
            self.roles_supported,
            self.modes_supported,
            self.rtt_capability,
            self.rtt_aa_only_n,
            self.rtt_sounding_n,
            self.rtt_random_payload_n,
        ]);
        b.extend_from_slice(&self.nadm_sounding.to_le_bytes());
        b.extend_from_slice(&self.nadm_random.to_le_bytes());
        b.push(self.cs_sync_phys);
        for v in [
            self.subfeatures,
            self.t_ip1_times,
            self.t_ip2_times,
            self.t_fcs_times,
            self.t_pm_times,
        ] {
            b.extend_from_slice(&v.to_le_bytes());
        }
        b.push(self.t_sw_time);
        b.push(self.tx_snr_capability);
        b
    }
}
