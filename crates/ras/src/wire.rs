// Copyright 2025-2026 CEMAXECUTER LLC

//! Fixed-layout headers of the ranging data stream.

use byteorder::{ByteOrder, LittleEndian};
use cs_hci::DoneStatus;
use serde::Serialize;

use crate::error::{need, Result};

/// Procedure counters on the wire are 12 bits wide.
pub const RANGING_COUNTER_MASK: u16 = 0x0FFF;

/// Leading header of one procedure's ranging data.
///
/// ```text
///  byte 0-1  ranging counter [11:0] | config id [15:12]   (LE)
///  byte 2    selected TX power (dBm, signed)
///  byte 3    antenna paths mask
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RangingHeader {
    pub ranging_counter: u16,
    pub config_id: u8,
    pub selected_tx_power: i8,
    pub antenna_paths_mask: u8,
}

impl RangingHeader {
    pub const LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];
        let word = (self.ranging_counter & RANGING_COUNTER_MASK) | ((self.config_id as u16 & 0x0F) << 12);
        LittleEndian::write_u16(&mut b[0..2], word);
        b[2] = self.selected_tx_power as u8;
        b[3] = self.antenna_paths_mask;
        b
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need("ranging header", buf, Self::LEN)?;
        let word = LittleEndian::read_u16(&buf[0..2]);
        Ok(Self {
            ranging_counter: word & RANGING_COUNTER_MASK,
            config_id: (word >> 12) as u8,
            selected_tx_power: buf[2] as i8,
            antenna_paths_mask: buf[3],
        })
    }

    pub fn num_antenna_paths(&self) -> u8 {
        (self.antenna_paths_mask & 0x0F).count_ones() as u8
    }
}

/// Header in front of each subevent's steps.
///
/// ```text
///  byte 0-1  start ACL connection event counter (LE)
///  byte 2-3  frequency compensation (LE, signed, 0.01 ppm)
///  byte 4    ranging done status [3:0] | subevent done status [7:4]
///  byte 5    ranging abort reason [3:0] | subevent abort reason [7:4]
///  byte 6    reference power level (dBm, signed)
///  byte 7    number of steps reported
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubeventHeader {
    pub start_acl_conn_event: u16,
    pub frequency_compensation: i16,
    pub ranging_done: DoneStatus,
    pub subevent_done: DoneStatus,
    pub ranging_abort: u8,
    pub subevent_abort: u8,
    pub reference_power_level: i8,
    pub num_steps_reported: u8,
}

impl SubeventHeader {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];
        LittleEndian::write_u16(&mut b[0..2], self.start_acl_conn_event);
        LittleEndian::write_i16(&mut b[2..4], self.frequency_compensation);
        b[4] = (self.ranging_done as u8 & 0x0F) | ((self.subevent_done as u8 & 0x0F) << 4);
        b[5] = (self.ranging_abort & 0x0F) | ((self.subevent_abort & 0x0F) << 4);
        b[6] = self.reference_power_level as u8;
        b[7] = self.num_steps_reported;
        b
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need("subevent header", buf, Self::LEN)?;
        Ok(Self {
            start_acl_conn_event: LittleEndian::read_u16(&buf[0..2]),
            frequency_compensation: LittleEndian::read_i16(&buf[2..4]),
            ranging_done: DoneStatus::from_nibble(buf[4] & 0x0F)?,
            subevent_done: DoneStatus::from_nibble(buf[4] >> 4)?,
            ranging_abort: buf[5] & 0x0F,
            subevent_abort: buf[5] >> 4,
            reference_power_level: buf[6] as i8,
            num_steps_reported: buf[7],
        })
    }
}

/// Width of the rolling segment counter.
pub const SEGMENT_COUNTER_MODULO: u32 = 64;

/// One-byte header of every ranging data segment.
///
/// ```text
///  bit 0     first segment
///  bit 1     last segment
///  bit 2-7   rolling segment counter
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentHeader {
    pub first: bool,
    pub last: bool,
    pub counter: u8,
}

impl SegmentHeader {
    pub fn encode(&self) -> u8 {
        (self.first as u8) | ((self.last as u8) << 1) | ((self.counter & 0x3F) << 2)
    }

    pub fn decode(b: u8) -> Self {
        Self {
            first: b & 0x01 != 0,
            last: b & 0x02 != 0,
            counter: b >> 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranging_header_layout() {
        let h = RangingHeader {
            ranging_counter: 0x0ABC,
            config_id: 0x3,
            selected_tx_power: -5,
            antenna_paths_mask: 0b0011,
        };
        assert_eq!(h.encode(), [0xBC, 0x3A, 0xFB, 0x03]);
        assert_eq!(RangingHeader::decode(&h.encode()).unwrap(), h);
        assert_eq!(h.num_antenna_paths(), 2);
        assert!(RangingHeader::decode(&[0; 3]).is_err());
    }

    #[test]
    fn test_counter_truncated_to_12_bits() {
        let h = RangingHeader {
            ranging_counter: 0x1001,
            config_id: 0,
            selected_tx_power: 0,
            antenna_paths_mask: 1,
        };
        assert_eq!(RangingHeader::decode(&h.encode()).unwrap().ranging_counter, 0x001);
    }

    #[test]
    fn test_subevent_header_layout() {
        let h = SubeventHeader {
            start_acl_conn_event: 0x0102,
            frequency_compensation: -2,
            ranging_done: DoneStatus::Partial,
            subevent_done: DoneStatus::Aborted,
            ranging_abort: 0x0,
            subevent_abort: 0x2,
            reference_power_level: -30,
            num_steps_reported: 12,
        };
        let b = h.encode();
        assert_eq!(b, [0x02, 0x01, 0xFE, 0xFF, 0xF1, 0x20, 0xE2, 12]);
        assert_eq!(SubeventHeader::decode(&b).unwrap(), h);
    }

    #[test]
    fn test_segment_header_bits() {
        let h = SegmentHeader { first: true, last: false, counter: 63 };
        assert_eq!(h.encode(), 0xFD);
        assert_eq!(SegmentHeader::decode(0xFD), h);
        assert_eq!(SegmentHeader::decode(0x06), SegmentHeader { first: false, last: true, counter: 1 });
    }
}
