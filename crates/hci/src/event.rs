// Copyright 2025-2026 CEMAXECUTER LLC

//! LE Channel Sounding meta events.
//!
//! `parse_cs_event` takes the LE meta event parameters starting at the
//! subevent code; `parse_hci_event` takes a whole HCI event packet.

use serde::{Deserialize, Serialize};

use crate::caps::CsCapabilities;
use crate::config::{CsConfig, CsRole, RttType};
use crate::error::{HciError, Result};
use crate::reader::Reader;

pub const HCI_EVENT_DISCONNECTION_COMPLETE: u8 = 0x05;
pub const HCI_EVENT_LE_META: u8 = 0x3E;

pub const LE_CS_READ_REMOTE_CAPS_COMPLETE: u8 = 0x2C;
pub const LE_CS_READ_REMOTE_FAE_COMPLETE: u8 = 0x2D;
pub const LE_CS_SECURITY_ENABLE_COMPLETE: u8 = 0x2E;
pub const LE_CS_CONFIG_COMPLETE: u8 = 0x2F;
pub const LE_CS_PROCEDURE_ENABLE_COMPLETE: u8 = 0x30;
pub const LE_CS_SUBEVENT_RESULT: u8 = 0x31;
pub const LE_CS_SUBEVENT_RESULT_CONTINUE: u8 = 0x32;

/// Number of entries of a frequency actuation error table.
pub const FAE_TABLE_LEN: usize = 72;

/// Procedure / subevent done status nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoneStatus {
    AllComplete = 0x0,
    Partial = 0x1,
    Aborted = 0xF,
}

impl DoneStatus {
    pub fn from_nibble(v: u8) -> Result<Self> {
        match v & 0x0F {
            0x0 => Ok(DoneStatus::AllComplete),
            0x1 => Ok(DoneStatus::Partial),
            0xF => Ok(DoneStatus::Aborted),
            other => Err(HciError::InvalidField { field: "done status", value: other as u32 }),
        }
    }

    /// No more results will follow.
    pub fn is_final(self) -> bool {
        self != DoneStatus::Partial
    }
}

/// Abort reasons: procedure in the low nibble, subevent in the high nibble.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReasons {
    pub procedure: u8,
    pub subevent: u8,
}

impl AbortReasons {
    pub fn from_byte(b: u8) -> Self {
        Self {
            procedure: b & 0x0F,
            subevent: b >> 4,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.procedure & 0x0F) | (self.subevent << 4)
    }
}

/// One reported step: mode, channel and the mode-specific result bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsStep {
    pub mode: u8,
    pub channel: u8,
    pub data: Vec<u8>,
}

fn read_steps(r: &mut Reader, n: u8) -> Result<Vec<CsStep>> {
    let mut steps = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let mode = r.u8()?;
        let channel = r.u8()?;
        let len = r.u8()?;
        let data = r.bytes(len as usize)?.to_vec();
        steps.push(CsStep { mode, channel, data });
    }
    Ok(steps)
}

fn write_steps(out: &mut Vec<u8>, steps: &[CsStep]) {
    for s in steps {
        out.push(s.mode);
        out.push(s.channel);
        out.push(s.data.len() as u8);
        out.extend_from_slice(&s.data);
    }
}

/// LE CS Subevent Result: first report of a subevent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubeventResult {
    pub handle: u16,
    pub config_id: u8,
    pub start_acl_conn_event: u16,
    pub procedure_counter: u16,
    pub frequency_compensation: i16,
    pub reference_power_level: i8,
    pub procedure_done: DoneStatus,
    pub subevent_done: DoneStatus,
    pub abort: AbortReasons,
    pub num_antenna_paths: u8,
    pub steps: Vec<CsStep>,
}

impl SubeventResult {
    fn read(r: &mut Reader) -> Result<Self> {
        let handle = r.u16()? & 0x0FFF;
        let config_id = r.u8()?;
        let start_acl_conn_event = r.u16()?;
        let procedure_counter = r.u16()?;
        let frequency_compensation = r.i16()?;
        let reference_power_level = r.i8()?;
        let procedure_done = DoneStatus::from_nibble(r.u8()?)?;
        let subevent_done = DoneStatus::from_nibble(r.u8()?)?;
        let abort = AbortReasons::from_byte(r.u8()?);
        let num_antenna_paths = r.u8()?;
        let num_steps = r.u8()?;
        let steps = read_steps(r, num_steps)?;
        Ok(Self {
            handle,
            config_id,
            start_acl_conn_event,
            procedure_counter,
            frequency_compensation,
            reference_power_level,
            procedure_done,
            subevent_done,
            abort,
            num_antenna_paths,
            steps,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = vec![LE_CS_SUBEVENT_RESULT];
        b.extend_from_slice(&self.handle.to_le_bytes());
        b.push(self.config_id);
        b.extend_from_slice(&self.start_acl_conn_event.to_le_bytes());
        b.extend_from_slice(&self.procedure_counter.to_le_bytes());
        b.extend_from_slice(&self.frequency_compensation.to_le_bytes());
        b.push(self.reference_power_level as u8);
        b.push(self.procedure_done as u8);
        b.push(self.subevent_done as u8);
        b.push(self.abort.to_byte());
        b.push(self.num_antenna_paths);
        b.push(self.steps.len() as u8);
        write_steps(&mut b, &self.steps);
        b
    }
}

/// LE CS Subevent Result Continue: more steps of the current subevent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubeventResultContinue {
    pub handle: u16,
    pub config_id: u8,
    pub procedure_done: DoneStatus,
    pub subevent_done: DoneStatus,
    pub abort: AbortReasons,
    pub num_antenna_paths: u8,
    pub steps: Vec<CsStep>,
}

impl SubeventResultContinue {
    fn read(r: &mut Reader) -> Result<Self> {
        let handle = r.u16()? & 0x0FFF;
        let config_id = r.u8()?;
        let procedure_done = DoneStatus::from_nibble(r.u8()?)?;
        let subevent_done = DoneStatus::from_nibble(r.u8()?)?;
        let abort = AbortReasons::from_byte(r.u8()?);
        let num_antenna_paths = r.u8()?;
        let num_steps = r.u8()?;
        let steps = read_steps(r, num_steps)?;
        Ok(Self {
            handle,
            config_id,
            procedure_done,
            subevent_done,
            abort,
            num_antenna_paths,
            steps,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = vec![LE_CS_SUBEVENT_RESULT_CONTINUE];
        b.extend_from_slice(&self.handle.to_le_bytes());
        b.push(self.config_id);
        b.push(self.procedure_done as u8);
        b.push(self.subevent_done as u8);
        b.push(self.abort.to_byte());
        b.push(self.num_antenna_paths);
        b.push(self.steps.len() as u8);
        write_steps(&mut b, &self.steps);
        b
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigComplete {
    pub status: u8,
    pub handle: u16,
    /// 0 removed, 1 created.
    pub action: u8,
    pub config: CsConfig,
}

impl ConfigComplete {
    fn read(r: &mut Reader) -> Result<Self> {
        let status = r.u8()?;
        let handle = r.u16()? & 0x0FFF;
        let config_id = r.u8()?;
        let action = r.u8()?;
        let config = CsConfig {
            config_id,
            main_mode_type: r.u8()?,
            sub_mode_type: r.u8()?,
            min_main_mode_steps: r.u8()?,
            max_main_mode_steps: r.u8()?,
            main_mode_repetition: r.u8()?,
            mode_0_steps: r.u8()?,
            role: CsRole::from_u8(r.u8()?)?,
            rtt_type: RttType::from_u8(r.u8()?)?,
            cs_sync_phy: r.u8()?,
            channel_map: r.array::<10>()?,
            channel_map_repetition: r.u8()?,
            channel_selection_type: r.u8()?,
            ch3c_shape: r.u8()?,
            ch3c_jump: r.u8()?,
            t_ip1_us: {
                // reserved octet precedes the timing fields
                r.u8()?;
                r.u8()?
            },
            t_ip2_us: r.u8()?,
            t_fcs_us: r.u8()?,
            t_pm_us: r.u8()?,
        };
        Ok(Self {
            status,
            handle,
            action,
            config,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let c = &self.config;
        let mut b = vec![LE_CS_CONFIG_COMPLETE, self.status];
        b.extend_from_slice(&self.handle.to_le_bytes());
        b.extend_from_slice(&[
            c.config_id,
            self.action,
            c.main_mode_type,
            c.sub_mode_type,
            c.min_main_mode_steps,
            c.max_main_mode_steps,
            c.main_mode_repetition,
            c.mode_0_steps,
            c.role as u8,
            c.rtt_type as u8,
            c.cs_sync_phy,
        ]);
        b.extend_from_slice(&c.channel_map);
        b.extend_from_slice(&[
            c.channel_map_repetition,
            c.channel_selection_type,
            c.ch3c_shape,
            c.ch3c_jump,
            0,
            c.t_ip1_us,
            c.t_ip2_us,
            c.t_fcs_us,
            c.t_pm_us,
        ]);
        b
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureEnableComplete {
    pub status: u8,
    pub handle: u16,
    pub config_id: u8,
    /// 0 disabled, 1 enabled.
    pub state: u8,
    pub tone_antenna_config: u8,
    pub selected_tx_power: i8,
    pub subevent_len_us: u32,
    pub subevents_per_event: u8,
    pub subevent_interval: u16,
    pub event_interval: u16,
    pub procedure_interval: u16,
    pub procedure_count: u16,
    pub max_procedure_len: u16,
}

impl ProcedureEnableComplete {
    fn read(r: &mut Reader) -> Result<Self> {
        Ok(Self {
            status: r.u8()?,
            handle: r.u16()? & 0x0FFF,
            config_id: r.u8()?,
            state: r.u8()?,
            tone_antenna_config: r.u8()?,
            selected_tx_power: r.i8()?,
            subevent_len_us: r.u24()?,
            subevents_per_event: r.u8()?,
            subevent_interval: r.u16()?,
            event_interval: r.u16()?,
            procedure_interval: r.u16()?,
            procedure_count: r.u16()?,
            max_procedure_len: r.u16()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = vec![LE_CS_PROCEDURE_ENABLE_COMPLETE, self.status];
        b.extend_from_slice(&self.handle.to_le_bytes());
        b.extend_from_slice(&[
            self.config_id,
            self.state,
            self.tone_antenna_config,
            self.selected_tx_power as u8,
        ]);
        b.extend_from_slice(&self.subevent_len_us.to_le_bytes()[..3]);
        b.push(self.subevents_per_event);
        for v in [
            self.subevent_interval,
            self.event_interval,
            self.procedure_interval,
            self.procedure_count,
            self.max_procedure_len,
        ] {
            b.extend_from_slice(&v.to_le_bytes());
        }
        b
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCapsComplete {
    pub status: u8,
    pub handle: u16,
    pub caps: CsCapabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFaeComplete {
    pub status: u8,
    pub handle: u16,
    pub table: Vec<i8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEnableComplete {
    pub status: u8,
    pub handle: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectionComplete {
    pub status: u8,
    pub handle: u16,
    pub reason: u8,
}

/// HCI events the ranging stack consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HciEvent {
    Disconnection(DisconnectionComplete),
    Cs(CsEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsEvent {
    RemoteCaps(RemoteCapsComplete),
    RemoteFae(RemoteFaeComplete),
    SecurityEnable(SecurityEnableComplete),
    Config(ConfigComplete),
    ProcedureEnable(ProcedureEnableComplete),
    SubeventResult(SubeventResult),
    SubeventResultContinue(SubeventResultContinue),
}

impl CsEvent {
    pub fn handle(&self) -> u16 {
        match self {
            CsEvent::RemoteCaps(e) => e.handle,
            CsEvent::RemoteFae(e) => e.handle,
            CsEvent::SecurityEnable(e) => e.handle,
            CsEvent::Config(e) => e.handle,
            CsEvent::ProcedureEnable(e) => e.handle,
            CsEvent::SubeventResult(e) => e.handle,
            CsEvent::SubeventResultContinue(e) => e.handle,
        }
    }
}

/// Parse one LE CS meta event; `buf[0]` is the subevent code.
pub fn parse_cs_event(buf: &[u8]) -> Result<CsEvent> {
    let mut r = Reader::new(buf, "LE CS event");
    let code = r.u8()?;
    let ev = match code {
        LE_CS_READ_REMOTE_CAPS_COMPLETE => {
            let status = r.u8()?;
            let handle = r.u16()? & 0x0FFF;
            let caps = CsCapabilities::read(&mut r)?;
            CsEvent::RemoteCaps(RemoteCapsComplete { status, handle, caps })
        }
        LE_CS_READ_REMOTE_FAE_COMPLETE => {
            let status = r.u8()?;
            let handle = r.u16()? & 0x0FFF;
            let table = r.bytes(FAE_TABLE_LEN)?.iter().map(|&b| b as i8).collect();
            CsEvent::RemoteFae(RemoteFaeComplete { status, handle, table })
        }
        LE_CS_SECURITY_ENABLE_COMPLETE => {
            let status = r.u8()?;
            let handle = r.u16()? & 0x0FFF;
            CsEvent::SecurityEnable(SecurityEnableComplete { status, handle })
        }
        LE_CS_CONFIG_COMPLETE => CsEvent::Config(ConfigComplete::read(&mut r)?),
        LE_CS_PROCEDURE_ENABLE_COMPLETE => CsEvent::ProcedureEnable(ProcedureEnableComplete::read(&mut r)?),
        LE_CS_SUBEVENT_RESULT => CsEvent::SubeventResult(SubeventResult::read(&mut r)?),
        LE_CS_SUBEVENT_RESULT_CONTINUE => CsEvent::SubeventResultContinue(SubeventResultContinue::read(&mut r)?),
        other => {
            return Err(HciError::InvalidField {
                field: "CS subevent code",
                value: other as u32,
            })
        }
    };
    if r.remaining() != 0 {
        log::debug!("{} trailing bytes after CS event {:#04x}", r.remaining(), code);
    }
    Ok(ev)
}

/// Parse an HCI event packet: event code, parameter length, parameters.
pub fn parse_hci_event(buf: &[u8]) -> Result<HciEvent> {
    let mut r = Reader::new(buf, "HCI event");
    let code = r.u8()?;
    let len = r.u8()? as usize;
    let params = r.bytes(len)?;
    match code {
        HCI_EVENT_DISCONNECTION_COMPLETE => {
            let mut p = Reader::new(params, "Disconnection Complete");
            let status = p.u8()?;
            let handle = p.u16()? & 0x0FFF;
            let reason = p.u8()?;
            Ok(HciEvent::Disconnection(DisconnectionComplete { status, handle, reason }))
        }
        HCI_EVENT_LE_META => parse_cs_event(params).map(HciEvent::Cs),
        other => Err(HciError::InvalidField {
            field: "HCI event code",
            value: other as u32,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> SubeventResult {
        SubeventResult {
            handle: 0x0040,
            config_id: 2,
            start_acl_conn_event: 0x1234,
            procedure_counter: 0x0ABC,
            frequency_compensation: -100,
            reference_power_level: -20,
            procedure_done: DoneStatus::Partial,
            subevent_done: DoneStatus::AllComplete,
            abort: AbortReasons { procedure: 0, subevent: 0 },
            num_antenna_paths: 1,
            steps: vec![
                CsStep { mode: 0, channel: 10, data: vec![1, 2, 3] },
                CsStep { mode: 2, channel: 40, data: vec![0, 9, 8, 7, 6, 5, 4, 3, 2] },
            ],
        }
    }

    #[test]
    fn test_subevent_result_layout() {
        let b = result().to_bytes();
        assert_eq!(b[0], LE_CS_SUBEVENT_RESULT);
        assert_eq!(&b[1..3], &[0x40, 0x00]);
        assert_eq!(&b[6..8], &[0xBC, 0x0A]);
        // mode, channel, length of the first step
        assert_eq!(&b[16..19], &[0, 10, 3]);
        match parse_cs_event(&b).unwrap() {
            CsEvent::SubeventResult(ev) => assert_eq!(ev, result()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_continue_event() {
        let ev = SubeventResultContinue {
            handle: 1,
            config_id: 0,
            procedure_done: DoneStatus::AllComplete,
            subevent_done: DoneStatus::Aborted,
            abort: AbortReasons { procedure: 0x0, subevent: 0x3 },
            num_antenna_paths: 2,
            steps: vec![CsStep { mode: 1, channel: 5, data: vec![0; 6] }],
        };
        let b = ev.to_bytes();
        assert_eq!(b[6], 0x30);
        assert_eq!(parse_cs_event(&b).unwrap(), CsEvent::SubeventResultContinue(ev));
    }

    #[test]
    fn test_truncated_step_rejected() {
        let mut b = result().to_bytes();
        b.pop();
        assert!(matches!(parse_cs_event(&b), Err(HciError::Truncated { .. })));
    }

    #[test]
    fn test_bad_done_status_rejected() {
        let mut b = result().to_bytes();
        b[11] = 0x05;
        assert!(matches!(
            parse_cs_event(&b),
            Err(HciError::InvalidField { field: "done status", .. })
        ));
    }

    #[test]
    fn test_config_complete_round_trip() {
        let ev = ConfigComplete {
            status: 0,
            handle: 3,
            action: 1,
            config: CsConfig {
                config_id: 1,
                main_mode_type: 2,
                sub_mode_type: 0xFF,
                min_main_mode_steps: 2,
                max_main_mode_steps: 5,
                main_mode_repetition: 0,
                mode_0_steps: 3,
                role: CsRole::Reflector,
                rtt_type: RttType::Sounding32,
                cs_sync_phy: 1,
                channel_map: [0xFC, 0xFF, 0x7F, 0xFC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x1F],
                channel_map_repetition: 1,
                channel_selection_type: 0,
                ch3c_shape: 0,
                ch3c_jump: 2,
                t_ip1_us: 145,
                t_ip2_us: 145,
                t_fcs_us: 150,
                t_pm_us: 40,
            },
        };
        let b = ev.to_bytes();
        assert_eq!(b.len(), 34);
        assert_eq!(parse_cs_event(&b).unwrap(), CsEvent::Config(ev.clone()));
        assert_eq!(ev.config.channels().len(), 72);
    }

    #[test]
    fn test_procedure_enable_round_trip() {
        let ev = ProcedureEnableComplete {
            status: 0,
            handle: 7,
            config_id: 1,
            state: 1,
            tone_antenna_config: 4,
            selected_tx_power: -4,
            subevent_len_us: 0x012345,
            subevents_per_event: 1,
            subevent_interval: 0,
            event_interval: 2,
            procedure_interval: 10,
            procedure_count: 0,
            max_procedure_len: 200,
        };
        let b = ev.to_bytes();
        assert_eq!(b.len(), 22);
        assert_eq!(parse_cs_event(&b).unwrap(), CsEvent::ProcedureEnable(ev));
    }

    #[test]
    fn test_unknown_code() {
        assert!(parse_cs_event(&[0x01, 0x00]).is_err());
        assert!(parse_cs_event(&[]).is_err());
    }

    #[test]
    fn test_hci_event_framing() {
        let ev = parse_hci_event(&[0x05, 0x04, 0x00, 0x40, 0x10, 0x13]).unwrap();
        assert_eq!(
            ev,
            HciEvent::Disconnection(DisconnectionComplete { status: 0, handle: 0x040, reason: 0x13 })
        );

        let cs = result().to_bytes();
        let mut packet = vec![HCI_EVENT_LE_META, cs.len() as u8];
        packet.extend_from_slice(&cs);
        assert_eq!(parse_hci_event(&packet).unwrap(), HciEvent::Cs(CsEvent::SubeventResult(result())));

        // parameter length beyond the packet
        assert!(matches!(parse_hci_event(&[0x05, 0x04, 0x00]), Err(HciError::Truncated { .. })));
        assert!(parse_hci_event(&[0x0E, 0x00]).is_err());
    }
}
