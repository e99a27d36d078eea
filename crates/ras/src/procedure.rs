// Copyright 2025-2026 CEMAXECUTER LLC

//! Ranging procedures in procedure format.
//!
//! A procedure is a list of subevents, each an 8-byte subevent header
//! followed by its steps as reported over HCI:
//! ```text
//!  mode(1) channel(1) data_len(1) data(data_len)
//! ```

use cs_hci::{CsStep, DoneStatus, SubeventResult, SubeventResultContinue};
use serde::Serialize;

use crate::error::{RasError, Result};
use crate::wire::{RangingHeader, SubeventHeader, RANGING_COUNTER_MASK};

/// Subevents a single procedure may hold.
pub const CS_SUBEVENT_PER_PROCEDURE_MAX: usize = 32;

/// One subevent's header and steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubeventData {
    pub header: SubeventHeader,
    pub steps: Vec<CsStep>,
}

impl SubeventData {
    pub fn from_result(ev: &SubeventResult) -> Result<Self> {
        let num_steps = u8::try_from(ev.steps.len())
            .map_err(|_| RasError::CapacityExceeded(format!("{} steps in one subevent", ev.steps.len())))?;
        Ok(Self {
            header: SubeventHeader {
                start_acl_conn_event: ev.start_acl_conn_event,
                frequency_compensation: ev.frequency_compensation,
                ranging_done: ev.procedure_done,
                subevent_done: ev.subevent_done,
                ranging_abort: ev.abort.procedure,
                subevent_abort: ev.abort.subevent,
                reference_power_level: ev.reference_power_level,
                num_steps_reported: num_steps,
            },
            steps: ev.steps.clone(),
        })
    }

    /// Append the steps of a continue event and take over its status.
    pub fn extend(&mut self, ev: &SubeventResultContinue) -> Result<()> {
        let total = self.steps.len() + ev.steps.len();
        let num_steps = u8::try_from(total)
            .map_err(|_| RasError::CapacityExceeded(format!("{} steps in one subevent", total)))?;
        self.steps.extend(ev.steps.iter().cloned());
        self.header.num_steps_reported = num_steps;
        self.header.ranging_done = ev.procedure_done;
        self.header.subevent_done = ev.subevent_done;
        self.header.ranging_abort = ev.abort.procedure;
        self.header.subevent_abort = ev.abort.subevent;
        Ok(())
    }

    /// Encoded length in procedure format.
    pub fn encoded_len(&self) -> usize {
        SubeventHeader::LEN + self.steps.iter().map(|s| 3 + s.data.len()).sum::<usize>()
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header.encode());
        for s in &self.steps {
            out.push(s.mode);
            out.push(s.channel);
            out.push(s.data.len() as u8);
            out.extend_from_slice(&s.data);
        }
    }

    /// Parse one subevent; returns it and the bytes consumed.
    pub fn read(buf: &[u8]) -> Result<(Self, usize)> {
        let header = SubeventHeader::decode(buf)?;
        let mut pos = SubeventHeader::LEN;
        let mut steps = Vec::with_capacity(header.num_steps_reported as usize);
        for _ in 0..header.num_steps_reported {
            if pos + 3 > buf.len() {
                return Err(RasError::Truncated {
                    what: "step header",
                    need: pos + 3,
                    have: buf.len(),
                });
            }
            let (mode, channel, len) = (buf[pos], buf[pos + 1], buf[pos + 2] as usize);
            pos += 3;
            if pos + len > buf.len() {
                return Err(RasError::Truncated {
                    what: "step data",
                    need: pos + len,
                    have: buf.len(),
                });
            }
            steps.push(CsStep {
                mode,
                channel,
                data: buf[pos..pos + len].to_vec(),
            });
            pos += len;
        }
        Ok((Self { header, steps }, pos))
    }
}

/// Parse a whole procedure-format buffer.
pub fn parse_subevents(mut buf: &[u8]) -> Result<Vec<SubeventData>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let (se, used) = SubeventData::read(buf)?;
        out.push(se);
        buf = &buf[used..];
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcedureState {
    Collecting,
    Complete,
}

/// One procedure held by the server.
#[derive(Debug, Clone, Serialize)]
pub struct Procedure {
    pub handle: u16,
    pub header: RangingHeader,
    pub subevents: Vec<SubeventData>,
    pub state: ProcedureState,
    pub aborted: bool,
    /// Combined procedure-format data, filled on completion.
    pub data: Vec<u8>,
    /// Ranging data in protocol format, filled on completion.
    pub protocol: Vec<u8>,
    /// The peer has taken or acknowledged the data.
    pub retrieved: bool,
    pub created_ms: u64,
    pub touched_ms: u64,
    pub(crate) seq: u64,
}

impl Procedure {
    pub fn new(handle: u16, header: RangingHeader, now_ms: u64, seq: u64) -> Self {
        Self {
            handle,
            header,
            subevents: Vec::new(),
            state: ProcedureState::Collecting,
            aborted: false,
            data: Vec::new(),
            protocol: Vec::new(),
            retrieved: false,
            created_ms: now_ms,
            touched_ms: now_ms,
            seq,
        }
    }

    pub fn counter(&self) -> u16 {
        self.header.ranging_counter & RANGING_COUNTER_MASK
    }

    pub fn subevent_count(&self) -> usize {
        self.subevents.len()
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn push_subevent(&mut self, se: SubeventData, now_ms: u64) -> Result<()> {
        if self.subevents.len() >= CS_SUBEVENT_PER_PROCEDURE_MAX {
            return Err(RasError::CapacityExceeded(format!(
                "procedure {} already holds {} subevents",
                self.counter(),
                CS_SUBEVENT_PER_PROCEDURE_MAX
            )));
        }
        self.subevents.push(se);
        self.touched_ms = now_ms;
        Ok(())
    }

    /// Concatenate all subevents into `data`.
    pub fn combine(&mut self) {
        let mut data = Vec::with_capacity(self.subevents.iter().map(|s| s.encoded_len()).sum());
        for se in &self.subevents {
            se.write(&mut data);
        }
        self.data = data;
        self.aborted |= self
            .subevents
            .last()
            .map(|s| s.header.ranging_done == DoneStatus::Aborted)
            .unwrap_or(false);
        self.state = ProcedureState::Complete;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_hci::AbortReasons;

    fn result(steps: usize) -> SubeventResult {
        SubeventResult {
            handle: 1,
            config_id: 0,
            start_acl_conn_event: 100,
            procedure_counter: 5,
            frequency_compensation: 0,
            reference_power_level: -10,
            procedure_done: DoneStatus::Partial,
            subevent_done: DoneStatus::Partial,
            abort: AbortReasons::default(),
            num_antenna_paths: 1,
            steps: (0..steps)
                .map(|i| CsStep { mode: 0, channel: i as u8 + 2, data: vec![i as u8; 3] })
                .collect(),
        }
    }

    #[test]
    fn test_subevent_encode_parse() {
        let se = SubeventData::from_result(&result(3)).unwrap();
        assert_eq!(se.encoded_len(), 8 + 3 * 6);
        let mut buf = Vec::new();
        se.write(&mut buf);
        assert_eq!(buf.len(), se.encoded_len());
        let (back, used) = SubeventData::read(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(back, se);

        buf.pop();
        assert!(SubeventData::read(&buf).is_err());
    }

    #[test]
    fn test_continue_extends_subevent() {
        let mut se = SubeventData::from_result(&result(2)).unwrap();
        let cont = SubeventResultContinue {
            handle: 1,
            config_id: 0,
            procedure_done: DoneStatus::AllComplete,
            subevent_done: DoneStatus::AllComplete,
            abort: AbortReasons::default(),
            num_antenna_paths: 1,
            steps: vec![CsStep { mode: 0, channel: 40, data: vec![7; 3] }],
        };
        se.extend(&cont).unwrap();
        assert_eq!(se.header.num_steps_reported, 3);
        assert_eq!(se.header.ranging_done, DoneStatus::AllComplete);
        assert_eq!(se.steps[2].channel, 40);
    }

    #[test]
    fn test_subevent_capacity() {
        let header = RangingHeader { ranging_counter: 5, config_id: 0, selected_tx_power: 0, antenna_paths_mask: 1 };
        let mut p = Procedure::new(1, header, 0, 0);
        let se = SubeventData::from_result(&result(1)).unwrap();
        for _ in 0..CS_SUBEVENT_PER_PROCEDURE_MAX {
            p.push_subevent(se.clone(), 0).unwrap();
        }
        assert!(matches!(p.push_subevent(se, 0), Err(RasError::CapacityExceeded(_))));
    }
}
