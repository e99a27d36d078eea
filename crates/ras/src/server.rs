// Copyright 2025-2026 CEMAXECUTER LLC

//! Per-connection procedure assembly on the side that produces ranging data.
//!
//! Subevent results are collected into procedures held in a small ring of
//! slots. A completed procedure is kept for the application (local), queued
//! subevent by subevent for notification (realtime) or stored until the
//! peer fetches it (on-demand).

use std::collections::VecDeque;

use cs_hci::{ProcedureSeed, SubeventResult, SubeventResultContinue};

use crate::config::{DataExchange, RasConfig};
use crate::convert::{effective_context, procedure_to_protocol, subevent_to_protocol};
use crate::error::{RasError, Result};
use crate::event::{RasEvent, RasTimerType, PROCEDURE_DATA_TIMEOUT_MS};
use crate::procedure::{Procedure, ProcedureState, SubeventData};
use crate::realtime::{RealtimeEntry, RealtimeRing};
use crate::segment::{segment_at, segment_count, split_segments};
use crate::step::StepContext;
use crate::wire::{RangingHeader, SegmentHeader, RANGING_COUNTER_MASK, SEGMENT_COUNTER_MODULO};

pub struct RasServer {
    handle: u16,
    config: RasConfig,
    ctx: StepContext,
    slots: Vec<Option<Procedure>>,
    current: Option<usize>,
    seq: u64,
    ring: RealtimeRing,
    /// Procedure being streamed and the next segment index within it.
    rt_counter: Option<u16>,
    rt_index: u32,
    /// The streamed procedure lost its first subevent; its rest is dropped.
    rt_skip: bool,
    events: VecDeque<RasEvent>,
}

impl RasServer {
    pub fn new(handle: u16, config: RasConfig, ctx: StepContext) -> Self {
        let slots = vec![None; config.procedure_count.max(1)];
        Self {
            handle,
            config,
            ctx,
            slots,
            current: None,
            seq: 0,
            ring: RealtimeRing::default(),
            rt_counter: None,
            rt_index: 0,
            rt_skip: false,
            events: VecDeque::new(),
        }
    }

    /// Forget every procedure and anything queued for the peer (disconnect).
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.current = None;
        self.ring.clear();
        self.rt_counter = None;
        self.rt_index = 0;
        self.rt_skip = false;
        self.events.clear();
        log::debug!("[{:04x}] ranging state reset", self.handle);
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn config(&self) -> &RasConfig {
        &self.config
    }

    pub fn step_context(&self) -> StepContext {
        self.ctx
    }

    /// Counter of the procedure still collecting subevents.
    pub fn collecting(&self) -> Option<u16> {
        self.current.and_then(|i| self.slots[i].as_ref()).map(|p| p.counter())
    }

    /// Feed an LE CS Subevent Result.
    pub fn on_subevent_result(&mut self, ev: &SubeventResult, seed: &ProcedureSeed, now_ms: u64) -> Result<()> {
        let counter = ev.procedure_counter & RANGING_COUNTER_MASK;

        if let Some(idx) = self.current {
            let same = self.slots[idx].as_ref().map(|p| p.counter() == counter).unwrap_or(false);
            if !same {
                log::warn!(
                    "[{:04x}] procedure {:?} superseded by {} before completing",
                    self.handle,
                    self.collecting(),
                    counter
                );
                if let Some(p) = self.slots[idx].as_mut() {
                    p.aborted = true;
                }
                self.complete(idx)?;
            }
        }

        let idx = match self.current {
            Some(idx) => idx,
            None => {
                let mask_seed = ProcedureSeed {
                    config_id: ev.config_id,
                    selected_tx_power: seed.selected_tx_power,
                    num_antenna_paths: ev.num_antenna_paths,
                };
                let header = RangingHeader {
                    ranging_counter: counter,
                    config_id: ev.config_id,
                    selected_tx_power: seed.selected_tx_power,
                    antenna_paths_mask: mask_seed.antenna_paths_mask(),
                };
                let idx = self.allocate(counter)?;
                self.slots[idx] = Some(Procedure::new(self.handle, header, now_ms, self.seq));
                self.seq += 1;
                self.current = Some(idx);
                log::debug!("[{:04x}] procedure {} started in slot {}", self.handle, counter, idx);
                idx
            }
        };

        let se = SubeventData::from_result(ev)?;
        let p = self.slots[idx]
            .as_mut()
            .ok_or_else(|| RasError::InvalidState("collecting slot is empty".into()))?;
        p.push_subevent(se, now_ms)?;

        if ev.subevent_done.is_final() || ev.procedure_done.is_final() {
            self.queue_realtime(idx)?;
        }
        if ev.procedure_done.is_final() {
            self.complete(idx)?;
        }
        Ok(())
    }

    /// Feed an LE CS Subevent Result Continue; the steps extend the last
    /// subevent of the collecting procedure.
    pub fn on_subevent_continue(&mut self, ev: &SubeventResultContinue, now_ms: u64) -> Result<()> {
        let idx = self
            .current
            .ok_or_else(|| RasError::InvalidState("continue event without a procedure".into()))?;
        let p = self.slots[idx]
            .as_mut()
            .ok_or_else(|| RasError::InvalidState("collecting slot is empty".into()))?;
        let counter = p.counter();
        let se = p.subevents.last_mut().ok_or(RasError::UnknownProcedure(counter))?;
        se.extend(ev)?;
        p.touched_ms = now_ms;

        if ev.subevent_done.is_final() || ev.procedure_done.is_final() {
            self.queue_realtime(idx)?;
        }
        if ev.procedure_done.is_final() {
            self.complete(idx)?;
        }
        Ok(())
    }

    /// Free slot, otherwise the oldest procedure. A counter still held by a
    /// slot is refused.
    fn allocate(&mut self, counter: u16) -> Result<usize> {
        if self.find(counter).is_some() {
            return Err(RasError::InvalidState(format!("procedure {} already assembled", counter)));
        }
        if let Some(i) = self.slots.iter().position(|s| s.is_none()) {
            return Ok(i);
        }
        let mut best = 0;
        let mut oldest = u64::MAX;
        for (i, s) in self.slots.iter().enumerate() {
            if let Some(p) = s {
                if p.seq < oldest {
                    oldest = p.seq;
                    best = i;
                }
            }
        }
        if let Some(p) = self.slots[best].take() {
            if !p.retrieved {
                log::warn!("[{:04x}] procedure {} overwritten before retrieval", self.handle, p.counter());
                self.events.push_back(RasEvent::Overwritten { counter: p.counter() });
            }
        }
        Ok(best)
    }

    fn queue_realtime(&mut self, idx: usize) -> Result<()> {
        if self.config.mechanism != DataExchange::Realtime {
            return Ok(());
        }
        let Some(p) = self.slots[idx].as_ref() else {
            return Ok(());
        };
        let Some(se) = p.subevents.last() else {
            return Ok(());
        };
        let ctx = effective_context(&p.header, &self.ctx);
        let mut data = Vec::with_capacity(RangingHeader::LEN + se.encoded_len());
        let first = p.subevents.len() == 1;
        if first {
            data.extend_from_slice(&p.header.encode());
        }
        subevent_to_protocol(se, &ctx, &self.config.filter, &mut data)?;
        let last = se.header.ranging_done.is_final();
        self.ring.push(RealtimeEntry::new(p.counter(), first, last, data));
        Ok(())
    }

    fn complete(&mut self, idx: usize) -> Result<()> {
        self.current = None;
        let Some(p) = self.slots[idx].as_mut() else {
            return Ok(());
        };
        p.combine();
        let counter = p.counter();
        let protocol = match procedure_to_protocol(&p.header, &p.data, &self.ctx, &self.config.filter) {
            Ok(protocol) => protocol,
            Err(e) => {
                log::warn!("[{:04x}] procedure {} dropped: {}", self.handle, counter, e);
                self.slots[idx] = None;
                return Err(e);
            }
        };
        p.protocol = protocol;
        log::info!(
            "[{:04x}] procedure {} complete: {} subevents, {} bytes{}",
            self.handle,
            counter,
            p.subevent_count(),
            p.data_len(),
            if p.aborted { ", aborted" } else { "" }
        );
        self.events.push_back(RasEvent::ProcedureComplete {
            counter,
            aborted: p.aborted,
            data_len: p.data_len(),
        });
        match self.config.mechanism {
            DataExchange::Local => {}
            DataExchange::OnDemand => self.events.push_back(RasEvent::DataReady { counter }),
            DataExchange::Realtime => p.retrieved = true,
        }
        Ok(())
    }

    /// Drop procedures the peer has not retrieved within the data timeout.
    pub fn poll(&mut self, now_ms: u64) {
        if !self.config.timeouts_enabled {
            return;
        }
        for i in 0..self.slots.len() {
            let expired = self.slots[i]
                .as_ref()
                .map(|p| !p.retrieved && now_ms.saturating_sub(p.touched_ms) >= PROCEDURE_DATA_TIMEOUT_MS)
                .unwrap_or(false);
            if !expired {
                continue;
            }
            if let Some(p) = self.slots[i].take() {
                log::warn!("[{:04x}] procedure {} timed out", self.handle, p.counter());
                self.events.push_back(RasEvent::Timeout {
                    timer: RasTimerType::LocalData,
                    counter: Some(p.counter()),
                });
            }
            if self.current == Some(i) {
                self.current = None;
            }
        }
    }

    pub fn drain_events(&mut self) -> Vec<RasEvent> {
        self.events.drain(..).collect()
    }

    fn find(&self, counter: u16) -> Option<usize> {
        let counter = counter & RANGING_COUNTER_MASK;
        self.slots
            .iter()
            .position(|s| s.as_ref().map(|p| p.counter() == counter).unwrap_or(false))
    }

    fn find_complete(&self, counter: u16) -> Result<&Procedure> {
        self.find(counter)
            .and_then(|i| self.slots[i].as_ref())
            .filter(|p| p.state == ProcedureState::Complete)
            .ok_or(RasError::UnknownProcedure(counter))
    }

    pub fn procedure(&self, counter: u16) -> Option<&Procedure> {
        self.find(counter).and_then(|i| self.slots[i].as_ref())
    }

    /// Hand a completed procedure to the application, freeing its slot.
    pub fn take_local(&mut self, counter: u16) -> Result<Procedure> {
        self.find_complete(counter)?;
        let idx = self.find(counter).ok_or(RasError::UnknownProcedure(counter))?;
        self.slots[idx].take().ok_or(RasError::UnknownProcedure(counter))
    }

    /// All segments of a stored procedure's ranging data.
    pub fn segments(&self, counter: u16) -> Result<Vec<Vec<u8>>> {
        let p = self.find_complete(counter)?;
        split_segments(&p.protocol, self.config.segment_len)
    }

    /// Segments `start..=end` again, clamped to the last one.
    pub fn retrieve_lost_segments(&self, counter: u16, start: u32, end: u32) -> Result<Vec<Vec<u8>>> {
        let p = self.find_complete(counter)?;
        let count = segment_count(p.protocol.len(), self.config.segment_len)?;
        if start >= count || start > end {
            return Err(RasError::InvalidLength(format!(
                "lost segments {}..={} of {}",
                start, end, count
            )));
        }
        (start..=end.min(count - 1))
            .map(|i| segment_at(&p.protocol, self.config.segment_len, i))
            .collect()
    }

    /// The peer confirmed reception; the procedure is released.
    pub fn ack(&mut self, counter: u16) -> Result<()> {
        self.find_complete(counter)?;
        self.delete_procedure(counter)
    }

    pub fn delete_procedure(&mut self, counter: u16) -> Result<()> {
        let idx = self.find(counter).ok_or(RasError::UnknownProcedure(counter))?;
        self.slots[idx] = None;
        if self.current == Some(idx) {
            self.current = None;
        }
        log::debug!("[{:04x}] procedure {} deleted", self.handle, counter);
        Ok(())
    }

    /// Drain the realtime ring into notification segments.
    ///
    /// A procedure whose first subevent was dropped from the ring is not sent
    /// at all. Subevents dropped from the middle of a procedure leave a gap in
    /// the segment counter so the receiver sees the loss.
    pub fn realtime_segments(&mut self) -> Vec<Vec<u8>> {
        let payload = self.config.segment_len.saturating_sub(1).max(1);
        let mut out = Vec::new();
        while let Some(read) = self.ring.pop() {
            let counter = read.entry.counter();
            if read.data_lost {
                self.events.push_back(RasEvent::RealtimeDataLost { counter });
            }
            if read.entry.is_first() || self.rt_counter != Some(counter) {
                if let Some(prev) = self.rt_counter.filter(|_| !self.rt_skip) {
                    log::warn!("[{:04x}] procedure {} streamed without its last subevent", self.handle, prev);
                }
                self.rt_counter = Some(counter);
                self.rt_index = 0;
                self.rt_skip = !read.entry.is_first();
                if self.rt_skip {
                    log::warn!(
                        "[{:04x}] procedure {} lost its first subevent, dropping the rest",
                        self.handle,
                        counter
                    );
                    if !read.data_lost {
                        self.events.push_back(RasEvent::RealtimeDataLost { counter });
                    }
                }
            } else if read.data_lost && !self.rt_skip {
                self.rt_index += 1;
            }
            if self.rt_skip {
                if read.entry.is_last() {
                    self.rt_counter = None;
                    self.rt_skip = false;
                }
                continue;
            }
            let chunks: Vec<&[u8]> = read.entry.data.chunks(payload).collect();
            let n = chunks.len();
            for (i, chunk) in chunks.into_iter().enumerate() {
                let header = SegmentHeader {
                    first: self.rt_index == 0,
                    last: read.entry.is_last() && i + 1 == n,
                    counter: (self.rt_index % SEGMENT_COUNTER_MODULO) as u8,
                };
                let mut seg = Vec::with_capacity(1 + chunk.len());
                seg.push(header.encode());
                seg.extend_from_slice(chunk);
                out.push(seg);
                self.rt_index += 1;
            }
            if read.entry.is_last() {
                self.rt_counter = None;
            }
        }
        out
    }

    pub fn realtime_pending(&self) -> usize {
        self.ring.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::parse_subevents;
    use crate::realtime::CS_REALTIME_SUBEVENT_MAX;
    use cs_hci::{AbortReasons, CsRole, CsStep, DoneStatus};

    fn ctx() -> StepContext {
        StepContext {
            role: CsRole::Initiator,
            num_antenna_paths: 1,
            sounding_sequence: false,
        }
    }

    fn seed() -> ProcedureSeed {
        ProcedureSeed {
            config_id: 2,
            selected_tx_power: -3,
            num_antenna_paths: 1,
        }
    }

    fn server(mechanism: DataExchange) -> RasServer {
        let config = RasConfig {
            mechanism,
            ..RasConfig::default()
        };
        RasServer::new(0x40, config, ctx())
    }

    // Initiator mode 0 step: 5 bytes.
    fn steps(n: usize, base: u8) -> Vec<CsStep> {
        (0..n)
            .map(|i| CsStep {
                mode: 0,
                channel: base + i as u8,
                data: vec![base.wrapping_add(i as u8); 5],
            })
            .collect()
    }

    fn result(counter: u16, acl: u16, n: usize, proc_done: DoneStatus, se_done: DoneStatus) -> SubeventResult {
        SubeventResult {
            handle: 0x40,
            config_id: 2,
            start_acl_conn_event: acl,
            procedure_counter: counter,
            frequency_compensation: 0,
            reference_power_level: -20,
            procedure_done: proc_done,
            subevent_done: se_done,
            abort: AbortReasons::default(),
            num_antenna_paths: 1,
            steps: steps(n, acl as u8),
        }
    }

    fn run_procedure(s: &mut RasServer, counter: u16, subevents: usize, now: u64) {
        for i in 0..subevents {
            let done = if i + 1 == subevents { DoneStatus::AllComplete } else { DoneStatus::Partial };
            s.on_subevent_result(&result(counter, i as u16 * 10, 2, done, DoneStatus::AllComplete), &seed(), now)
                .unwrap();
        }
    }

    #[test]
    fn test_assembly_order_and_length() {
        let mut s = server(DataExchange::Local);
        s.on_subevent_result(&result(7, 100, 3, DoneStatus::Partial, DoneStatus::AllComplete), &seed(), 0)
            .unwrap();
        assert_eq!(s.collecting(), Some(7));
        s.on_subevent_result(&result(7, 110, 1, DoneStatus::Partial, DoneStatus::Partial), &seed(), 5)
            .unwrap();
        let cont = SubeventResultContinue {
            handle: 0x40,
            config_id: 2,
            procedure_done: DoneStatus::AllComplete,
            subevent_done: DoneStatus::AllComplete,
            abort: AbortReasons::default(),
            num_antenna_paths: 1,
            steps: steps(2, 200),
        };
        s.on_subevent_continue(&cont, 6).unwrap();
        assert_eq!(s.collecting(), None);

        let p = s.procedure(7).unwrap();
        assert_eq!(p.state, ProcedureState::Complete);
        assert_eq!(p.subevent_count(), 2);
        let expected: usize = p.subevents.iter().map(|se| se.encoded_len()).sum();
        assert_eq!(p.data_len(), expected);
        assert_eq!(p.data_len(), 2 * 8 + 6 * (3 + 5));
        assert_eq!(p.header.config_id, 2);
        assert_eq!(p.header.selected_tx_power, -3);
        assert_eq!(p.header.antenna_paths_mask, 0b1);

        let parsed = parse_subevents(&p.data).unwrap();
        assert_eq!(parsed[0].header.start_acl_conn_event, 100);
        assert_eq!(parsed[1].header.start_acl_conn_event, 110);
        let channels: Vec<u8> = parsed[1].steps.iter().map(|st| st.channel).collect();
        assert_eq!(channels, vec![110, 200, 201]);

        let data_len = p.data_len();
        assert_eq!(
            s.drain_events(),
            vec![RasEvent::ProcedureComplete { counter: 7, aborted: false, data_len }]
        );
        let taken = s.take_local(7).unwrap();
        assert_eq!(taken.counter(), 7);
        assert!(s.procedure(7).is_none());
    }

    #[test]
    fn test_continue_without_procedure() {
        let mut s = server(DataExchange::Local);
        let cont = SubeventResultContinue {
            handle: 0x40,
            config_id: 2,
            procedure_done: DoneStatus::AllComplete,
            subevent_done: DoneStatus::AllComplete,
            abort: AbortReasons::default(),
            num_antenna_paths: 1,
            steps: steps(1, 0),
        };
        assert!(matches!(s.on_subevent_continue(&cont, 0), Err(RasError::InvalidState(_))));
    }

    #[test]
    fn test_new_counter_supersedes_collecting() {
        let mut s = server(DataExchange::Local);
        s.on_subevent_result(&result(1, 0, 2, DoneStatus::Partial, DoneStatus::AllComplete), &seed(), 0)
            .unwrap();
        s.on_subevent_result(&result(2, 10, 2, DoneStatus::Partial, DoneStatus::AllComplete), &seed(), 1)
            .unwrap();
        assert_eq!(s.collecting(), Some(2));
        let p1 = s.procedure(1).unwrap();
        assert!(p1.aborted);
        assert_eq!(p1.state, ProcedureState::Complete);
    }

    #[test]
    fn test_aborted_procedure_flagged() {
        let mut s = server(DataExchange::Local);
        s.on_subevent_result(&result(3, 0, 1, DoneStatus::Aborted, DoneStatus::Aborted), &seed(), 0)
            .unwrap();
        assert!(s.procedure(3).unwrap().aborted);
    }

    #[test]
    fn test_timeout_fires_and_frees_slot() {
        let mut s = server(DataExchange::OnDemand);
        run_procedure(&mut s, 9, 1, 1_000);
        s.drain_events();

        s.poll(1_000 + PROCEDURE_DATA_TIMEOUT_MS - 1);
        assert!(s.drain_events().is_empty(), "timeout fired early");
        assert!(s.procedure(9).is_some());

        s.poll(1_000 + PROCEDURE_DATA_TIMEOUT_MS);
        assert_eq!(
            s.drain_events(),
            vec![RasEvent::Timeout { timer: RasTimerType::LocalData, counter: Some(9) }]
        );
        assert!(s.procedure(9).is_none());

        // all slots available again, no overwrite reported
        for c in 0..s.config().procedure_count as u16 {
            run_procedure(&mut s, 20 + c, 1, 20_000);
        }
        assert!(!s
            .drain_events()
            .iter()
            .any(|e| matches!(e, RasEvent::Overwritten { .. })));
    }

    #[test]
    fn test_timeouts_disabled() {
        let config = RasConfig {
            timeouts_enabled: false,
            ..RasConfig::default()
        };
        let mut s = RasServer::new(1, config, ctx());
        run_procedure(&mut s, 4, 1, 0);
        s.poll(u64::MAX / 2);
        assert!(s.procedure(4).is_some());
    }

    #[test]
    fn test_overwrite_oldest() {
        let mut s = server(DataExchange::OnDemand);
        let n = s.config().procedure_count as u16;
        for c in 0..n {
            run_procedure(&mut s, c, 1, 0);
        }
        s.drain_events();
        run_procedure(&mut s, 100, 1, 0);
        let ev = s.drain_events();
        assert_eq!(ev[0], RasEvent::Overwritten { counter: 0 });
        assert!(s.procedure(0).is_none());
        assert!(s.procedure(100).is_some());

        // acknowledged procedures are reused silently
        s.ack(1).unwrap();
        run_procedure(&mut s, 101, 1, 0);
        assert!(!s
            .drain_events()
            .iter()
            .any(|e| matches!(e, RasEvent::Overwritten { .. })));
    }

    #[test]
    fn test_on_demand_segments_and_lost_retrieval() {
        let mut s = server(DataExchange::OnDemand);
        run_procedure(&mut s, 12, 3, 0);
        let ev = s.drain_events();
        assert!(ev.contains(&RasEvent::DataReady { counter: 12 }));

        let segs = s.segments(12).unwrap();
        assert!(segs.len() > 2);
        assert!(segs.iter().all(|seg| seg.len() <= s.config().segment_len));
        let joined: Vec<u8> = segs.iter().flat_map(|seg| seg[1..].iter().copied()).collect();
        assert_eq!(joined, s.procedure(12).unwrap().protocol);

        let again = s.retrieve_lost_segments(12, 1, 2).unwrap();
        assert_eq!(again, segs[1..=2].to_vec());
        assert!(s.retrieve_lost_segments(12, 500, 501).is_err());
        assert!(matches!(s.segments(13), Err(RasError::UnknownProcedure(13))));

        s.ack(12).unwrap();
        assert!(s.procedure(12).is_none());
    }

    #[test]
    fn test_delete_procedure() {
        let mut s = server(DataExchange::Local);
        run_procedure(&mut s, 5, 1, 0);
        s.delete_procedure(5).unwrap();
        assert!(s.procedure(5).is_none());
        assert!(s.delete_procedure(5).is_err());
    }

    #[test]
    fn test_realtime_stream() {
        let mut s = server(DataExchange::Realtime);
        run_procedure(&mut s, 30, 2, 0);
        assert_eq!(s.realtime_pending(), 2);
        let segs = s.realtime_segments();
        let first = SegmentHeader::decode(segs[0][0]);
        let last = SegmentHeader::decode(segs[segs.len() - 1][0]);
        assert!(first.first && !first.last);
        assert!(last.last);
        let joined: Vec<u8> = segs.iter().flat_map(|seg| seg[1..].iter().copied()).collect();
        assert_eq!(joined, s.procedure(30).unwrap().protocol);

        // streamed procedures do not time out
        s.poll(PROCEDURE_DATA_TIMEOUT_MS * 2);
        assert!(s.procedure(30).is_some());
    }

    #[test]
    fn test_realtime_overflow_reports_loss() {
        let mut s = server(DataExchange::Realtime);
        let total = CS_REALTIME_SUBEVENT_MAX + 5;
        for i in 0..total {
            let done = if i + 1 == total { DoneStatus::AllComplete } else { DoneStatus::Partial };
            let mut r = result(40, i as u16, 1, done, DoneStatus::AllComplete);
            r.procedure_counter = 40 + (i / 16) as u16;
            if i % 16 == 15 {
                r.procedure_done = DoneStatus::AllComplete;
            }
            s.on_subevent_result(&r, &seed(), 0).unwrap();
        }
        assert_eq!(s.realtime_pending(), CS_REALTIME_SUBEVENT_MAX);
        s.drain_events();
        let segs = s.realtime_segments();
        assert!(!segs.is_empty());
        let lost: Vec<_> = s
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, RasEvent::RealtimeDataLost { .. }))
            .collect();
        assert_eq!(lost.len(), 1);
    }

    #[test]
    fn test_realtime_head_loss_skips_procedure() {
        use crate::client::{ClientAction, ClientMode, RasClient};

        let mut s = server(DataExchange::Realtime);
        let total = CS_REALTIME_SUBEVENT_MAX + 5;
        for i in 0..total {
            let counter = 40 + (i / 16) as u16;
            let done = if i % 16 == 15 || i + 1 == total { DoneStatus::AllComplete } else { DoneStatus::Partial };
            s.on_subevent_result(&result(counter, i as u16, 1, done, DoneStatus::AllComplete), &seed(), 0)
                .unwrap();
        }
        s.drain_events();

        // procedure 40 lost its first five subevents, ranging header included
        let segs = s.realtime_segments();
        assert_eq!(s.drain_events(), vec![RasEvent::RealtimeDataLost { counter: 40 }]);

        let mut c = RasClient::new(ClientMode::Realtime, true);
        let mut delivered = Vec::new();
        for seg in &segs {
            for a in c.on_segment(seg, 1).unwrap() {
                if let ClientAction::Complete(d) = a {
                    delivered.push(d);
                }
            }
        }
        let counters: Vec<Option<u16>> = delivered.iter().map(|d| d.counter).collect();
        assert_eq!(counters, vec![Some(41), Some(42), Some(43), Some(44)]);
        for d in &delivered {
            assert!(!d.data_lost, "procedure {:?} flagged", d.counter);
            assert_eq!(d.payload, s.procedure(d.counter.unwrap()).unwrap().protocol);
        }
    }

    #[test]
    fn test_failed_conversion_leaves_no_slot() {
        let mut s = server(DataExchange::Local);
        // mode 0 initiator steps carry 5 bytes
        let mut bad = result(6, 0, 2, DoneStatus::AllComplete, DoneStatus::AllComplete);
        bad.steps[1].data.pop();
        assert!(matches!(s.on_subevent_result(&bad, &seed(), 0), Err(RasError::InvalidLength(_))));
        assert!(s.procedure(6).is_none());
        assert_eq!(s.collecting(), None);
        assert!(s.drain_events().is_empty());

        run_procedure(&mut s, 6, 1, 10);
        assert_eq!(s.procedure(6).unwrap().state, ProcedureState::Complete);

        // a late subevent for an assembled procedure does not open a second slot
        let dup = result(6, 50, 1, DoneStatus::AllComplete, DoneStatus::AllComplete);
        assert!(matches!(s.on_subevent_result(&dup, &seed(), 20), Err(RasError::InvalidState(_))));
        let held = s.slots.iter().flatten().filter(|p| p.counter() == 6).count();
        assert_eq!(held, 1);
    }

    #[test]
    fn test_reset_clears_connection_state() {
        let mut s = server(DataExchange::Realtime);
        run_procedure(&mut s, 3, 2, 0);
        s.on_subevent_result(&result(4, 0, 2, DoneStatus::Partial, DoneStatus::AllComplete), &seed(), 0)
            .unwrap();
        assert!(s.realtime_pending() > 0);

        s.reset();
        assert_eq!(s.collecting(), None);
        assert!(s.procedure(3).is_none());
        assert_eq!(s.realtime_pending(), 0);
        assert!(s.drain_events().is_empty());
        assert!(s.realtime_segments().is_empty());

        // counters seen before the reset are free again
        run_procedure(&mut s, 4, 1, 100);
        let segs = s.realtime_segments();
        assert!(SegmentHeader::decode(segs[0][0]).first);
        let joined: Vec<u8> = segs.iter().flat_map(|seg| seg[1..].iter().copied()).collect();
        assert_eq!(joined, s.procedure(4).unwrap().protocol);
    }
}
