// Copyright 2025-2026 CEMAXECUTER LLC

//! Reassembly of ranging data segments received from the peer.
//!
//! Segments carry only a 6-bit rolling counter; the absolute index is
//! recovered against the next expected index. Gaps are recorded as lost
//! ranges. In on-demand mode they are fetched again once the last segment
//! arrived; in realtime mode they are skipped and the result is flagged.

use std::collections::{BTreeMap, VecDeque};

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::{RasError, Result};
use crate::event::{
    RasEvent, RasTimerType, ON_DEMAND_DATA_TIMEOUT_CONTINUE_MS, ON_DEMAND_DATA_TIMEOUT_MS,
    RANGING_DATA_READY_TIMEOUT_MS, REALTIME_DATA_TIMEOUT_CONTINUE_MS, REALTIME_DATA_TIMEOUT_MS,
};
use crate::lost::LostSegments;
use crate::segment::absolute_index;
use crate::wire::{RangingHeader, SegmentHeader, RANGING_COUNTER_MASK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    OnDemand,
    Realtime,
}

/// One procedure's reassembled ranging data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangingData {
    pub counter: Option<u16>,
    /// `None` when the segment carrying it was lost.
    pub header: Option<RangingHeader>,
    /// Ranging data in protocol format, header included.
    pub payload: Vec<u8>,
    pub data_lost: bool,
}

/// What the caller has to do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    GetRangingData { counter: u16 },
    RequestLostSegments { counter: Option<u16>, ranges: Vec<(u32, u32)> },
    Ack { counter: u16 },
    Complete(RangingData),
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    kind: RasTimerType,
    deadline_ms: u64,
}

pub struct RasClient {
    mode: ClientMode,
    timeouts_enabled: bool,
    counter: Option<u16>,
    segments: BTreeMap<u32, Vec<u8>>,
    expected: u32,
    last_index: Option<u32>,
    lost: LostSegments,
    /// Next index expected among retransmitted segments.
    retx_next: Option<u32>,
    data_lost: bool,
    timer: Option<Timer>,
    events: VecDeque<RasEvent>,
}

impl RasClient {
    pub fn new(mode: ClientMode, timeouts_enabled: bool) -> Self {
        Self {
            mode,
            timeouts_enabled,
            counter: None,
            segments: BTreeMap::new(),
            expected: 0,
            last_index: None,
            lost: LostSegments::new(),
            retx_next: None,
            data_lost: false,
            timer: None,
            events: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    pub fn lost(&self) -> &LostSegments {
        &self.lost
    }

    pub fn assembling(&self) -> bool {
        !self.segments.is_empty() || self.last_index.is_some()
    }

    fn arm(&mut self, kind: RasTimerType, now_ms: u64, after_ms: u64) {
        if self.timeouts_enabled {
            self.timer = Some(Timer { kind, deadline_ms: now_ms.saturating_add(after_ms) });
        }
    }

    fn clear_assembly(&mut self) {
        self.segments.clear();
        self.expected = 0;
        self.last_index = None;
        self.lost.clear();
        self.retx_next = None;
        self.data_lost = false;
    }

    /// Drop partial data, timers and pending events (disconnect).
    pub fn reset(&mut self) {
        self.clear_assembly();
        self.counter = None;
        self.timer = None;
        self.events.clear();
    }

    fn supersede(&mut self, counter: Option<u16>) {
        if self.assembling() {
            log::warn!(
                "ranging data {:?} superseded by {:?} after {} segments",
                self.counter,
                counter,
                self.segments.len()
            );
        }
        self.clear_assembly();
        self.counter = counter;
    }

    /// The local procedure `counter` finished; its data is expected from the peer.
    pub fn expect_ranging_data(&mut self, counter: u16, now_ms: u64) {
        let counter = counter & RANGING_COUNTER_MASK;
        if !self.assembling() {
            self.counter = Some(counter);
        }
        match self.mode {
            ClientMode::OnDemand => self.arm(RasTimerType::RangingDataReady, now_ms, RANGING_DATA_READY_TIMEOUT_MS),
            ClientMode::Realtime => self.arm(RasTimerType::RealtimeData, now_ms, REALTIME_DATA_TIMEOUT_MS),
        }
    }

    /// Ranging Data Ready indication (on-demand).
    pub fn on_data_ready(&mut self, counter: u16, now_ms: u64) -> Result<Vec<ClientAction>> {
        if self.mode != ClientMode::OnDemand {
            return Err(RasError::InvalidState("data ready in realtime mode".into()));
        }
        let counter = counter & RANGING_COUNTER_MASK;
        if self.counter != Some(counter) || self.assembling() {
            self.supersede(Some(counter));
        }
        self.arm(RasTimerType::OnDemandData, now_ms, ON_DEMAND_DATA_TIMEOUT_MS);
        Ok(vec![ClientAction::GetRangingData { counter }])
    }

    fn resolve_index(&self, counter: u8) -> u32 {
        // Retransmissions only come after the last segment was seen, in
        // ascending order. Any lost index that is skipped is matched last.
        if self.last_index.is_some() {
            if let Some(next) = self.retx_next {
                let i = absolute_index(next, counter);
                if self.lost.contains(i) {
                    return i;
                }
            }
            for &(s, e) in self.lost.ranges() {
                if let Some(i) = (s..=e).find(|i| i % 64 == counter as u32) {
                    return i;
                }
            }
        }
        absolute_index(self.expected, counter)
    }

    fn complete(&self) -> bool {
        match self.last_index {
            Some(last) => self.segments.range(..=last).count() as u32 == last + 1,
            None => false,
        }
    }

    fn finish(&mut self) -> Vec<ClientAction> {
        let payload: Vec<u8> = self.segments.values().flatten().copied().collect();
        let header = if self.segments.contains_key(&0) {
            RangingHeader::decode(&payload).ok()
        } else {
            None
        };
        let counter = header.map(|h| h.ranging_counter).or(self.counter);
        let data = RangingData {
            counter,
            header,
            payload,
            data_lost: self.data_lost,
        };
        log::info!(
            "ranging data {:?} reassembled: {} segments, {} bytes{}",
            counter,
            self.segments.len(),
            data.payload.len(),
            if data.data_lost { ", data lost" } else { "" }
        );
        let mut actions = vec![ClientAction::Complete(data)];
        if let (ClientMode::OnDemand, Some(c)) = (self.mode, counter) {
            actions.push(ClientAction::Ack { counter: c });
        }
        self.clear_assembly();
        self.counter = None;
        self.timer = None;
        actions
    }

    /// Feed one received segment, header byte included.
    pub fn on_segment(&mut self, seg: &[u8], now_ms: u64) -> Result<Vec<ClientAction>> {
        let (&first_byte, payload) = seg.split_first().ok_or(RasError::Truncated {
            what: "segment header",
            need: 1,
            have: 0,
        })?;
        let sh = SegmentHeader::decode(first_byte);

        let mut actions = Vec::new();
        if sh.first && self.mode == ClientMode::Realtime && self.assembling() {
            log::warn!("ranging data {:?} ended without its last segment", self.counter);
            self.data_lost = true;
            actions.extend(self.finish());
        }
        // a first segment is a new procedure unless it is a requested retransmission
        let retransmitted = self.lost.contains(0);
        if sh.first && !retransmitted && (self.assembling() || self.counter.is_none()) {
            let counter = (payload.len() >= 2).then(|| LittleEndian::read_u16(payload) & RANGING_COUNTER_MASK);
            if self.assembling() || counter != self.counter {
                self.supersede(counter.or(self.counter));
            }
        }

        let index = if sh.first && !self.segments.contains_key(&0) { 0 } else { self.resolve_index(sh.counter) };
        if index >= self.expected {
            if index > self.expected {
                log::debug!("segments {}..={} missing", self.expected, index - 1);
                self.lost.record(self.expected, index - 1);
                if self.mode == ClientMode::Realtime {
                    self.data_lost = true;
                }
            }
            self.expected = index + 1;
        } else {
            self.lost.mark_received(index);
            self.retx_next = Some(index + 1);
        }
        self.segments.insert(index, payload.to_vec());
        if sh.last {
            self.last_index = Some(index);
        }

        if self.complete() {
            actions.extend(self.finish());
            return Ok(actions);
        }

        if let Some(last) = self.last_index {
            match self.mode {
                ClientMode::OnDemand if sh.last => {
                    // drop anything recorded past the end
                    let ranges: Vec<(u32, u32)> = self
                        .lost
                        .ranges()
                        .iter()
                        .filter(|&&(s, _)| s <= last)
                        .map(|&(s, e)| (s, e.min(last)))
                        .collect();
                    log::info!("requesting lost segments {:?}", ranges);
                    self.retx_next = ranges.first().map(|&(s, _)| s);
                    actions.push(ClientAction::RequestLostSegments { counter: self.counter, ranges });
                }
                ClientMode::OnDemand => {}
                ClientMode::Realtime => {
                    self.data_lost = true;
                    actions.extend(self.finish());
                    return Ok(actions);
                }
            }
        }

        let (kind, after) = match self.mode {
            ClientMode::OnDemand => (RasTimerType::OnDemandData, ON_DEMAND_DATA_TIMEOUT_CONTINUE_MS),
            ClientMode::Realtime => (RasTimerType::RealtimeData, REALTIME_DATA_TIMEOUT_CONTINUE_MS),
        };
        self.arm(kind, now_ms, after);
        Ok(actions)
    }

    /// Fire an expired timer; the data being assembled is dropped.
    pub fn poll(&mut self, now_ms: u64) {
        let Some(t) = self.timer else {
            return;
        };
        if now_ms < t.deadline_ms {
            return;
        }
        log::warn!("{:?} timeout for ranging data {:?}", t.kind, self.counter);
        self.events.push_back(RasEvent::Timeout { timer: t.kind, counter: self.counter });
        self.timer = None;
        self.clear_assembly();
        self.counter = None;
    }

    pub fn drain_events(&mut self) -> Vec<RasEvent> {
        self.events.drain(..).collect()
    }
}
