// Copyright 2025-2026 CEMAXECUTER LLC

//! Bounded ring of subevent ranging data waiting for realtime notification.
//!
//! The producer never blocks: when the ring is full the oldest unread entry
//! is dropped and the next read reports the loss.

use serde::Serialize;

use crate::wire::RANGING_COUNTER_MASK;

/// Ring capacity in subevents.
pub const CS_REALTIME_SUBEVENT_MAX: usize = 64;

const LAST_FLAG: u16 = 0x1000;
const FIRST_FLAG: u16 = 0x2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeEntry {
    /// 12-bit procedure counter, bit 12 set on the procedure's last
    /// subevent, bit 13 on its first.
    pub tag: u16,
    /// Subevent in protocol format; the first subevent of a procedure is
    /// preceded by the ranging header.
    pub data: Vec<u8>,
}

impl RealtimeEntry {
    pub fn new(counter: u16, first: bool, last: bool, data: Vec<u8>) -> Self {
        let mut tag = counter & RANGING_COUNTER_MASK;
        if first {
            tag |= FIRST_FLAG;
        }
        if last {
            tag |= LAST_FLAG;
        }
        Self { tag, data }
    }

    pub fn counter(&self) -> u16 {
        self.tag & RANGING_COUNTER_MASK
    }

    pub fn is_last(&self) -> bool {
        self.tag & LAST_FLAG != 0
    }

    /// Carries the ranging header.
    pub fn is_first(&self) -> bool {
        self.tag & FIRST_FLAG != 0
    }
}

/// What a read returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeRead {
    pub entry: RealtimeEntry,
    /// Entries were dropped since the previous read.
    pub data_lost: bool,
}

#[derive(Debug)]
pub struct RealtimeRing {
    slots: Vec<Option<RealtimeEntry>>,
    wptr: u64,
    rptr: u64,
    lost: bool,
}

impl RealtimeRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            wptr: 0,
            rptr: 0,
            lost: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        (self.wptr - self.rptr) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.wptr == self.rptr
    }

    /// Store an entry. Returns the dropped entry when the ring was full.
    pub fn push(&mut self, entry: RealtimeEntry) -> Option<RealtimeEntry> {
        let cap = self.slots.len() as u64;
        let mut dropped = None;
        if self.wptr - self.rptr == cap {
            dropped = self.slots[(self.rptr % cap) as usize].take();
            self.rptr += 1;
            self.lost = true;
            if let Some(d) = &dropped {
                log::warn!("realtime ring full, dropped subevent of procedure {}", d.counter());
            }
        }
        self.slots[(self.wptr % cap) as usize] = Some(entry);
        self.wptr += 1;
        dropped
    }

    pub fn pop(&mut self) -> Option<RealtimeRead> {
        if self.is_empty() {
            return None;
        }
        let cap = self.slots.len() as u64;
        let entry = self.slots[(self.rptr % cap) as usize].take()?;
        self.rptr += 1;
        let data_lost = std::mem::take(&mut self.lost);
        Some(RealtimeRead { entry, data_lost })
    }

    /// Drop everything unread.
    pub fn clear(&mut self) {
        for s in &mut self.slots {
            *s = None;
        }
        self.rptr = self.wptr;
        self.lost = false;
    }
}

impl Default for RealtimeRing {
    fn default() -> Self {
        Self::new(CS_REALTIME_SUBEVENT_MAX)
    }
}
