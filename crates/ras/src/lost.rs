// Copyright 2025-2026 CEMAXECUTER LLC

use serde::Serialize;

/// Ranges of segment indices the client has not received.
pub const LOST_SEGMENT_RANGES_MAX: usize = 8;

/// Ascending, non-overlapping `[start, end]` ranges of lost segments. When
/// all entries are in use further losses widen the last entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LostSegments {
    ranges: Vec<(u32, u32)>,
}

impl LostSegments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self) -> &[(u32, u32)] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ranges.len() >= LOST_SEGMENT_RANGES_MAX
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn contains(&self, index: u32) -> bool {
        self.ranges.iter().any(|&(s, e)| s <= index && index <= e)
    }

    /// Record `[start, end]` as lost. Ranges arrive in ascending order as the
    /// receive cursor moves forward.
    pub fn record(&mut self, start: u32, end: u32) {
        if start > end {
            return;
        }
        let full = self.is_full();
        if let Some(last) = self.ranges.last_mut() {
            if start <= last.1.saturating_add(1) {
                last.1 = last.1.max(end);
                return;
            }
            if full {
                log::debug!("lost-segment record full, coalescing {}..={}", start, end);
                last.1 = last.1.max(end);
                return;
            }
        }
        self.ranges.push((start, end));
    }

    /// A previously lost segment arrived.
    pub fn mark_received(&mut self, index: u32) {
        let Some(pos) = self.ranges.iter().position(|&(s, e)| s <= index && index <= e) else {
            return;
        };
        let (s, e) = self.ranges[pos];
        if s == e {
            self.ranges.remove(pos);
        } else if index == s {
            self.ranges[pos].0 = s + 1;
        } else if index == e {
            self.ranges[pos].1 = e - 1;
        } else if !self.is_full() {
            self.ranges[pos] = (s, index - 1);
            self.ranges.insert(pos + 1, (index + 1, e));
        }
        // A full record keeps the range whole; the duplicate is ignored on
        // the next retrieval.
    }
}
