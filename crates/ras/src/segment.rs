// Copyright 2025-2026 CEMAXECUTER LLC

//! Splitting ranging data into segments and recovering absolute indices.

use crate::error::{RasError, Result};
use crate::wire::{SegmentHeader, SEGMENT_COUNTER_MODULO};

/// Payload bytes per segment for a given segment size (header included).
fn payload_len(segment_len: usize) -> Result<usize> {
    if segment_len < 2 {
        return Err(RasError::InvalidLength(format!("segment size {} too small", segment_len)));
    }
    Ok(segment_len - 1)
}

pub fn segment_count(data_len: usize, segment_len: usize) -> Result<u32> {
    let payload = payload_len(segment_len)?;
    Ok(data_len.div_ceil(payload).max(1) as u32)
}

/// Build segment `index` (0-based) of `data`.
pub fn segment_at(data: &[u8], segment_len: usize, index: u32) -> Result<Vec<u8>> {
    let payload = payload_len(segment_len)?;
    let count = segment_count(data.len(), segment_len)?;
    if index >= count {
        return Err(RasError::InvalidLength(format!("segment {} of {}", index, count)));
    }
    let start = index as usize * payload;
    let end = (start + payload).min(data.len());
    let header = SegmentHeader {
        first: index == 0,
        last: index + 1 == count,
        counter: (index % SEGMENT_COUNTER_MODULO) as u8,
    };
    let mut seg = Vec::with_capacity(1 + end - start);
    seg.push(header.encode());
    seg.extend_from_slice(&data[start..end]);
    Ok(seg)
}

/// Split `data` into segments of at most `segment_len` bytes.
pub fn split_segments(data: &[u8], segment_len: usize) -> Result<Vec<Vec<u8>>> {
    let count = segment_count(data.len(), segment_len)?;
    (0..count).map(|i| segment_at(data, segment_len, i)).collect()
}

/// Absolute index of a segment carrying `counter`, given the next expected
/// absolute index. Up to 63 missing segments are recognized.
pub fn absolute_index(expected: u32, counter: u8) -> u32 {
    let delta = (counter as u32 + SEGMENT_COUNTER_MODULO - expected % SEGMENT_COUNTER_MODULO) % SEGMENT_COUNTER_MODULO;
    expected + delta
}
