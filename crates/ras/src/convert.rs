// Copyright 2025-2026 CEMAXECUTER LLC

//! Procedure format <-> protocol format.
//!
//! Protocol format is what goes over the air:
//! ```text
//!  ranging header(4)
//!  { subevent header(8) { mode(1) result(filtered) } x steps } x subevents
//! ```
//! The channel and length of every step are dropped; the length follows from
//! the mode and the step context. Bit 7 of the mode byte marks an aborted
//! step, which carries no result.

use cs_hci::CsStep;

use crate::error::{RasError, Result};
use crate::procedure::{parse_subevents, SubeventData};
use crate::step::{pack_step, unpack_step, FilterSettings, StepContext, FILTER_UNPACK_FILLER};
use crate::wire::{RangingHeader, SubeventHeader};

const STEP_ABORTED: u8 = 0x80;
const STEP_MODE_MASK: u8 = 0x03;

pub(crate) fn effective_context(header: &RangingHeader, ctx: &StepContext) -> StepContext {
    let n_ap = header.num_antenna_paths();
    StepContext {
        num_antenna_paths: if n_ap == 0 { ctx.num_antenna_paths } else { n_ap },
        ..*ctx
    }
}

/// Compact one subevent into protocol format.
pub fn subevent_to_protocol(se: &SubeventData, ctx: &StepContext, filter: &FilterSettings, out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&se.header.encode());
    for step in &se.steps {
        if step.mode > STEP_MODE_MASK {
            return Err(RasError::InvalidLength(format!("unknown step mode {}", step.mode)));
        }
        if step.data.is_empty() {
            out.push(step.mode | STEP_ABORTED);
            continue;
        }
        out.push(step.mode);
        out.extend(pack_step(step.mode, ctx, filter.mask(step.mode), &step.data)?);
    }
    Ok(())
}

/// Compact procedure-format `data` into ranging data.
pub fn procedure_to_protocol(
    header: &RangingHeader,
    data: &[u8],
    ctx: &StepContext,
    filter: &FilterSettings,
) -> Result<Vec<u8>> {
    let ctx = effective_context(header, ctx);
    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&header.encode());
    for se in parse_subevents(data)? {
        subevent_to_protocol(&se, &ctx, filter, &mut out)?;
    }
    Ok(out)
}

/// Rebuild procedure-format data from ranging data.
///
/// `step_channels` gives the channel of every step in order, as known from
/// the local side of the procedure; steps beyond it get
/// `FILTER_UNPACK_FILLER` as channel. Fields removed by `filter` are filled
/// with `FILTER_UNPACK_FILLER`.
pub fn protocol_data_to_procedure_data(
    protocol: &[u8],
    ctx: &StepContext,
    filter: &FilterSettings,
    step_channels: &[u8],
) -> Result<(RangingHeader, Vec<u8>)> {
    let header = RangingHeader::decode(protocol)?;
    let ctx = effective_context(&header, ctx);
    let mut pos = RangingHeader::LEN;
    let mut step_index = 0;
    let mut out = Vec::with_capacity(protocol.len() * 2);

    while pos < protocol.len() {
        let sh = SubeventHeader::decode(&protocol[pos..])?;
        pos += SubeventHeader::LEN;
        let mut steps = Vec::with_capacity(sh.num_steps_reported as usize);
        for _ in 0..sh.num_steps_reported {
            let mode_byte = *protocol.get(pos).ok_or(RasError::Truncated {
                what: "step mode",
                need: pos + 1,
                have: protocol.len(),
            })?;
            pos += 1;
            let mode = mode_byte & STEP_MODE_MASK;
            let data = if mode_byte & STEP_ABORTED != 0 {
                Vec::new()
            } else {
                let (data, used) = unpack_step(mode, &ctx, filter.mask(mode), &protocol[pos..])?;
                pos += used;
                data
            };
            let channel = step_channels.get(step_index).copied().unwrap_or(FILTER_UNPACK_FILLER);
            step_index += 1;
            steps.push(CsStep { mode, channel, data });
        }
        SubeventData { header: sh, steps }.write(&mut out);
    }
    Ok((header, out))
}
