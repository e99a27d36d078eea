// Copyright 2025-2026 CEMAXECUTER LLC

//! Fusion of two distance estimates.
//!
//! A phase-based estimate over channels `step` MHz apart is precise but only
//! known modulo its range period; a time-of-flight estimate is coarse but
//! unambiguous. The estimate with the shorter period is moved to the period
//! multiple closest to the other one before averaging.

use serde::{Deserialize, Serialize};

use crate::{CS_CHANNEL_SPACING_HZ, SPEED_OF_LIGHT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistType {
    /// Tone exchange (phase based).
    Tes,
    /// Packet exchange (time of flight).
    Pes,
}

/// Relative weight of a time-of-flight estimate against a phase estimate
/// over adjacent channels.
const PES_WEIGHT: f64 = 0.1;

fn range_period(step: u32, kind: DistType) -> f64 {
    match kind {
        DistType::Tes if step > 0 => SPEED_OF_LIGHT / (2.0 * step as f64 * CS_CHANNEL_SPACING_HZ),
        _ => f64::INFINITY,
    }
}

fn weight(step: u32, kind: DistType) -> f64 {
    match kind {
        DistType::Tes => step.max(1) as f64,
        DistType::Pes => PES_WEIGHT,
    }
}

/// Combine estimate `n` (over channel step `step_n`) with estimate `m`.
///
/// Equal step and type average directly. A non-finite estimate is ignored;
/// if both are non-finite the result is NaN.
pub fn dist_combine(dist_n: f64, step_n: u32, type_n: DistType, dist_m: f64, step_m: u32, type_m: DistType) -> f64 {
    match (dist_n.is_finite(), dist_m.is_finite()) {
        (false, false) => return f64::NAN,
        (true, false) => return dist_n,
        (false, true) => return dist_m,
        (true, true) => {}
    }
    if step_n == step_m && type_n == type_m {
        return 0.5 * (dist_n + dist_m);
    }

    let period_n = range_period(step_n, type_n);
    let period_m = range_period(step_m, type_m);
    let (mut fine, period, w_fine, coarse, w_coarse) = if period_n <= period_m {
        (dist_n, period_n, weight(step_n, type_n), dist_m, weight(step_m, type_m))
    } else {
        (dist_m, period_m, weight(step_m, type_m), dist_n, weight(step_n, type_n))
    };
    if period.is_finite() {
        fine += ((coarse - fine) / period).round() * period;
    }
    (fine * w_fine + coarse * w_coarse) / (w_fine + w_coarse)
}
