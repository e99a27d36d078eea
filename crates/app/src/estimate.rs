// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex64;
use serde::Serialize;

use cs_dsp::cali::CaliTable;
use cs_dsp::combine::{dist_combine, DistType};
use cs_dsp::music::{tes_music, tes_music2, MusicResult};
use cs_dsp::pes::{pes_calc_dist_sdk, pes_dist_init, PesDistance, PesInfo};
use cs_dsp::tes::{calc_ipm_pct, tes_init, tes_phase, tes_phase_median, TesMedianResult, TesPhaseResult};
use cs_dsp::EstimationFailure;

use crate::capture::{path_major, ProcedureCapture};
use crate::config::{EstimatorConfig, TesEstimator};

/// Everything estimated for one procedure.
#[derive(Debug, Clone, Serialize)]
pub struct Estimate {
    pub procedure: u16,
    pub channels: usize,
    pub antenna_paths: usize,
    pub phase: TesPhaseResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<TesMedianResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music: Option<MusicResult>,
    pub tes_distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pes: Option<PesDistance>,
    /// Reported distance: fused when both estimates are usable.
    pub distance: f64,
    pub failure: Option<EstimationFailure>,
}

/// Run the configured estimators over one capture. `cali` compensates the
/// initiator side; reflector tones are taken as reported.
pub fn estimate_procedure(cfg: &EstimatorConfig, cali: &CaliTable, cap: &ProcedureCapture) -> Result<Estimate, String> {
    cap.validate()?;
    let channum = cap.channels.len();
    let num_ap = cap.num_ap();
    let params = tes_init(channum, cfg.fstep_hz, cap.step_size).map_err(|e| e.to_string())?;
    let init = path_major(&cap.initiator);
    let refl = path_major(&cap.reflector);
    let cali_init = cali.for_channels(&cap.channels);
    let cali_refl = vec![Complex64::new(1.0, 0.0); channum];
    let h = calc_ipm_pct(&params, num_ap, &init, &refl, &cali_init, &cali_refl).map_err(|e| e.to_string())?;

    let phase = tes_phase(&params, &h, &cfg.phase).map_err(|e| e.to_string())?;
    let mut median = None;
    let mut music = None;
    let (tes_distance, mut failure) = match cfg.estimator {
        TesEstimator::Phase => (phase.distance, phase.failure),
        TesEstimator::Median => {
            let prior = cap.prior_m.unwrap_or(phase.distance);
            let m = tes_phase_median(&params, &h, prior).map_err(|e| e.to_string())?;
            median = Some(m);
            (m.distance, phase.failure)
        }
        TesEstimator::Music | TesEstimator::Music2 => {
            let m = if cfg.estimator == TesEstimator::Music {
                tes_music(&params, &h, 0, &cfg.music)
            } else {
                tes_music2(&params, &h, &cfg.music)
            }
            .map_err(|e| e.to_string())?;
            music = Some(m);
            (m.distance, m.failure)
        }
    };

    let pes = if cap.pes.is_empty() {
        None
    } else {
        let pp = pes_dist_init(cfg.pes_average, cfg.range_mode).map_err(|e| e.to_string())?;
        let pairs: Vec<(PesInfo, PesInfo)> = cap
            .pes
            .iter()
            .map(|&[i, r]| (PesInfo::decode(i), PesInfo::decode(r)))
            .collect();
        Some(pes_calc_dist_sdk(&pp, &pairs))
    };

    let distance = match pes {
        Some(p) if cfg.combine && p.distance.is_finite() => dist_combine(
            tes_distance,
            cap.step_size as u32,
            DistType::Tes,
            p.distance,
            cap.step_size as u32,
            DistType::Pes,
        ),
        _ => tes_distance,
    };
    if failure.is_none() {
        failure = pes.and_then(|p| p.failure).filter(|_| !tes_distance.is_finite());
    }

    log::debug!(
        "procedure {}: tes {:.3} m, pes {:?}, reported {:.3} m",
        cap.procedure,
        tes_distance,
        pes.map(|p| p.distance),
        distance
    );

    Ok(Estimate {
        procedure: cap.procedure,
        channels: channum,
        antenna_paths: num_ap,
        phase,
        median,
        music,
        tes_distance,
        pes,
        distance,
        failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    // Each side sees half the two-way phase.
    fn capture(d: f64, n: usize) -> ProcedureCapture {
        let tone = |k: usize| {
            let f = k as f64 * 1e6;
            let phi = -2.0 * PI * f * d / cs_dsp::SPEED_OF_LIGHT;
            [phi.cos(), phi.sin()]
        };
        let path: Vec<[f64; 2]> = (0..n).map(tone).collect();
        ProcedureCapture {
            procedure: 1,
            channels: (2..2 + n as u8).collect(),
            step_size: 1,
            initiator: vec![path.clone()],
            reflector: vec![path],
            pes: Vec::new(),
            prior_m: None,
        }
    }

    #[test]
    fn test_phase_estimate_line_of_sight() {
        let cfg = EstimatorConfig::default();
        let e = estimate_procedure(&cfg, &CaliTable::unity(), &capture(7.5, 40)).unwrap();
        assert!((e.distance - 7.5).abs() < 0.05, "distance {}", e.distance);
        assert!(e.pes.is_none());
        assert!(e.music.is_none());
    }

    #[test]
    fn test_music2_estimate() {
        let cfg = EstimatorConfig {
            estimator: TesEstimator::Music2,
            ..EstimatorConfig::default()
        };
        let e = estimate_procedure(&cfg, &CaliTable::unity(), &capture(12.0, 40)).unwrap();
        assert!(e.music.is_some());
        assert!((e.tes_distance - 12.0).abs() < 0.2, "distance {}", e.tes_distance);
    }

    #[test]
    fn test_mismatched_paths_rejected() {
        let mut cap = capture(3.0, 10);
        cap.reflector.push(cap.reflector[0].clone());
        assert!(estimate_procedure(&EstimatorConfig::default(), &CaliTable::unity(), &cap).is_err());
    }

    #[test]
    fn test_uneven_channel_plan_rejected() {
        let mut cap = capture(3.0, 10);
        cap.channels[5] += 1;
        let err = estimate_procedure(&EstimatorConfig::default(), &CaliTable::unity(), &cap).unwrap_err();
        assert!(err.contains("step"), "{}", err);
    }

    #[test]
    fn test_combined_with_pes() {
        use cs_dsp::pes::PesInfo;

        let mut cap = capture(7.5, 40);
        let info = |toa_tod: i16| PesInfo { toa_tod, channel: 10, quality: 0 }.encode();
        cap.pes = vec![[info(60), info(10)]; 8];
        let e = estimate_procedure(&EstimatorConfig::default(), &CaliTable::unity(), &cap).unwrap();
        let pes = e.pes.expect("pes estimate missing");
        assert!((pes.distance - 3.75).abs() < 0.01, "{}", pes.distance);
        // the weighted blend lands between the two estimates
        assert!(e.distance > 3.7 && e.distance < 7.6, "{}", e.distance);
        assert!(e.failure.is_none());
    }
}
