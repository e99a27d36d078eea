// Copyright 2025-2026 CEMAXECUTER LLC

use std::path::Path;

use cs_dsp::music::MusicConfig;
use cs_dsp::pes::RangeMode;
use cs_dsp::tes::PhaseConfig;
use cs_ras::RasConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Which TES estimator produces the reported phase distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TesEstimator {
    Phase,
    Median,
    /// MUSIC on the first antenna path.
    Music,
    /// MUSIC over all antenna paths.
    Music2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Spacing of adjacent CS channels, Hz.
    pub fstep_hz: f64,
    pub estimator: TesEstimator,
    pub phase: PhaseConfig,
    pub music: MusicConfig,
    /// PES pairs averaged per procedure.
    pub pes_average: usize,
    pub range_mode: RangeMode,
    /// Fuse the TES and PES estimates when both are available.
    pub combine: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            fstep_hz: cs_dsp::CS_CHANNEL_SPACING_HZ,
            estimator: TesEstimator::Phase,
            phase: PhaseConfig::default(),
            music: MusicConfig::default(),
            pes_average: 8,
            range_mode: RangeMode::RoundTrip,
            combine: true,
        }
    }
}

/// Load a JSON config, or the defaults when no path is given.
pub fn load<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T, String> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))
}

/// Both configs side by side, as accepted by `--config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub estimator: EstimatorConfig,
    pub ras: RasConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"estimator": {"estimator": "music2", "music": {"sig_threshold": 0.2}},
                "ras": {"mechanism": "realtime", "segment_len": 64}}"#,
        )
        .unwrap();
        assert_eq!(cfg.estimator.estimator, TesEstimator::Music2);
        assert_eq!(cfg.estimator.music.sig_threshold, 0.2);
        assert_eq!(cfg.estimator.music.max_iter_eig, MusicConfig::default().max_iter_eig);
        assert_eq!(cfg.estimator.fstep_hz, 1e6);
        assert_eq!(cfg.ras.mechanism, cs_ras::DataExchange::Realtime);
        assert_eq!(cfg.ras.segment_len, 64);
        assert_eq!(cfg.ras.procedure_count, RasConfig::default().procedure_count);
    }

    #[test]
    fn test_load_without_path() {
        let cfg: AppConfig = load(None).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }
}
