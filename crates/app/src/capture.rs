// Copyright 2025-2026 CEMAXECUTER LLC

//! Input file formats.
//!
//! Procedure captures are JSON lines, one procedure per line. HCI dumps are
//! text lines `<time_ms> <hex>` holding one HCI event packet each (event
//! code, parameter length, parameters). Blank lines and lines starting with
//! `#` are skipped in both.

use num_complex::Complex64;
use serde::Deserialize;

fn default_step_size() -> usize {
    1
}

/// Per-channel tone results of one procedure, both sides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcedureCapture {
    pub procedure: u16,
    /// Channel index of every entry, ascending and evenly spaced.
    pub channels: Vec<u8>,
    #[serde(default = "default_step_size")]
    pub step_size: usize,
    /// `[re, im]` per antenna path, per channel.
    pub initiator: Vec<Vec<[f64; 2]>>,
    pub reflector: Vec<Vec<[f64; 2]>>,
    /// Encoded initiator/reflector PES info pairs.
    #[serde(default)]
    pub pes: Vec<[i32; 2]>,
    /// Prior distance for the median estimator, metres.
    #[serde(default)]
    pub prior_m: Option<f64>,
}

impl ProcedureCapture {
    pub fn num_ap(&self) -> usize {
        self.initiator.len()
    }

    /// The channel plan must be ascending with a constant spacing of
    /// `step_size`, and every path must hold one tone per channel.
    pub fn validate(&self) -> Result<(), String> {
        if self.step_size == 0 {
            return Err(format!("procedure {}: step size 0", self.procedure));
        }
        if let Some(w) = self
            .channels
            .windows(2)
            .find(|w| w[1] as usize != w[0] as usize + self.step_size)
        {
            return Err(format!(
                "procedure {}: channels {} -> {} do not follow step {}",
                self.procedure, w[0], w[1], self.step_size
            ));
        }
        if self.initiator.is_empty() || self.reflector.len() != self.initiator.len() {
            return Err(format!(
                "procedure {}: {} initiator paths, {} reflector paths",
                self.procedure,
                self.initiator.len(),
                self.reflector.len()
            ));
        }
        let channum = self.channels.len();
        if let Some(p) = self.initiator.iter().chain(&self.reflector).find(|p| p.len() != channum) {
            return Err(format!(
                "procedure {}: path of {} tones for {} channels",
                self.procedure,
                p.len(),
                channum
            ));
        }
        Ok(())
    }
}

/// Flatten per-path tones into a path-major buffer.
pub fn path_major(paths: &[Vec<[f64; 2]>]) -> Vec<Complex64> {
    paths
        .iter()
        .flat_map(|p| p.iter().map(|&[re, im]| Complex64::new(re, im)))
        .collect()
}

fn skip(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

pub fn parse_capture_line(line: &str) -> Result<Option<ProcedureCapture>, String> {
    if skip(line) {
        return Ok(None);
    }
    let cap: ProcedureCapture = serde_json::from_str(line).map_err(|e| format!("bad capture: {}", e))?;
    cap.validate()?;
    Ok(Some(cap))
}

/// One controller event from an HCI dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciRecord {
    pub time_ms: u64,
    pub payload: Vec<u8>,
}

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(&digits).map_err(|e| format!("bad hex payload: {}", e))
}

pub fn parse_hci_line(line: &str) -> Result<Option<HciRecord>, String> {
    if skip(line) {
        return Ok(None);
    }
    let line = line.trim();
    let (time, hex) = line.split_once(char::is_whitespace).ok_or_else(|| format!("missing payload: {}", line))?;
    let time_ms = time.parse::<u64>().map_err(|e| format!("bad timestamp {:?}: {}", time, e))?;
    let payload = decode_hex(hex)?;
    if payload.is_empty() {
        return Err("empty payload".into());
    }
    Ok(Some(HciRecord { time_ms, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_line() {
        let line = r#"{"procedure": 3, "channels": [2, 3], "initiator": [[[1.0, 0.0], [0.0, 1.0]]],
                       "reflector": [[[1.0, 0.0], [1.0, 0.0]]], "pes": [[1, 2]]}"#;
        let cap = parse_capture_line(line).unwrap().unwrap();
        assert_eq!(cap.procedure, 3);
        assert_eq!(cap.step_size, 1);
        assert_eq!(cap.num_ap(), 1);
        assert_eq!(cap.prior_m, None);
        assert_eq!(path_major(&cap.initiator), vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)]);

        assert!(parse_capture_line("   ").unwrap().is_none());
        assert!(parse_capture_line("# comment").unwrap().is_none());
        assert!(parse_capture_line("{").is_err());
    }

    #[test]
    fn test_channel_plan_checked() {
        let line = |channels: &str, step: usize| {
            format!(
                r#"{{"procedure": 1, "channels": {}, "step_size": {}, "initiator": [[[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]]],
                    "reflector": [[[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]]]}}"#,
                channels, step
            )
        };
        assert!(parse_capture_line(&line("[2, 4, 6]", 2)).unwrap().is_some());
        assert!(parse_capture_line(&line("[2, 4, 5]", 1)).is_err());
        assert!(parse_capture_line(&line("[2, 4, 5]", 2)).is_err());
        assert!(parse_capture_line(&line("[6, 4, 2]", 2)).is_err());
        assert!(parse_capture_line(&line("[2, 3, 4]", 0)).is_err());

        let short = r#"{"procedure": 1, "channels": [2, 3, 4], "initiator": [[[1.0, 0.0], [1.0, 0.0]]],
                        "reflector": [[[1.0, 0.0], [1.0, 0.0]]]}"#;
        assert!(parse_capture_line(short).is_err());
    }

    #[test]
    fn test_hci_line() {
        let rec = parse_hci_line("1500 31 40 00 ff").unwrap().unwrap();
        assert_eq!(rec.time_ms, 1500);
        assert_eq!(rec.payload, vec![0x31, 0x40, 0x00, 0xFF]);

        let rec = parse_hci_line("7\t2c0a").unwrap().unwrap();
        assert_eq!(rec.payload, vec![0x2C, 0x0A]);

        assert!(parse_hci_line("12 abc").is_err());
        assert!(parse_hci_line("12 zz").is_err());
        assert!(parse_hci_line("x 00").is_err());
        assert!(parse_hci_line("12").is_err());
    }
}
