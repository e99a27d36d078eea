// Copyright 2025-2026 CEMAXECUTER LLC

//! Antenna switching for tone steps.
//!
//! Each antenna element is selected by a pattern of levels on the switch
//! GPIOs. A tone step visits every antenna path once, in the order given by
//! the step's antenna permutation index, then repeats the last path for the
//! tone extension slot.

use serde::Serialize;

use crate::config::CsRole;
use crate::error::{HciError, Result};

/// Highest tone antenna configuration index.
pub const MAX_ACI: u8 = 7;
const MAX_ANTENNAS: usize = 4;
const MAX_SWITCH_PINS: usize = 8;

/// `(initiator antenna, reflector antenna)` of each path, per ACI.
fn aci_paths(aci: u8) -> &'static [(u8, u8)] {
    match aci {
        0 => &[(0, 0)],
        1 => &[(0, 0), (1, 0)],
        2 => &[(0, 0), (1, 0), (2, 0)],
        3 => &[(0, 0), (1, 0), (2, 0), (3, 0)],
        4 => &[(0, 0), (0, 1)],
        5 => &[(0, 0), (0, 1), (0, 2)],
        6 => &[(0, 0), (0, 1), (0, 2), (0, 3)],
        _ => &[(0, 0), (1, 0), (0, 1), (1, 1)],
    }
}

/// `index`-th lexicographic permutation of `0..n` (index taken modulo n!).
pub fn permutation(n: usize, index: usize) -> Vec<usize> {
    let mut pool: Vec<usize> = (0..n).collect();
    let fact: usize = (1..=n).product();
    let mut rem = index % fact.max(1);
    let mut out = Vec::with_capacity(n);
    for k in (1..=n).rev() {
        let block: usize = (1..k).product();
        let pick = rem / block;
        rem %= block;
        out.push(pool.remove(pick));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AntennaSwitch {
    pins: Vec<u8>,
    /// GPIO level pattern per antenna element, bit n drives `pins[n]`.
    patterns: Vec<u8>,
    active_config: u8,
}

impl AntennaSwitch {
    pub fn new(pins: Vec<u8>, patterns: Vec<u8>) -> Result<Self> {
        if pins.len() > MAX_SWITCH_PINS {
            return Err(HciError::InvalidField { field: "switch pin count", value: pins.len() as u32 });
        }
        if patterns.is_empty() || patterns.len() > MAX_ANTENNAS {
            return Err(HciError::InvalidField { field: "antenna count", value: patterns.len() as u32 });
        }
        let limit = 1u16 << pins.len();
        if let Some(&bad) = patterns.iter().find(|&&p| p as u16 >= limit) {
            return Err(HciError::InvalidField { field: "antenna pattern", value: bad as u32 });
        }
        Ok(Self {
            pins,
            patterns,
            active_config: 0,
        })
    }

    /// One antenna, no switch.
    pub fn single() -> Self {
        Self {
            pins: Vec::new(),
            patterns: vec![0],
            active_config: 0,
        }
    }

    pub fn num_antennas(&self) -> usize {
        self.patterns.len()
    }

    pub fn pins(&self) -> &[u8] {
        &self.pins
    }

    pub fn active_config(&self) -> u8 {
        self.active_config
    }

    pub fn select_config(&mut self, aci: u8) -> Result<()> {
        if aci > MAX_ACI {
            return Err(HciError::InvalidField { field: "antenna config index", value: aci as u32 });
        }
        self.active_config = aci;
        Ok(())
    }

    /// Local antenna element of each path under the active configuration.
    pub fn path_antennas(&self, role: CsRole) -> Vec<u8> {
        aci_paths(self.active_config)
            .iter()
            .map(|&(init, refl)| match role {
                CsRole::Initiator => init,
                CsRole::Reflector => refl,
            })
            .collect()
    }

    /// GPIO patterns for every tone slot of one step, extension slot last.
    pub fn tone_sequence(&self, role: CsRole, permutation_index: usize) -> Result<Vec<u8>> {
        let antennas = self.path_antennas(role);
        let order = permutation(antennas.len(), permutation_index);
        let mut seq = Vec::with_capacity(order.len() + 1);
        for &p in &order {
            let ant = antennas[p] as usize;
            let pattern = self.patterns.get(ant).copied().ok_or(HciError::InvalidField {
                field: "antenna element",
                value: ant as u32,
            })?;
            seq.push(pattern);
        }
        if let Some(&last) = seq.last() {
            seq.push(last);
        }
        Ok(seq)
    }
}

impl Default for AntennaSwitch {
    fn default() -> Self {
        Self::single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutations() {
        assert_eq!(permutation(3, 0), vec![0, 1, 2]);
        assert_eq!(permutation(3, 1), vec![0, 2, 1]);
        assert_eq!(permutation(3, 5), vec![2, 1, 0]);
        assert_eq!(permutation(3, 6), vec![0, 1, 2]);
        assert_eq!(permutation(1, 3), vec![0]);
    }

    #[test]
    fn test_tone_sequence_follows_config() {
        let mut sw = AntennaSwitch::new(vec![4, 5], vec![0b00, 0b01, 0b10, 0b11]).unwrap();
        sw.select_config(3).unwrap();
        // Initiator walks its 4 antennas, reflector stays on antenna 0
        assert_eq!(sw.tone_sequence(CsRole::Initiator, 0).unwrap(), vec![0, 1, 2, 3, 3]);
        assert_eq!(sw.tone_sequence(CsRole::Reflector, 0).unwrap(), vec![0; 5]);
        assert_eq!(sw.tone_sequence(CsRole::Initiator, 23).unwrap(), vec![3, 2, 1, 0, 0]);

        sw.select_config(7).unwrap();
        assert_eq!(sw.path_antennas(CsRole::Reflector), vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_missing_antenna_rejected() {
        let mut sw = AntennaSwitch::single();
        sw.select_config(1).unwrap();
        assert!(sw.tone_sequence(CsRole::Initiator, 0).is_err());
        assert_eq!(sw.tone_sequence(CsRole::Reflector, 0).unwrap(), vec![0, 0, 0]);
        assert!(sw.select_config(8).is_err());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(AntennaSwitch::new(vec![1], vec![0, 2]).is_err());
        assert!(AntennaSwitch::new(vec![1, 2], vec![]).is_err());
    }
}
