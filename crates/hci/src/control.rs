// Copyright 2025-2026 CEMAXECUTER LLC

//! Per-connection Channel Sounding state.
//!
//! One `CsControlBlock` per ACL connection handle, owned by a
//! `CsSessionManager`. The manager is the only place that creates or clears
//! per-connection state, so a handle reused by a new connection always
//! starts from a clean block.

use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::antenna::AntennaSwitch;
use crate::caps::CsCapabilities;
use crate::config::{antenna_paths_for_aci, CsConfig, CsRole};
use crate::error::{HciError, Result};
use crate::event::{ConfigComplete, CsEvent, ProcedureEnableComplete, FAE_TABLE_LEN};

/// Frequency actuation error table exchange progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaeExchange {
    None,
    /// Requested the peer's table, not received yet.
    WaitingForPeer,
    /// Our table is being sent to the peer.
    Sending,
    Done,
}

/// Values the ranging header of each procedure is seeded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcedureSeed {
    pub config_id: u8,
    pub selected_tx_power: i8,
    pub num_antenna_paths: u8,
}

impl ProcedureSeed {
    /// One bit per antenna path in use.
    pub fn antenna_paths_mask(&self) -> u8 {
        ((1u16 << self.num_antenna_paths.min(4)) - 1) as u8
    }
}

#[derive(Debug, Clone)]
pub struct CsControlBlock {
    pub handle: u16,
    pub role: CsRole,
    pub local_caps: CsCapabilities,
    pub remote_caps: Option<CsCapabilities>,
    pub fae_state: FaeExchange,
    pub fae_table: Option<Vec<i8>>,
    pub security_enabled: bool,
    pub configs: HashMap<u8, CsConfig>,
    pub procedure: Option<ProcedureSeed>,
    pub antenna: AntennaSwitch,
}

impl CsControlBlock {
    fn new(handle: u16, role: CsRole, local_caps: CsCapabilities, antenna: AntennaSwitch) -> Self {
        Self {
            handle,
            role,
            local_caps,
            remote_caps: None,
            fae_state: FaeExchange::None,
            fae_table: None,
            security_enabled: false,
            configs: HashMap::new(),
            procedure: None,
            antenna,
        }
    }

    pub fn config(&self, config_id: u8) -> Option<&CsConfig> {
        self.configs.get(&config_id)
    }

    /// Ready to start procedures: capabilities known, security done and at
    /// least one configuration present.
    pub fn ready(&self) -> bool {
        self.remote_caps.is_some() && self.security_enabled && !self.configs.is_empty()
    }

    /// Ask the peer for its FAE table.
    pub fn request_fae(&mut self) -> Result<()> {
        match self.fae_state {
            FaeExchange::None | FaeExchange::Done => {
                self.fae_state = FaeExchange::WaitingForPeer;
                Ok(())
            }
            s => Err(HciError::InvalidState(format!("FAE request while {:?}", s))),
        }
    }

    /// Start sending our own table (reflector side).
    pub fn start_fae_send(&mut self) -> Result<()> {
        match self.fae_state {
            FaeExchange::None | FaeExchange::Done => {
                self.fae_state = FaeExchange::Sending;
                Ok(())
            }
            s => Err(HciError::InvalidState(format!("FAE send while {:?}", s))),
        }
    }

    pub fn fae_sent(&mut self) -> Result<()> {
        if self.fae_state != FaeExchange::Sending {
            return Err(HciError::InvalidState(format!("FAE sent while {:?}", self.fae_state)));
        }
        self.fae_state = FaeExchange::Done;
        Ok(())
    }

    pub fn fae_received(&mut self, table: Vec<i8>) -> Result<()> {
        if self.fae_state != FaeExchange::WaitingForPeer {
            return Err(HciError::InvalidState(format!("unsolicited FAE table while {:?}", self.fae_state)));
        }
        if table.len() != FAE_TABLE_LEN {
            return Err(HciError::InvalidField {
                field: "FAE table length",
                value: table.len() as u32,
            });
        }
        self.fae_table = Some(table);
        self.fae_state = FaeExchange::Done;
        Ok(())
    }

    fn apply_config(&mut self, ev: &ConfigComplete) {
        if ev.action == 0 {
            self.configs.remove(&ev.config.config_id);
        } else {
            self.configs.insert(ev.config.config_id, ev.config.clone());
        }
    }

    fn apply_procedure_enable(&mut self, ev: &ProcedureEnableComplete) -> Result<()> {
        if ev.state == 0 {
            self.procedure = None;
            return Ok(());
        }
        if !self.configs.contains_key(&ev.config_id) {
            return Err(HciError::InvalidState(format!("procedure enabled for unknown config {}", ev.config_id)));
        }
        self.procedure = Some(ProcedureSeed {
            config_id: ev.config_id,
            selected_tx_power: ev.selected_tx_power,
            num_antenna_paths: antenna_paths_for_aci(ev.tone_antenna_config)?,
        });
        self.antenna.select_config(ev.tone_antenna_config)?;
        Ok(())
    }
}

/// All connections' CS state, keyed by ACL connection handle.
#[derive(Debug, Default)]
pub struct CsSessionManager {
    blocks: HashMap<u16, CsControlBlock>,
    local_caps: CsCapabilities,
}

impl CsSessionManager {
    pub fn new(local_caps: CsCapabilities) -> Self {
        Self {
            blocks: HashMap::new(),
            local_caps,
        }
    }

    /// Create the block for a new connection. An existing block for the
    /// handle is replaced.
    pub fn create(&mut self, handle: u16, role: CsRole, antenna: AntennaSwitch) -> &mut CsControlBlock {
        let block = CsControlBlock::new(handle, role, self.local_caps.clone(), antenna);
        match self.blocks.entry(handle) {
            Entry::Occupied(mut e) => {
                log::warn!("replacing CS state of handle {:#06x}", handle);
                e.insert(block);
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(block),
        }
    }

    pub fn get(&self, handle: u16) -> Result<&CsControlBlock> {
        self.blocks.get(&handle).ok_or(HciError::UnknownHandle(handle))
    }

    pub fn get_mut(&mut self, handle: u16) -> Result<&mut CsControlBlock> {
        self.blocks.get_mut(&handle).ok_or(HciError::UnknownHandle(handle))
    }

    pub fn handles(&self) -> Vec<u16> {
        let mut h: Vec<u16> = self.blocks.keys().copied().collect();
        h.sort_unstable();
        h
    }

    /// Drop everything known about a connection (disconnect).
    pub fn reset_by_handle(&mut self, handle: u16) -> bool {
        let removed = self.blocks.remove(&handle).is_some();
        if removed {
            log::info!("CS state of handle {:#06x} reset", handle);
        }
        removed
    }

    /// Update connection state from a controller event. Result events carry
    /// no control state and are ignored here.
    pub fn handle_event(&mut self, ev: &CsEvent) -> Result<()> {
        let handle = ev.handle();
        let block = self.get_mut(handle)?;
        match ev {
            CsEvent::RemoteCaps(e) if e.status == 0 => block.remote_caps = Some(e.caps.clone()),
            CsEvent::RemoteFae(e) if e.status == 0 => block.fae_received(e.table.clone())?,
            CsEvent::SecurityEnable(e) => block.security_enabled = e.status == 0,
            CsEvent::Config(e) if e.status == 0 => block.apply_config(e),
            CsEvent::ProcedureEnable(e) if e.status == 0 => block.apply_procedure_enable(e)?,
            CsEvent::SubeventResult(_) | CsEvent::SubeventResultContinue(_) => {}
            other => log::debug!("handle {:#06x}: failed CS event {:?}", handle, other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RttType;
    use crate::event::{RemoteCapsComplete, RemoteFaeComplete, SecurityEnableComplete};

    fn config(id: u8) -> CsConfig {
        CsConfig {
            config_id: id,
            main_mode_type: 2,
            sub_mode_type: 0xFF,
            min_main_mode_steps: 2,
            max_main_mode_steps: 5,
            main_mode_repetition: 0,
            mode_0_steps: 3,
            role: CsRole::Initiator,
            rtt_type: RttType::AaOnly,
            cs_sync_phy: 1,
            channel_map: [0xFF; 10],
            channel_map_repetition: 1,
            channel_selection_type: 0,
            ch3c_shape: 0,
            ch3c_jump: 2,
            t_ip1_us: 145,
            t_ip2_us: 145,
            t_fcs_us: 150,
            t_pm_us: 40,
        }
    }

    fn enable(handle: u16, config_id: u8, aci: u8) -> ProcedureEnableComplete {
        ProcedureEnableComplete {
            status: 0,
            handle,
            config_id,
            state: 1,
            tone_antenna_config: aci,
            selected_tx_power: 3,
            subevent_len_us: 5000,
            subevents_per_event: 1,
            subevent_interval: 0,
            event_interval: 1,
            procedure_interval: 4,
            procedure_count: 0,
            max_procedure_len: 100,
        }
    }

    fn populated() -> CsSessionManager {
        let mut mgr = CsSessionManager::new(CsCapabilities::default());
        mgr.create(0x10, CsRole::Initiator, AntennaSwitch::new(vec![2, 3], vec![0b00, 0b01, 0b10, 0b11]).unwrap());
        let events = vec![
            CsEvent::RemoteCaps(RemoteCapsComplete {
                status: 0,
                handle: 0x10,
                caps: CsCapabilities { max_antenna_paths: 4, ..Default::default() },
            }),
            CsEvent::SecurityEnable(SecurityEnableComplete { status: 0, handle: 0x10 }),
            CsEvent::Config(ConfigComplete { status: 0, handle: 0x10, action: 1, config: config(1) }),
            CsEvent::ProcedureEnable(enable(0x10, 1, 4)),
        ];
        for ev in &events {
            mgr.handle_event(ev).unwrap();
        }
        mgr
    }

    #[test]
    fn test_events_build_state() {
        let mgr = populated();
        let block = mgr.get(0x10).unwrap();
        assert!(block.ready());
        assert_eq!(block.config(1).unwrap().channels().len(), 72);
        let seed = block.procedure.unwrap();
        assert_eq!(seed.num_antenna_paths, 2);
        assert_eq!(seed.antenna_paths_mask(), 0b11);
        assert_eq!(seed.selected_tx_power, 3);
    }

    #[test]
    fn test_enable_for_unknown_config_rejected() {
        let mut mgr = populated();
        let err = mgr.handle_event(&CsEvent::ProcedureEnable(enable(0x10, 9, 0)));
        assert!(matches!(err, Err(HciError::InvalidState(_))));
    }

    #[test]
    fn test_fae_exchange() {
        let mut mgr = populated();
        let ev = CsEvent::RemoteFae(RemoteFaeComplete { status: 0, handle: 0x10, table: vec![1; FAE_TABLE_LEN] });
        // Table without a request is refused
        assert!(mgr.handle_event(&ev).is_err());
        mgr.get_mut(0x10).unwrap().request_fae().unwrap();
        assert_eq!(mgr.get(0x10).unwrap().fae_state, FaeExchange::WaitingForPeer);
        assert!(mgr.get_mut(0x10).unwrap().start_fae_send().is_err());
        mgr.handle_event(&ev).unwrap();
        let block = mgr.get(0x10).unwrap();
        assert_eq!(block.fae_state, FaeExchange::Done);
        assert_eq!(block.fae_table.as_ref().unwrap().len(), FAE_TABLE_LEN);

        let block = mgr.get_mut(0x10).unwrap();
        block.start_fae_send().unwrap();
        block.fae_sent().unwrap();
        assert!(block.fae_sent().is_err());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut mgr = populated();
        mgr.get_mut(0x10).unwrap().request_fae().unwrap();
        assert!(mgr.reset_by_handle(0x10));
        assert!(matches!(mgr.get(0x10), Err(HciError::UnknownHandle(0x10))));
        assert!(!mgr.reset_by_handle(0x10));

        // Reused handle starts clean
        let block = mgr.create(0x10, CsRole::Reflector, AntennaSwitch::single());
        assert_eq!(block.fae_state, FaeExchange::None);
        assert!(block.remote_caps.is_none());
        assert!(block.configs.is_empty());
        assert!(block.procedure.is_none());
        assert!(!block.security_enabled);
        assert_eq!(block.antenna.active_config(), 0);
    }

    #[test]
    fn test_events_for_unknown_handle() {
        let mut mgr = CsSessionManager::default();
        let ev = CsEvent::SecurityEnable(SecurityEnableComplete { status: 0, handle: 5 });
        assert_eq!(mgr.handle_event(&ev), Err(HciError::UnknownHandle(5)));
    }
}
