// Copyright 2025-2026 CEMAXECUTER LLC

//! HCI side of Channel Sounding: event shapes delivered by the controller,
//! capabilities and configurations, and the per-connection control block.

pub mod antenna;
pub mod caps;
pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod reader;

pub use antenna::AntennaSwitch;
pub use caps::CsCapabilities;
pub use config::{CsConfig, CsRole, RttType};
pub use control::{CsControlBlock, CsSessionManager, FaeExchange, ProcedureSeed};
pub use error::HciError;
pub use event::{
    parse_cs_event, parse_hci_event, AbortReasons, CsEvent, CsStep, DisconnectionComplete, DoneStatus, HciEvent,
    SubeventResult, SubeventResultContinue,
};
