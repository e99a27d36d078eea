// Copyright 2025-2026 CEMAXECUTER LLC

//! Ranging Service data handling: collecting CS subevent results into
//! procedures, compacting them into ranging data, and moving that data to
//! the peer in segments.

pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod event;
pub mod lost;
pub mod procedure;
pub mod realtime;
pub mod segment;
pub mod server;
pub mod step;
pub mod wire;

pub use client::{ClientAction, ClientMode, RangingData, RasClient};
pub use config::{DataExchange, RasConfig};
pub use convert::{procedure_to_protocol, protocol_data_to_procedure_data};
pub use error::RasError;
pub use event::{RasEvent, RasTimerType};
pub use procedure::{parse_subevents, Procedure, SubeventData};
pub use server::RasServer;
pub use step::{FilterSettings, StepContext};
pub use wire::{RangingHeader, SegmentHeader, SubeventHeader};
