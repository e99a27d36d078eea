// Copyright 2025-2026 CEMAXECUTER LLC

//! Events raised by the server and client state machines, and their timers.
//!
//! All times are milliseconds of a caller-supplied monotonic clock.

use serde::Serialize;

/// Unretrieved procedure data is dropped after this long without activity.
pub const PROCEDURE_DATA_TIMEOUT_MS: u64 = 10_000;
/// Client wait for the server to report ranging data ready.
pub const RANGING_DATA_READY_TIMEOUT_MS: u64 = 5_000;
/// Client wait for the first on-demand segment, then between segments.
pub const ON_DEMAND_DATA_TIMEOUT_MS: u64 = 5_000;
pub const ON_DEMAND_DATA_TIMEOUT_CONTINUE_MS: u64 = 1_000;
/// Same for realtime notifications.
pub const REALTIME_DATA_TIMEOUT_MS: u64 = 5_000;
pub const REALTIME_DATA_TIMEOUT_CONTINUE_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RasTimerType {
    /// Server: procedure held locally was never retrieved.
    LocalData,
    /// Client: no ranging-data-ready indication.
    RangingDataReady,
    /// Client: on-demand segments stopped arriving.
    OnDemandData,
    /// Client: realtime segments stopped arriving.
    RealtimeData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RasEvent {
    ProcedureComplete {
        counter: u16,
        aborted: bool,
        data_len: usize,
    },
    /// On-demand data can be fetched by the peer.
    DataReady { counter: u16 },
    /// A procedure was evicted before the peer retrieved it.
    Overwritten { counter: u16 },
    Timeout {
        timer: RasTimerType,
        counter: Option<u16>,
    },
    /// Realtime subevents were dropped before this procedure's data was sent.
    RealtimeDataLost { counter: u16 },
}
