// Copyright 2025-2026 CEMAXECUTER LLC

use serde::{Deserialize, Serialize};

use crate::step::FilterSettings;

/// How completed procedures reach the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataExchange {
    /// Kept locally until taken by the application.
    Local,
    /// Streamed per subevent through the realtime ring.
    Realtime,
    /// Stored until the peer fetches it.
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasConfig {
    pub mechanism: DataExchange,
    pub timeouts_enabled: bool,
    /// Procedure slots per connection.
    pub procedure_count: usize,
    /// Segment size including its one-byte header (ATT MTU minus 3).
    pub segment_len: usize,
    pub filter: FilterSettings,
}

impl Default for RasConfig {
    fn default() -> Self {
        Self {
            mechanism: DataExchange::OnDemand,
            timeouts_enabled: true,
            procedure_count: 4,
            segment_len: 20,
            filter: FilterSettings::default(),
        }
    }
}
