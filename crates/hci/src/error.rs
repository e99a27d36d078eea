// Copyright 2025-2026 CEMAXECUTER LLC

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HciError {
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("invalid {field}: {value:#x}")]
    InvalidField { field: &'static str, value: u32 },

    #[error("unknown connection handle {0:#06x}")]
    UnknownHandle(u16),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, HciError>;
