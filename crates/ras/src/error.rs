// Copyright 2025-2026 CEMAXECUTER LLC

use cs_hci::HciError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RasError {
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("invalid length: {0}")]
    InvalidLength(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("unknown procedure {0}")]
    UnknownProcedure(u16),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Hci(#[from] HciError),
}

pub type Result<T> = std::result::Result<T, RasError>;

pub(crate) fn need(what: &'static str, buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(RasError::Truncated {
            what,
            need,
            have: buf.len(),
        });
    }
    Ok(())
}
