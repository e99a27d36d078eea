// Copyright 2025-2026 CEMAXECUTER LLC

use serde::Serialize;
use thiserror::Error;

/// Caller-contract violations, reported before any computation starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("buffer too long: {len} > {max}")]
    BufferTooLong { len: usize, max: usize },

    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, DspError>;

/// Why an estimator could only produce a best-effort value.
///
/// This is not an error: the estimator still returns a distance, the caller
/// decides whether to trust it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EstimationFailure {
    /// Fewer usable channels than the estimator needs.
    TooFewChannels,
    /// Smoothed covariance has fewer subarrays than the minimum separation.
    RankDeficient,
    /// No peak above the minimum level was found.
    NoPeak,
}

/// Reject buffers longer than `max`.
pub(crate) fn check_max_len(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(DspError::BufferTooLong { len, max });
    }
    Ok(())
}

/// Reject buffers whose length differs from `expected`.
pub(crate) fn check_len(actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(DspError::LengthMismatch { expected, actual });
    }
    Ok(())
}
