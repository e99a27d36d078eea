// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Zero-padded inverse FFT used to turn a per-channel frequency response into
/// a delay profile.
///
/// A response `H(f_k) = exp(-j 2 pi f_k tau)` sampled on `k * df` lands in bin
/// `m = size * df * tau` of the inverse transform, so delay grows with the bin
/// index. A forward transform would mirror the profile.
pub struct DelayFft {
    fft: Arc<dyn Fft<f64>>,
    size: usize,
    scratch: Vec<Complex64>,
}

impl DelayFft {
    /// Create an inverse FFT of `size` points.
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_inverse(size);
        let scratch_len = fft.get_inplace_scratch_len();
        Self {
            fft,
            size,
            scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
        }
    }

    /// Transform `input` (at most `size` points, zero padded) and return the
    /// magnitude of every bin.
    pub fn magnitude(&mut self, input: &[Complex64]) -> Vec<f64> {
        assert!(
            input.len() <= self.size,
            "input length {} > FFT size {}",
            input.len(),
            self.size
        );
        let mut buffer = vec![Complex64::new(0.0, 0.0); self.size];
        buffer[..input.len()].copy_from_slice(input);
        self.fft.process_with_scratch(&mut buffer, &mut self.scratch);
        buffer.iter().map(|c| c.norm()).collect()
    }

    /// Transform a full-length buffer in place.
    pub fn process(&mut self, buffer: &mut [Complex64]) {
        assert_eq!(
            buffer.len(),
            self.size,
            "buffer length {} != FFT size {}",
            buffer.len(),
            self.size
        );
        self.fft.process_with_scratch(buffer, &mut self.scratch);
    }
}

/// Smallest power of two that is at least `n * oversample`.
pub fn padded_size(n: usize, oversample: usize) -> usize {
    (n.max(1) * oversample.max(1)).next_power_of_two()
}
