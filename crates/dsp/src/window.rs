// Copyright 2025-2026 CEMAXECUTER LLC

//! Taper applied across channels before the delay-profile transform.

use num_complex::Complex64;

/// Zeroth-order modified Bessel function of the first kind, power series.
fn bessel_i0(x: f64) -> f64 {
    let q = 0.25 * x * x;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut k = 1.0;
    while k <= 30.0 {
        term *= q / (k * k);
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
        k += 1.0;
    }
    sum
}

/// Kaiser taper of `n` points; `beta` trades mainlobe width for sidelobe level.
pub fn kaiser(n: usize, beta: f64) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let norm = 1.0 / bessel_i0(beta);
            let half = (n - 1) as f64 / 2.0;
            (0..n)
                .map(|i| {
                    let r = (i as f64 - half) / half;
                    bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) * norm
                })
                .collect()
        }
    }
}

/// Multiply a per-channel response by `taper`, entry by entry.
pub fn apply(response: &[Complex64], taper: &[f64]) -> Vec<Complex64> {
    response.iter().zip(taper).map(|(c, &w)| c * w).collect()
}
