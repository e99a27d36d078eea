// Copyright 2025-2026 CEMAXECUTER LLC

//! Small numeric helpers shared by every estimator.

use num_complex::Complex64;
use std::f64::consts::PI;

/// Wrap a phase into (-pi, pi].
#[inline]
pub fn wrap_phase(phase: f64) -> f64 {
    let mut p = phase % (2.0 * PI);
    if p <= -PI {
        p += 2.0 * PI;
    } else if p > PI {
        p -= 2.0 * PI;
    }
    p
}

/// Classic sequential unwrap: each step is limited to (-pi, pi].
pub fn unwrap_phase(phases: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phases.len());
    let mut prev = match phases.first() {
        Some(&p) => p,
        None => return out,
    };
    out.push(prev);
    for &p in &phases[1..] {
        let next = prev + wrap_phase(p - prev);
        out.push(next);
        prev = next;
    }
    out
}

/// Median of a slice (sorted in place). NaN for an empty slice.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}

/// Sliding median of odd width `width`. Edges reuse the nearest full window.
pub fn median_filter(values: &[f64], width: usize) -> Vec<f64> {
    if width <= 1 || values.len() < width {
        return values.to_vec();
    }
    let half = width / 2;
    let mut scratch = Vec::with_capacity(width);
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half).min(values.len() - width);
            scratch.clear();
            scratch.extend_from_slice(&values[start..start + width]);
            median(&mut scratch)
        })
        .collect()
}

/// Index and value of the largest element. `None` for empty input or all-NaN.
pub fn peak_search(values: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// Vertex offset of the parabola through three equally spaced points.
///
/// Returns a value in [-0.5, 0.5] relative to the centre sample; 0 when the
/// points are collinear.
pub fn parabolic_offset(left: f64, centre: f64, right: f64) -> f64 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < 1e-18 {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Least-squares line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    /// Root-mean-square residual.
    pub rms: f64,
}

/// Fit a line through `(x[i], y[i])`. `inv_den` is `1 / sum((x - mean_x)^2)`,
/// which callers precompute once per channel plan.
pub fn linear_fit(x: &[f64], y: &[f64], inv_den: f64) -> LineFit {
    let n = x.len().min(y.len());
    if n == 0 {
        return LineFit { slope: 0.0, intercept: 0.0, rms: 0.0 };
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    for i in 0..n {
        num += (x[i] - mean_x) * (y[i] - mean_y);
    }
    let slope = num * inv_den;
    let intercept = mean_y - slope * mean_x;
    let mut sq = 0.0;
    for i in 0..n {
        let r = y[i] - (slope * x[i] + intercept);
        sq += r * r;
    }
    LineFit {
        slope,
        intercept,
        rms: (sq / n as f64).sqrt(),
    }
}

/// Normalized correlation of `template` against `signal[offset..]`.
/// Zero when the window carries no energy or runs past the end.
pub fn normalized_correlation(signal: &[f64], template: &[f64], offset: usize) -> f64 {
    let tlen = template.len();
    if offset + tlen > signal.len() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut win_sq = 0.0;
    let mut tpl_sq = 0.0;
    for j in 0..tlen {
        let s = signal[offset + j];
        dot += s * template[j];
        win_sq += s * s;
        tpl_sq += template[j] * template[j];
    }
    let norm = (win_sq * tpl_sq).sqrt();
    if norm > 1e-12 {
        dot / norm
    } else {
        0.0
    }
}

/// FM discriminator: arg(y[n] * conj(y[n-1])), radians per sample.
/// The first output is taken against a zero-phase reference.
pub fn freq_discriminate(iq: &[Complex64]) -> Vec<f64> {
    let mut prev = Complex64::new(1.0, 0.0);
    let mut out = Vec::with_capacity(iq.len());
    for &s in iq {
        let product = s * prev.conj();
        out.push(product.arg());
        prev = s;
    }
    out
}

/// Coherent mean of a block of phasors.
pub fn mean_phasor(samples: &[Complex64]) -> Complex64 {
    if samples.is_empty() {
        return Complex64::new(0.0, 0.0);
    }
    samples.iter().sum::<Complex64>() / samples.len() as f64
}

/// Convert a signed fixed-point integer with `frac_bits` fractional bits.
#[inline]
pub fn fixed_to_f64(raw: i32, frac_bits: u32) -> f64 {
    raw as f64 / (1u64 << frac_bits) as f64
}

/// Convert to a signed fixed-point integer with `frac_bits` fractional bits,
/// saturating at the i32 range.
#[inline]
pub fn f64_to_fixed(value: f64, frac_bits: u32) -> i32 {
    let scaled = (value * (1u64 << frac_bits) as f64).round();
    scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_phase_range() {
        for k in -20..20 {
            let p = wrap_phase(k as f64 * 0.7);
            assert!(p > -PI - 1e-12 && p <= PI + 1e-12, "wrap_phase gave {}", p);
        }
        assert!((wrap_phase(2.0 * PI + 0.5) - 0.5).abs() < 1e-9);
        assert!((wrap_phase(-2.0 * PI - 0.5) + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_unwrap_linear_ramp() {
        let ramp: Vec<f64> = (0..50).map(|i| -0.9 * i as f64).collect();
        let wrapped: Vec<f64> = ramp.iter().map(|&p| wrap_phase(p)).collect();
        let unwrapped = unwrap_phase(&wrapped);
        for (a, b) in ramp.iter().zip(unwrapped.iter()) {
            assert!((a - b).abs() < 1e-9, "unwrap mismatch {} vs {}", a, b);
        }
    }

    #[test]
    fn test_median_even_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&mut []).is_nan());
    }

    #[test]
    fn test_median_filter_rejects_spike() {
        let mut v = vec![1.0; 21];
        v[10] = 100.0;
        let f = median_filter(&v, 5);
        assert_eq!(f.len(), v.len());
        assert!(f.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_parabolic_offset_symmetric() {
        assert_eq!(parabolic_offset(1.0, 2.0, 1.0), 0.0);
        // Vertex of -(x-0.25)^2 sampled at -1, 0, 1
        let f = |x: f64| -(x - 0.25) * (x - 0.25);
        let off = parabolic_offset(f(-1.0), f(0.0), f(1.0));
        assert!((off - 0.25).abs() < 1e-12, "offset {}", off);
    }

    #[test]
    fn test_linear_fit_exact() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| 2.5 * v - 1.0).collect();
        let mean = 4.5;
        let den: f64 = x.iter().map(|&v| (v - mean) * (v - mean)).sum();
        let fit = linear_fit(&x, &y, 1.0 / den);
        assert!((fit.slope - 2.5).abs() < 1e-12);
        assert!((fit.intercept + 1.0).abs() < 1e-12);
        assert!(fit.rms < 1e-12);
    }

    #[test]
    fn test_normalized_correlation_match() {
        let tpl = [1.0, -1.0, 1.0, 1.0, -1.0];
        let mut sig = vec![0.0; 3];
        sig.extend(tpl.iter().map(|v| v * 0.3));
        assert!((normalized_correlation(&sig, &tpl, 3) - 1.0).abs() < 1e-12);
        assert_eq!(normalized_correlation(&sig, &tpl, 4), 0.0);
    }

    #[test]
    fn test_fixed_point_roundtrip() {
        assert_eq!(f64_to_fixed(0.5, 12), 2048);
        assert_eq!(fixed_to_f64(-2048, 12), -0.5);
        assert_eq!(f64_to_fixed(1e30, 12), i32::MAX);
    }
}
