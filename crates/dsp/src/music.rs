// Copyright 2025-2026 CEMAXECUTER LLC

//! Subspace (MUSIC) distance estimator over the two-way channel response.
//!
//! The response of every antenna path is split into overlapping subarrays of
//! `matlen` channels; their forward-backward averaged covariance decorrelates
//! coherent reflections. Its noise subspace is found with a Jacobi
//! eigen-decomposition of the real embedding of the Hermitian matrix, and
//! the pseudo-spectrum denominator is evaluated on the delay grid with one
//! FFT of the lag sums of the noise projector.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{DspError, EstimationFailure, Result};
use crate::fft::DelayFft;
use crate::tes::{fold_range, tes_phase, H2wr, PhaseConfig, TesParams};

/// Fewest subarrays that still give a usable smoothed covariance.
pub const MIN_NUM_SEP: usize = 2;

const MAX_JACOBI_SWEEPS: usize = 50;
/// Pseudo-spectrum ceiling, as a fraction of the steering vector energy.
const SPECTRUM_FLOOR: f64 = 1e-4;
const GOLDEN: f64 = 0.618_033_988_749_894_8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicConfig {
    /// Eigenvalues above this fraction of the largest count as signal.
    pub sig_threshold: f64,
    /// Jacobi convergence tolerance relative to the largest eigenvalue.
    pub eig_cap_ratio: f64,
    /// Power-iteration limit for the largest eigenvalue.
    pub max_iter_eig: usize,
    /// Golden-section iterations per pseudo-spectrum peak.
    pub ps_iters: usize,
    /// Minimum first-peak level relative to the strongest peak.
    pub peak_min_level: f64,
    /// Fallback estimator and wrap guard.
    pub phase: PhaseConfig,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            sig_threshold: 0.1,
            eig_cap_ratio: 1e-9,
            max_iter_eig: 100,
            ps_iters: 60,
            peak_min_level: 0.05,
            phase: PhaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MusicResult {
    pub distance: f64,
    pub n_iter_max_eig: usize,
    pub n_iter_ps: usize,
    /// Dimension of the signal subspace.
    pub n_sig_cnt: usize,
    /// Absolute Jacobi tolerance that was used.
    pub evd_cap: f64,
    pub failure: Option<EstimationFailure>,
}

/// Square complex matrix, row-major.
struct CMatrix {
    n: usize,
    data: Vec<Complex64>,
}

impl CMatrix {
    fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![Complex64::new(0.0, 0.0); n * n],
        }
    }

    #[inline]
    fn at(&self, r: usize, c: usize) -> Complex64 {
        self.data[r * self.n + c]
    }

    #[inline]
    fn at_mut(&mut self, r: usize, c: usize) -> &mut Complex64 {
        &mut self.data[r * self.n + c]
    }

    fn mul_vec(&self, v: &[Complex64]) -> Vec<Complex64> {
        (0..self.n)
            .map(|r| (0..self.n).map(|c| self.at(r, c) * v[c]).sum())
            .collect()
    }
}

/// Add the forward-backward smoothed covariance of `h` into `r`.
fn accumulate_covariance(r: &mut CMatrix, h: &[Complex64], weight: f64) {
    let l = r.n;
    let numsep = h.len() + 1 - l;
    let scale = weight / (2.0 * numsep as f64);
    for i in 0..numsep {
        let sub = &h[i..i + l];
        for m in 0..l {
            for n in 0..l {
                // Forward term plus the exchanged conjugate (backward) term.
                let fwd = sub[m] * sub[n].conj();
                let bwd = sub[l - 1 - m].conj() * sub[l - 1 - n];
                *r.at_mut(m, n) += (fwd + bwd) * scale;
            }
        }
    }
}

/// Largest eigenvalue by power iteration. Returns `(lambda, iterations)`.
fn max_eigenvalue(r: &CMatrix, max_iter: usize) -> (f64, usize) {
    let norm = |v: &[Complex64]| v.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    let mut v: Vec<Complex64> = (0..r.n).map(|i| Complex64::new(1.0, i as f64 / r.n as f64)).collect();
    let mut lambda = 0.0;
    for it in 1..=max_iter.max(1) {
        let w = r.mul_vec(&v);
        let nw = norm(&w);
        if nw <= 0.0 {
            return (0.0, it);
        }
        let next: f64 = v.iter().zip(w.iter()).map(|(a, b)| (a.conj() * b).re).sum::<f64>() / norm(&v).powi(2);
        v = w.into_iter().map(|c| c / nw).collect();
        if (next - lambda).abs() <= 1e-12 * next.abs() {
            return (next, it);
        }
        lambda = next;
    }
    (lambda, max_iter.max(1))
}

/// Cyclic Jacobi on a real symmetric `n x n` matrix (row-major, destroyed).
/// Returns eigenvalues and the eigenvectors as columns of a row-major matrix.
fn jacobi_eigen(a: &mut [f64], n: usize, tol: f64) -> (Vec<f64>, Vec<f64>) {
    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }
    for _ in 0..MAX_JACOBI_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in p + 1..n {
                off += a[p * n + q] * a[p * n + q];
            }
        }
        if off.sqrt() <= tol {
            break;
        }
        for p in 0..n {
            for q in p + 1..n {
                let apq = a[p * n + q];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }
    let eig = (0..n).map(|i| a[i * n + i]).collect();
    (eig, v)
}

/// Real embedding `[[A, -B], [B, A]]` of `R = A + jB`. Every eigenvalue of
/// `R` appears twice.
fn real_embedding(r: &CMatrix) -> Vec<f64> {
    let l = r.n;
    let n = 2 * l;
    let mut m = vec![0.0; n * n];
    for i in 0..l {
        for j in 0..l {
            let z = r.at(i, j);
            m[i * n + j] = z.re;
            m[i * n + l + j] = -z.im;
            m[(l + i) * n + j] = z.im;
            m[(l + i) * n + l + j] = z.re;
        }
    }
    m
}

/// Sums of the noise projector along each diagonal, indexed by lag + L - 1.
/// `eig` and `vecs` are the decomposition of the real embedding.
fn noise_lag_sums(l: usize, eig: &[f64], vecs: &[f64], n_sig: usize) -> Vec<Complex64> {
    let n = 2 * l;
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eig[a].total_cmp(&eig[b]));
    let noise = &order[..2 * (l - n_sig)];

    let mut proj = CMatrix::zeros(l);
    for &col in noise {
        let u: Vec<Complex64> = (0..l)
            .map(|i| Complex64::new(vecs[i * n + col], vecs[(l + i) * n + col]))
            .collect();
        for i in 0..l {
            for j in 0..l {
                *proj.at_mut(i, j) += u[i] * u[j].conj() * 0.5;
            }
        }
    }

    let mut q = vec![Complex64::new(0.0, 0.0); 2 * l - 1];
    for i in 0..l {
        for j in 0..l {
            q[i + l - 1 - j] += proj.at(i, j);
        }
    }
    q
}

/// `a(d)^H P a(d)` for the steering vector of distance `d`.
fn denominator(q: &[Complex64], d: f64, period: f64) -> f64 {
    let l = (q.len() + 1) / 2;
    let w = 2.0 * PI * d / period;
    q.iter()
        .enumerate()
        .map(|(idx, c)| {
            let lag = idx as f64 - (l as f64 - 1.0);
            (c * Complex64::from_polar(1.0, w * lag)).re
        })
        .sum()
}

/// Golden-section minimum of `f` on `[lo, hi]`.
fn golden_min(mut lo: f64, mut hi: f64, max_iter: usize, f: impl Fn(f64) -> f64) -> (f64, f64, usize) {
    let mut x1 = hi - GOLDEN * (hi - lo);
    let mut x2 = lo + GOLDEN * (hi - lo);
    let mut f1 = f(x1);
    let mut f2 = f(x2);
    let mut iters = 0;
    while iters < max_iter && hi - lo > 1e-6 {
        if f1 < f2 {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - GOLDEN * (hi - lo);
            f1 = f(x1);
        } else {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + GOLDEN * (hi - lo);
            f2 = f(x2);
        }
        iters += 1;
    }
    let x = 0.5 * (lo + hi);
    (x, f(x), iters)
}

fn fallback(params: &TesParams, h: &H2wr, cfg: &MusicConfig, failure: EstimationFailure, mut base: MusicResult) -> Result<MusicResult> {
    let phase = tes_phase(params, h, &cfg.phase)?;
    log::debug!("MUSIC fallback ({:?}) to phase slope: {:.3} m", failure, phase.distance);
    base.distance = phase.distance;
    base.failure = Some(failure);
    Ok(base)
}

fn music(params: &TesParams, h: &H2wr, paths: &[usize], cfg: &MusicConfig) -> Result<MusicResult> {
    let mut result = MusicResult {
        distance: f64::NAN,
        n_iter_max_eig: 0,
        n_iter_ps: 0,
        n_sig_cnt: 0,
        evd_cap: 0.0,
        failure: None,
    };
    let l = params.matlen;
    if l < 2 || params.numsep < MIN_NUM_SEP {
        return fallback(params, h, cfg, EstimationFailure::RankDeficient, result);
    }

    let mut r = CMatrix::zeros(l);
    for &ap in paths {
        accumulate_covariance(&mut r, h.path(ap), 1.0 / paths.len() as f64);
    }

    let (lambda_max, iters) = max_eigenvalue(&r, cfg.max_iter_eig);
    result.n_iter_max_eig = iters;
    if !(lambda_max > 0.0) {
        return fallback(params, h, cfg, EstimationFailure::RankDeficient, result);
    }
    result.evd_cap = lambda_max * cfg.eig_cap_ratio;

    // Signal dimension from the complex eigenvalues (each appears twice).
    let mut emb = real_embedding(&r);
    let (eig, vecs) = jacobi_eigen(&mut emb, 2 * l, result.evd_cap);
    let mut sorted = eig.clone();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let thr = cfg.sig_threshold * lambda_max;
    let n_sig = (0..l).filter(|&k| sorted[2 * k] > thr).count();
    let n_sig = n_sig.clamp(1, params.hmatlen.min(l - 1).max(1));
    result.n_sig_cnt = n_sig;

    let q = noise_lag_sums(l, &eig, &vecs, n_sig);

    // Denominator on the delay grid with one transform of the lag sums.
    let nfft = params.nfft;
    let period = params.range_period;
    let bin = params.bin_m();
    let mut buf = vec![Complex64::new(0.0, 0.0); nfft];
    for (idx, c) in q.iter().enumerate() {
        let lag = idx as isize - (l as isize - 1);
        buf[lag.rem_euclid(nfft as isize) as usize] += *c;
    }
    DelayFft::new(nfft).process(&mut buf);
    let grid: Vec<f64> = buf.iter().map(|c| c.re).collect();

    let energy = l as f64;
    let guard = cfg.phase.first_peak_tolx * bin;
    let mut peaks: Vec<(f64, f64)> = Vec::new();
    for i in 0..nfft {
        let left = grid[(i + nfft - 1) % nfft];
        let right = grid[(i + 1) % nfft];
        if grid[i] > left || grid[i] > right {
            continue;
        }
        let centre = i as f64 * bin;
        let (d, dmin, it) = golden_min(centre - bin, centre + bin, cfg.ps_iters, |d| denominator(&q, d, period));
        result.n_iter_ps += it;
        let spectrum = 1.0 / (dmin / energy).max(SPECTRUM_FLOOR);
        peaks.push((fold_range(d, period, guard), spectrum));
    }

    let max = peaks.iter().map(|p| p.1).fold(0.0, f64::max);
    peaks.sort_by(|a, b| a.0.total_cmp(&b.0));
    match peaks.iter().find(|p| p.1 >= cfg.peak_min_level * max) {
        Some(&(d, _)) => {
            result.distance = d;
            Ok(result)
        }
        None => fallback(params, h, cfg, EstimationFailure::NoPeak, result),
    }
}

fn check_response(params: &TesParams, h: &H2wr) -> Result<()> {
    if h.channum != params.channum || h.data.len() != h.channum * h.num_ap || h.num_ap == 0 {
        return Err(DspError::LengthMismatch {
            expected: params.channum * h.num_ap.max(1),
            actual: h.data.len(),
        });
    }
    Ok(())
}

/// MUSIC on a single antenna path.
pub fn tes_music(params: &TesParams, h: &H2wr, ap: usize, cfg: &MusicConfig) -> Result<MusicResult> {
    check_response(params, h)?;
    if ap >= h.num_ap {
        return Err(DspError::InvalidArgument(format!("antenna path {} of {}", ap, h.num_ap)));
    }
    music(params, h, &[ap], cfg)
}

/// MUSIC with the covariance averaged over all antenna paths.
pub fn tes_music2(params: &TesParams, h: &H2wr, cfg: &MusicConfig) -> Result<MusicResult> {
    check_response(params, h)?;
    let paths: Vec<usize> = (0..h.num_ap).collect();
    music(params, h, &paths, cfg)
}
