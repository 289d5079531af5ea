//! Cross-spectral density estimation with Fourier, multitaper and Morlet wavelet methods.
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

use super::settings::{GrangerSettings, PowerMethod};
use crate::error::MIError;
use crate::parallel::par_map;

/// Default time-half-bandwidth product of the multitaper method.
pub const DEFAULT_HALF_BANDWIDTH: f64 = 4.0;
/// Minimum spectral concentration of a taper kept by the low bias option.
pub const LOW_BIAS_CONCENTRATION: f64 = 0.9;
/// Maximum number of iterations of the adaptive multitaper weights.
const ADAPTIVE_MAX_ITER: usize = 150;
/// Relative convergence tolerance of the adaptive multitaper weights.
const ADAPTIVE_TOLERANCE: f64 = 1e-10;
/// Half support of a Morlet wavelet, in standard deviations.
const MORLET_HALF_SUPPORT: f64 = 5.0;
/// Relative tolerance on the spacing of wavelet frequencies.
const GRID_TOLERANCE: f64 = 1e-6;

/// Cross-spectral density of a group of signals.
///
/// The frequencies form a regular grid starting at zero, so that the spectrum can be inverted
/// into an autocovariance sequence. There is one spectrum per time point for time-resolved
/// methods and a single one otherwise.
#[derive(Debug, PartialEq, Clone)]
pub struct CrossSpectrum {
    freqs: Vec<f64>,
    data: Vec<Vec<DMatrix<Complex64>>>,
}

impl CrossSpectrum {
    /// Create a cross-spectrum from matrices indexed by time point, then frequency.
    pub fn new(freqs: Vec<f64>, data: Vec<Vec<DMatrix<Complex64>>>) -> Result<Self, MIError> {
        if freqs.len() < 2 {
            return Err(MIError::InvalidParameter(
                "a cross-spectrum needs at least two frequencies".to_string(),
            ));
        }
        let n_signals = data
            .first()
            .and_then(|spectra| spectra.first())
            .map(|m| m.nrows())
            .ok_or_else(|| MIError::InvalidParameter("empty cross-spectrum".to_string()))?;
        for spectra in data.iter() {
            if spectra.len() != freqs.len()
                || spectra
                    .iter()
                    .any(|m| m.nrows() != n_signals || m.ncols() != n_signals)
            {
                return Err(MIError::IncompatibleData(
                    "cross-spectral matrices do not match the frequencies or each other"
                        .to_string(),
                ));
            }
        }
        Ok(CrossSpectrum { freqs, data })
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn n_freqs(&self) -> usize {
        self.freqs.len()
    }

    pub fn n_times(&self) -> usize {
        self.data.len()
    }

    pub fn n_signals(&self) -> usize {
        self.data[0][0].nrows()
    }

    pub fn at(&self, time: usize, freq: usize) -> &DMatrix<Complex64> {
        &self.data[time][freq]
    }

    /// The spectrum at a single time point.
    pub fn time_point(&self, time: usize) -> CrossSpectrum {
        CrossSpectrum {
            freqs: self.freqs.clone(),
            data: vec![self.data[time].clone()],
        }
    }

    /// The spectra at the time points `start..stop`.
    pub fn time_range(&self, start: usize, stop: usize) -> Result<CrossSpectrum, MIError> {
        if start >= stop || stop > self.n_times() {
            return Err(MIError::InvalidParameter(format!(
                "time points {}..{} out of {}",
                start,
                stop,
                self.n_times()
            )));
        }
        Ok(CrossSpectrum {
            freqs: self.freqs.clone(),
            data: self.data[start..stop].to_vec(),
        })
    }

    /// The spectrum averaged over time points.
    pub fn average_times(&self) -> CrossSpectrum {
        let scale = 1.0 / self.n_times() as f64;
        let data = (0..self.n_freqs())
            .map(|f| {
                let sum = self
                    .data
                    .iter()
                    .fold(DMatrix::zeros(self.n_signals(), self.n_signals()), |acc, s| {
                        acc + &s[f]
                    });
                sum * Complex64::new(scale, 0.0)
            })
            .collect();
        CrossSpectrum {
            freqs: self.freqs.clone(),
            data: vec![data],
        }
    }

    /// Real part of the cross-spectrum of the given signals, averaged over all frequencies and
    /// time points.
    pub fn real_mean(&self, indices: &[usize]) -> DMatrix<f64> {
        let n = indices.len();
        let mut mean = DMatrix::<f64>::zeros(n, n);
        for spectra in self.data.iter() {
            for csd in spectra.iter() {
                for (a, &i) in indices.iter().enumerate() {
                    for (b, &j) in indices.iter().enumerate() {
                        mean[(a, b)] += csd[(i, j)].re;
                    }
                }
            }
        }
        mean / (self.n_times() * self.n_freqs()) as f64
    }

    /// The cross-spectrum of the projected signals, Pᵀ C P.
    pub fn project(&self, projector: &DMatrix<f64>) -> Result<CrossSpectrum, MIError> {
        if projector.nrows() != self.n_signals() {
            return Err(MIError::IncompatibleData(format!(
                "a projector with {} rows cannot be applied to {} signals",
                projector.nrows(),
                self.n_signals()
            )));
        }
        let p = projector.map(|v| Complex64::new(v, 0.0));
        let pt = p.transpose();
        let data = self
            .data
            .iter()
            .map(|spectra| spectra.iter().map(|csd| &pt * csd * &p).collect())
            .collect();
        Ok(CrossSpectrum {
            freqs: self.freqs.clone(),
            data,
        })
    }
}

enum Kernel {
    Fourier,
    Multitaper {
        tapers: Vec<Vec<f64>>,
        eigvals: Vec<f64>,
        adaptive: bool,
    },
    Morlet {
        /// Spectra of the zero-padded wavelets, one per non-zero grid frequency.
        wavelets: Vec<Vec<Complex64>>,
        /// Start of the "same" part of each full convolution.
        offsets: Vec<usize>,
    },
}

/// Cross-spectral density estimator for epochs of a fixed length.
pub struct SpectralEstimator {
    sfreq: f64,
    n_times: usize,
    n_fft: usize,
    freqs: Vec<f64>,
    kernel: Kernel,
    fft: Arc<dyn Fft<f64>>,
    ifft: Arc<dyn Fft<f64>>,
}

impl SpectralEstimator {
    /// Boxcar-windowed Fourier estimator.
    pub fn fourier(sfreq: f64, n_times: usize) -> Result<Self, MIError> {
        let n_fft = even_fft_len(n_times)?;
        Ok(SpectralEstimator::with_kernel(
            sfreq,
            n_times,
            n_fft,
            fft_freqs(sfreq, n_fft),
            Kernel::Fourier,
        ))
    }

    /// Multitaper estimator with discrete prolate spheroidal sequences.
    /// The bandwidth is the full frequency bandwidth in Hz.
    pub fn multitaper(
        sfreq: f64,
        n_times: usize,
        bandwidth: Option<f64>,
        adaptive: bool,
        low_bias: bool,
    ) -> Result<Self, MIError> {
        let n_fft = even_fft_len(n_times)?;
        let half_nbw = match bandwidth {
            Some(bandwidth) => bandwidth * n_times as f64 / (2.0 * sfreq),
            None => DEFAULT_HALF_BANDWIDTH,
        };
        let n_tapers = (2.0 * half_nbw).floor() as usize;
        if n_tapers == 0 {
            return Err(MIError::InvalidParameter(format!(
                "the time-half-bandwidth product ({}) is too small for a single taper",
                half_nbw
            )));
        }
        let (mut tapers, mut eigvals) = dpss(n_times, half_nbw, n_tapers)?;
        if low_bias {
            if eigvals.iter().any(|&l| l > LOW_BIAS_CONCENTRATION) {
                (tapers, eigvals) = tapers
                    .into_iter()
                    .zip(eigvals)
                    .filter(|(_, l)| *l > LOW_BIAS_CONCENTRATION)
                    .unzip();
            } else {
                log::warn!("No taper has a concentration above 0.9, keeping the first one");
                tapers.truncate(1);
                eigvals.truncate(1);
            }
        }
        let adaptive = match adaptive && tapers.len() < 3 {
            true => {
                log::warn!(
                    "Not combining {} tapers adaptively, at least 3 are needed",
                    tapers.len()
                );
                false
            }
            false => adaptive,
        };
        log::debug!(
            "Multitaper estimator with {} tapers (NW = {})",
            tapers.len(),
            half_nbw
        );

        Ok(SpectralEstimator::with_kernel(
            sfreq,
            n_times,
            n_fft,
            fft_freqs(sfreq, n_fft),
            Kernel::Multitaper {
                tapers,
                eigvals,
                adaptive,
            },
        ))
    }

    /// Complex Morlet wavelet estimator.
    /// The wavelet frequencies must be the regular grid Δf, 2Δf, ..., KΔf.
    pub fn morlet(
        sfreq: f64,
        n_times: usize,
        freqs: &[f64],
        n_cycles: &[f64],
    ) -> Result<Self, MIError> {
        let df = *freqs.first().ok_or_else(|| {
            MIError::InvalidParameter("at least one wavelet frequency is required".to_string())
        })?;
        if !(df > 0.0) {
            return Err(MIError::InvalidParameter(
                "wavelet frequencies must be positive".to_string(),
            ));
        }
        if n_cycles.len() != freqs.len() {
            return Err(MIError::InvalidParameter(format!(
                "{} wavelet cycle counts given for {} frequencies",
                n_cycles.len(),
                freqs.len()
            )));
        }
        if let Some((k, f)) = freqs
            .iter()
            .enumerate()
            .find(|(k, &f)| (f - (*k + 1) as f64 * df).abs() > GRID_TOLERANCE * df)
        {
            return Err(MIError::InvalidParameter(format!(
                "wavelet frequency {} Hz is not {} times the grid step {} Hz",
                f,
                k + 1,
                df
            )));
        }
        if let Some(&f) = freqs.iter().find(|&&f| f > sfreq / 2.0) {
            return Err(MIError::InvalidParameter(format!(
                "wavelet frequency {} Hz is above the Nyquist frequency",
                f
            )));
        }

        let raw: Vec<Vec<Complex64>> = freqs
            .iter()
            .zip(n_cycles.iter())
            .map(|(&f, &c)| morlet_wavelet(sfreq, f, c))
            .collect();
        let max_len = raw.iter().map(|w| w.len()).max().unwrap_or(1);
        if max_len > n_times {
            return Err(MIError::InvalidParameter(format!(
                "the longest wavelet ({} samples) exceeds the epoch length ({} samples)",
                max_len, n_times
            )));
        }
        let n_fft = n_times + max_len - 1;

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n_fft);
        let offsets = raw.iter().map(|w| (w.len() - 1) / 2).collect();
        let wavelets = raw
            .into_iter()
            .map(|w| {
                let mut buf: Vec<Complex64> = w
                    .into_iter()
                    .chain(std::iter::repeat(Complex64::default()))
                    .take(n_fft)
                    .collect();
                fft.process(&mut buf);
                buf
            })
            .collect();

        let mut grid = vec![0.0];
        grid.extend_from_slice(freqs);
        Ok(SpectralEstimator::with_kernel(
            sfreq,
            n_times,
            n_fft,
            grid,
            Kernel::Morlet { wavelets, offsets },
        ))
    }

    /// The estimator described by the settings, for epochs of `n_times` samples.
    pub fn from_settings(
        settings: &GrangerSettings,
        sfreq: f64,
        n_times: usize,
    ) -> Result<Self, MIError> {
        match settings.power_method {
            PowerMethod::Fourier => SpectralEstimator::fourier(sfreq, n_times),
            PowerMethod::Multitaper => SpectralEstimator::multitaper(
                sfreq,
                n_times,
                settings.mt_bandwidth,
                settings.mt_adaptive,
                settings.mt_low_bias,
            ),
            PowerMethod::CwtMorlet => {
                let freqs = settings.cwt_freqs.as_deref().ok_or_else(|| {
                    MIError::InvalidParameter(
                        "wavelet frequencies are required by the cwt_morlet method".to_string(),
                    )
                })?;
                let n_cycles = settings.cwt_n_cycles.expand(freqs.len())?;
                SpectralEstimator::morlet(sfreq, n_times, freqs, &n_cycles)
            }
        }
    }

    fn with_kernel(
        sfreq: f64,
        n_times: usize,
        n_fft: usize,
        freqs: Vec<f64>,
        kernel: Kernel,
    ) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        SpectralEstimator {
            sfreq,
            n_times,
            n_fft,
            freqs,
            kernel,
            fft: planner.plan_fft_forward(n_fft),
            ifft: planner.plan_fft_inverse(n_fft),
        }
    }

    /// The frequency grid of the estimated spectra.
    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn n_times(&self) -> usize {
        self.n_times
    }

    /// Whether the spectra are resolved in time.
    pub fn is_time_resolved(&self) -> bool {
        matches!(self.kernel, Kernel::Morlet { .. })
    }

    /// Estimate the cross-spectral density averaged over epochs.
    /// Every epoch has one row per signal and one column per time sample. Epochs are processed in
    /// blocks of `block_size`, distributed over `n_jobs` threads.
    pub fn csd(
        &self,
        epochs: &[DMatrix<f64>],
        block_size: usize,
        n_jobs: usize,
    ) -> Result<CrossSpectrum, MIError> {
        let n_signals = epochs.first().map(|e| e.nrows()).ok_or_else(|| {
            MIError::InvalidParameter("cannot estimate a spectrum without epochs".to_string())
        })?;
        if let Some(epoch) = epochs
            .iter()
            .find(|e| e.nrows() != n_signals || e.ncols() != self.n_times)
        {
            return Err(MIError::IncompatibleData(format!(
                "epoch of shape {}x{} for an estimator of {} signals and {} samples",
                epoch.nrows(),
                epoch.ncols(),
                n_signals,
                self.n_times
            )));
        }
        let block_size = block_size.max(1);
        let n_blocks = (epochs.len() + block_size - 1) / block_size;

        let sums = par_map(n_blocks, n_jobs, |block| {
            let start = block * block_size;
            let stop = (start + block_size).min(epochs.len());
            let mut sum = self.zeros(n_signals);
            for epoch in epochs[start..stop].iter() {
                self.accumulate(&demean(epoch), &mut sum);
            }
            Ok(sum)
        })?;

        // tapers and wavelets are normalized, the boxcar window has energy n_times
        let window_energy = match self.kernel {
            Kernel::Fourier => self.n_times as f64,
            _ => 1.0,
        };
        let scale = Complex64::new(
            1.0 / (epochs.len() as f64 * self.sfreq * window_energy),
            0.0,
        );
        let mut total = self.zeros(n_signals);
        for sum in sums.into_iter() {
            for (acc, part) in total.iter_mut().zip(sum.into_iter()) {
                for (a, p) in acc.iter_mut().zip(part.into_iter()) {
                    *a += p;
                }
            }
        }
        let data = total
            .into_iter()
            .map(|spectra| spectra.into_iter().map(|csd| csd * scale).collect())
            .collect();
        CrossSpectrum::new(self.freqs.clone(), data)
    }

    fn zeros(&self, n_signals: usize) -> Vec<Vec<DMatrix<Complex64>>> {
        let n_points = match self.is_time_resolved() {
            true => self.n_times,
            false => 1,
        };
        vec![vec![DMatrix::zeros(n_signals, n_signals); self.freqs.len()]; n_points]
    }

    fn accumulate(&self, epoch: &DMatrix<f64>, sum: &mut [Vec<DMatrix<Complex64>>]) {
        let n_signals = epoch.nrows();
        let n_freqs = self.freqs.len();
        match &self.kernel {
            Kernel::Fourier => {
                let coefs: Vec<Vec<Complex64>> = (0..n_signals)
                    .map(|c| self.spectrum(epoch.row(c).iter().copied(), None))
                    .collect();
                for f in 0..n_freqs {
                    let x = DVector::from_fn(n_signals, |c, _| coefs[c][f]);
                    sum[0][f] += &x * x.adjoint();
                }
            }
            Kernel::Multitaper {
                tapers,
                eigvals,
                adaptive,
            } => {
                // x_mt[c][k][f]: spectrum of channel c with taper k
                let x_mt: Vec<Vec<Vec<Complex64>>> = (0..n_signals)
                    .map(|c| {
                        tapers
                            .iter()
                            .map(|taper| self.spectrum(epoch.row(c).iter().copied(), Some(taper)))
                            .collect()
                    })
                    .collect();
                let weights: Vec<Vec<Vec<f64>>> = x_mt
                    .iter()
                    .map(|x| match adaptive {
                        true => adaptive_weights(x, eigvals),
                        false => eigvals.iter().map(|l| vec![l.sqrt(); n_freqs]).collect(),
                    })
                    .collect();
                for f in 0..n_freqs {
                    let norms: Vec<f64> = weights
                        .iter()
                        .map(|w| w.iter().map(|wk| wk[f] * wk[f]).sum::<f64>().sqrt())
                        .collect();
                    for k in 0..tapers.len() {
                        let y = DVector::from_fn(n_signals, |c, _| {
                            x_mt[c][k][f] * (weights[c][k][f] / norms[c])
                        });
                        sum[0][f] += &y * y.adjoint();
                    }
                }
            }
            Kernel::Morlet { wavelets, offsets } => {
                // tfr[c][k][t]: wavelet coefficient of channel c at grid frequency k + 1
                let tfr: Vec<Vec<Vec<Complex64>>> = (0..n_signals)
                    .map(|c| {
                        let x = self.spectrum_full(epoch.row(c).iter().copied());
                        wavelets
                            .iter()
                            .zip(offsets.iter())
                            .map(|(w, &offset)| self.convolve_same(&x, w, offset))
                            .collect()
                    })
                    .collect();
                for (t, spectra) in sum.iter_mut().enumerate() {
                    for k in 0..wavelets.len() {
                        let x = DVector::from_fn(n_signals, |c, _| tfr[c][k][t]);
                        spectra[k + 1] += &x * x.adjoint();
                    }
                }
            }
        }
    }

    /// One-sided spectrum of a (tapered) real sequence.
    fn spectrum<I: Iterator<Item = f64>>(&self, x: I, taper: Option<&[f64]>) -> Vec<Complex64> {
        let mut buf: Vec<Complex64> = match taper {
            Some(taper) => x
                .zip(taper.iter())
                .map(|(v, &w)| Complex64::new(v * w, 0.0))
                .collect(),
            None => x.map(|v| Complex64::new(v, 0.0)).collect(),
        };
        buf.resize(self.n_fft, Complex64::default());
        self.fft.process(&mut buf);
        buf.truncate(self.freqs.len());
        buf
    }

    fn spectrum_full<I: Iterator<Item = f64>>(&self, x: I) -> Vec<Complex64> {
        let mut buf: Vec<Complex64> = x.map(|v| Complex64::new(v, 0.0)).collect();
        buf.resize(self.n_fft, Complex64::default());
        self.fft.process(&mut buf);
        buf
    }

    fn convolve_same(&self, x: &[Complex64], w: &[Complex64], offset: usize) -> Vec<Complex64> {
        let mut buf: Vec<Complex64> = x.iter().zip(w.iter()).map(|(a, b)| a * b).collect();
        self.ifft.process(&mut buf);
        let scale = 1.0 / self.n_fft as f64;
        buf[offset..offset + self.n_times]
            .iter()
            .map(|v| *v * scale)
            .collect()
    }
}

/// Subtract the mean of every row.
pub fn demean(epoch: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = epoch.clone();
    for mut row in out.row_iter_mut() {
        let mean = row.mean();
        row.add_scalar_mut(-mean);
    }
    out
}

fn even_fft_len(n_times: usize) -> Result<usize, MIError> {
    if n_times < 2 {
        return Err(MIError::InvalidParameter(format!(
            "at least two samples are needed to estimate a spectrum, got {}",
            n_times
        )));
    }
    Ok(n_times + n_times % 2)
}

fn fft_freqs(sfreq: f64, n_fft: usize) -> Vec<f64> {
    (0..=n_fft / 2)
        .map(|k| k as f64 * sfreq / n_fft as f64)
        .collect()
}

/// The complex Morlet wavelet at frequency `freq`, normalized to unit energy up to a factor √2.
pub fn morlet_wavelet(sfreq: f64, freq: f64, n_cycles: f64) -> Vec<Complex64> {
    let sigma_t = n_cycles / (2.0 * PI * freq);
    let half = (MORLET_HALF_SUPPORT * sigma_t * sfreq).ceil().max(1.0) as i64;
    let wavelet: Vec<Complex64> = (-(half - 1)..half)
        .map(|i| {
            let t = i as f64 / sfreq;
            let gauss = (-t * t / (2.0 * sigma_t * sigma_t)).exp();
            Complex64::from_polar(gauss, 2.0 * PI * freq * t)
        })
        .collect();
    let norm = wavelet.iter().map(|w| w.norm_sqr()).sum::<f64>().sqrt();
    wavelet
        .into_iter()
        .map(|w| w / (0.5f64.sqrt() * norm))
        .collect()
}

/// The first `n_tapers` discrete prolate spheroidal sequences of length `n` and time-half-bandwidth
/// product `half_nbw`, with their spectral concentrations.
///
/// The sequences are the leading eigenvectors of the tridiagonal matrix commuting with the
/// time-frequency concentration operator, normalized to unit energy.
pub fn dpss(
    n: usize,
    half_nbw: f64,
    n_tapers: usize,
) -> Result<(Vec<Vec<f64>>, Vec<f64>), MIError> {
    if n_tapers == 0 || n_tapers > n {
        return Err(MIError::InvalidParameter(format!(
            "cannot compute {} tapers of length {}",
            n_tapers, n
        )));
    }
    let w = half_nbw / n as f64;
    let mut tri = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        let x = (n as f64 - 1.0 - 2.0 * i as f64) / 2.0;
        tri[(i, i)] = x * x * (2.0 * PI * w).cos();
        if i + 1 < n {
            let off = (i + 1) as f64 * (n - i - 1) as f64 / 2.0;
            tri[(i, i + 1)] = off;
            tri[(i + 1, i)] = off;
        }
    }
    let eigen = tri.symmetric_eigen();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut tapers = Vec::with_capacity(n_tapers);
    let mut concentrations = Vec::with_capacity(n_tapers);
    for &id in order.iter().take(n_tapers) {
        let v = eigen.eigenvectors.column(id);
        let norm = v.norm();
        if !(norm > 0.0) {
            return Err(MIError::NumericalError(
                "degenerate prolate spheroidal sequence".to_string(),
            ));
        }
        let mut taper: Vec<f64> = v.iter().map(|x| x / norm).collect();
        if taper.iter().sum::<f64>() < 0.0 {
            taper.iter_mut().for_each(|x| *x = -*x);
        }
        concentrations.push(concentration(&taper, w));
        tapers.push(taper);
    }
    Ok((tapers, concentrations))
}

/// Fraction of the energy of a unit-energy sequence within the band [-w, w].
fn concentration(taper: &[f64], w: f64) -> f64 {
    let n = taper.len();
    let mut lambda = 2.0 * w * taper.iter().map(|x| x * x).sum::<f64>();
    for m in 1..n {
        let r: f64 = (0..n - m).map(|t| taper[t] * taper[t + m]).sum();
        lambda += 2.0 * r * (2.0 * PI * w * m as f64).sin() / (PI * m as f64);
    }
    lambda
}

/// Thomson's adaptive weights of each taper at each frequency.
fn adaptive_weights(x_mt: &[Vec<Complex64>], eigvals: &[f64]) -> Vec<Vec<f64>> {
    let n_freqs = x_mt[0].len();
    let power: Vec<Vec<f64>> = x_mt
        .iter()
        .map(|x| x.iter().map(|v| v.norm_sqr()).collect())
        .collect();
    let mut psd: Vec<f64> = (0..n_freqs)
        .map(|f| (power[0][f] + power[1][f]) / 2.0)
        .collect();
    let var = psd.iter().sum::<f64>() / n_freqs as f64;
    let rt: Vec<f64> = eigvals.iter().map(|l| var * (1.0 - l)).collect();

    let weights_at = |psd: &[f64]| -> Vec<Vec<f64>> {
        eigvals
            .iter()
            .zip(rt.iter())
            .map(|(&l, &r)| {
                psd.iter()
                    .map(|&s| match l * s + r > 0.0 {
                        true => l.sqrt() * s / (l * s + r),
                        false => l.sqrt(),
                    })
                    .collect()
            })
            .collect()
    };

    let mut weights = weights_at(&psd);
    for _ in 0..ADAPTIVE_MAX_ITER {
        let next: Vec<f64> = (0..n_freqs)
            .map(|f| {
                let num: f64 = (0..eigvals.len())
                    .map(|k| weights[k][f] * weights[k][f] * power[k][f])
                    .sum();
                let den: f64 = (0..eigvals.len()).map(|k| weights[k][f] * weights[k][f]).sum();
                match den > 0.0 {
                    true => num / den,
                    false => 0.0,
                }
            })
            .collect();
        let change = next
            .iter()
            .zip(psd.iter())
            .map(|(a, b)| (a - b).abs() / b.abs().max(f64::MIN_POSITIVE))
            .fold(0.0, f64::max);
        psd = next;
        weights = weights_at(&psd);
        if change < ADAPTIVE_TOLERANCE {
            break;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn sine_epochs(n_epochs: usize, freq: f64, sfreq: f64, n_times: usize) -> Vec<DMatrix<f64>> {
        let mut rng = StdRng::seed_from_u64(42);
        let noise = Normal::new(0.0, 0.1).unwrap();
        (0..n_epochs)
            .map(|e| {
                DMatrix::from_fn(2, n_times, |c, t| {
                    let phase = e as f64 * 0.3 + c as f64;
                    (2.0 * PI * freq * t as f64 / sfreq + phase).sin() + noise.sample(&mut rng)
                })
            })
            .collect()
    }

    fn peak(csd: &CrossSpectrum, channel: usize) -> f64 {
        let (f, _) = (0..csd.n_freqs())
            .map(|f| (f, csd.at(0, f)[(channel, channel)].re))
            .fold((0, f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        csd.freqs()[f]
    }

    #[test]
    fn test_fourier_grid_and_peak() {
        let est = SpectralEstimator::fourier(100.0, 99).unwrap();
        assert_eq!(est.freqs().len(), 51);
        assert_relative_eq!(est.freqs()[50], 50.0);

        let est = SpectralEstimator::fourier(100.0, 100).unwrap();
        let csd = est.csd(&sine_epochs(10, 10.0, 100.0, 100), 3, 2).unwrap();
        assert_relative_eq!(peak(&csd, 0), 10.0);
        assert_relative_eq!(peak(&csd, 1), 10.0);
    }

    #[test]
    fn test_csd_hermitian_and_block_invariant() {
        let epochs = sine_epochs(7, 12.0, 100.0, 80);
        let est = SpectralEstimator::multitaper(100.0, 80, None, false, true).unwrap();
        let a = est.csd(&epochs, 1, 1).unwrap();
        let b = est.csd(&epochs, 1000, 4).unwrap();
        for f in 0..a.n_freqs() {
            let m = a.at(0, f);
            assert!((m - m.adjoint()).norm() < 1e-12 * (1.0 + m.norm()));
            assert!((m - b.at(0, f)).norm() < 1e-10 * (1.0 + m.norm()));
        }
    }

    #[test]
    fn test_dpss_orthonormal_and_concentrated() {
        let (tapers, lambdas) = dpss(128, 4.0, 7).unwrap();
        for i in 0..tapers.len() {
            for j in 0..tapers.len() {
                let dot: f64 = tapers[i].iter().zip(tapers[j].iter()).map(|(a, b)| a * b).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(dot, expected, epsilon = 1e-8);
            }
        }
        assert!(lambdas[0] > 0.999);
        assert!(lambdas.windows(2).all(|p| p[0] >= p[1] - 1e-9));
    }

    #[test]
    fn test_multitaper_adaptive_peak() {
        let est = SpectralEstimator::multitaper(100.0, 100, Some(6.0), true, true).unwrap();
        let csd = est.csd(&sine_epochs(5, 20.0, 100.0, 100), 2, 1).unwrap();
        assert_relative_eq!(peak(&csd, 0), 20.0);
    }

    #[test]
    fn test_multitaper_bandwidth_too_small() {
        assert!(matches!(
            SpectralEstimator::multitaper(100.0, 100, Some(0.5), false, true),
            Err(MIError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_morlet() {
        let freqs: Vec<f64> = (1..=10).map(|k| 5.0 * k as f64).collect();
        let est = SpectralEstimator::morlet(100.0, 200, &freqs, &vec![5.0; freqs.len()]).unwrap();
        assert!(est.is_time_resolved());
        assert_eq!(est.freqs()[0], 0.0);
        let csd = est.csd(&sine_epochs(4, 10.0, 100.0, 200), 10, 1).unwrap();
        assert_eq!(csd.n_times(), 200);
        assert_eq!(csd.at(100, 0).norm(), 0.0);
        let avg = csd.average_times();
        assert_relative_eq!(peak(&avg, 0), 10.0);
    }

    #[test]
    fn test_morlet_validation() {
        assert!(matches!(
            SpectralEstimator::morlet(100.0, 200, &[2.0, 5.0], &[5.0, 5.0]),
            Err(MIError::InvalidParameter(_))
        ));
        assert!(matches!(
            SpectralEstimator::morlet(100.0, 50, &[1.0], &[7.0]),
            Err(MIError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_project_identity() {
        let est = SpectralEstimator::fourier(100.0, 50).unwrap();
        let csd = est.csd(&sine_epochs(3, 10.0, 100.0, 50), 10, 1).unwrap();
        let projected = csd.project(&DMatrix::identity(2, 2)).unwrap();
        assert_eq!(projected, csd);
        assert!(matches!(
            csd.project(&DMatrix::identity(3, 3)),
            Err(MIError::IncompatibleData(_))
        ));
    }

    #[test]
    fn test_demean() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, -1.0, 0.0, 4.0]);
        let d = demean(&m);
        assert_relative_eq!(d.row(0).sum(), 0.0);
        assert_relative_eq!(d.row(1).sum(), 0.0, epsilon = 1e-12);
    }
}
