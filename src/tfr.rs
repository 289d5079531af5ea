//! Time-frequency power from complex Morlet wavelets.
use nalgebra::DMatrix;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::connectivity::spectral::morlet_wavelet;
use crate::connectivity::NCycles;
use crate::error::MIError;
use crate::parallel::par_map;
use crate::signal::signal::sample_range;
use crate::signal::Signal;

/// Wavelet power per epoch (or of the epoch average) and channel.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Tfr {
    channels: Vec<String>,
    freqs: Vec<f64>,
    times: Vec<f64>,
    /// `power[epoch][channel]` has one row per frequency and one column per time point.
    power: Vec<Vec<DMatrix<f64>>>,
    n_averaged: usize,
}

impl Tfr {
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// The number of epochs stored, one when averaged.
    pub fn n_epochs(&self) -> usize {
        self.power.len()
    }

    /// The number of epochs averaged in each stored power, one when not averaged.
    pub fn n_averaged(&self) -> usize {
        self.n_averaged
    }

    pub fn power(&self, epoch: usize, channel: usize) -> Result<&DMatrix<f64>, MIError> {
        self.power
            .get(epoch)
            .and_then(|channels| channels.get(channel))
            .ok_or_else(|| {
                MIError::InvalidParameter(format!(
                    "no power for epoch {} and channel {}",
                    epoch, channel
                ))
            })
    }

    fn window(&self, tmin: f64, tmax: f64) -> Option<(usize, usize)> {
        let tol = match self.times.len() {
            0 | 1 => 0.0,
            _ => 0.5 * (self.times[1] - self.times[0]),
        };
        sample_range(&self.times, tmin, tmax, tol)
    }

    /// A copy restricted to the time points within [tmin, tmax].
    pub fn crop(&self, tmin: f64, tmax: f64) -> Result<Tfr, MIError> {
        let (start, stop) = self.window(tmin, tmax).ok_or_else(|| {
            MIError::InvalidParameter(format!("no time point in [{}, {}]", tmin, tmax))
        })?;
        Ok(Tfr {
            channels: self.channels.clone(),
            freqs: self.freqs.clone(),
            times: self.times[start..stop].to_vec(),
            power: self
                .power
                .iter()
                .map(|channels| {
                    channels
                        .iter()
                        .map(|p| p.columns(start, stop - start).into_owned())
                        .collect()
                })
                .collect(),
            n_averaged: self.n_averaged,
        })
    }

    /// Divide the power at every frequency by its mean over the baseline window.
    pub fn baseline_ratio(&mut self, baseline: (f64, f64)) -> Result<(), MIError> {
        let (start, stop) = self.window(baseline.0, baseline.1).ok_or_else(|| {
            MIError::MissingDependency(format!(
                "no time point in the baseline window [{}, {}]",
                baseline.0, baseline.1
            ))
        })?;
        for power in self.power.iter_mut().flatten() {
            let means = power.columns(start, stop - start).column_mean();
            if let Some(k) = means.iter().position(|&m| !(m > 0.0)) {
                return Err(MIError::NumericalError(format!(
                    "zero baseline power at {} Hz",
                    self.freqs[k]
                )));
            }
            for mut col in power.column_iter_mut() {
                col.component_div_assign(&means);
            }
        }
        Ok(())
    }
}

/// Morlet wavelet power of every channel of a signal.
///
/// Wavelets are convolved with each epoch ("same" mode). With `average`, the power is averaged
/// over epochs. Epochs are distributed over `n_jobs` threads.
pub fn morlet_power(
    signal: &Signal,
    freqs: &[f64],
    n_cycles: &NCycles,
    average: bool,
    n_jobs: usize,
) -> Result<Tfr, MIError> {
    if freqs.is_empty() {
        return Err(MIError::InvalidParameter(
            "at least one frequency is required".to_string(),
        ));
    }
    if let Some(&f) = freqs
        .iter()
        .find(|&&f| !(f > 0.0 && f <= signal.sfreq() / 2.0))
    {
        return Err(MIError::InvalidParameter(format!(
            "frequency {} Hz is not in (0, {}] Hz",
            f,
            signal.sfreq() / 2.0
        )));
    }
    if signal.n_epochs() == 0 {
        return Err(MIError::InvalidParameter(
            "cannot compute power without epochs".to_string(),
        ));
    }
    let n_times = signal.n_times();
    let wavelets: Vec<Vec<Complex64>> = freqs
        .iter()
        .zip(n_cycles.expand(freqs.len())?)
        .map(|(&f, c)| morlet_wavelet(signal.sfreq(), f, c))
        .collect();
    let max_len = wavelets.iter().map(|w| w.len()).max().unwrap_or(1);
    if max_len > n_times {
        return Err(MIError::InvalidParameter(format!(
            "the longest wavelet ({} samples) exceeds the epoch length ({} samples)",
            max_len, n_times
        )));
    }

    let n_fft = n_times + max_len - 1;
    let mut planner = FftPlanner::<f64>::new();
    let fft: Arc<dyn Fft<f64>> = planner.plan_fft_forward(n_fft);
    let ifft: Arc<dyn Fft<f64>> = planner.plan_fft_inverse(n_fft);
    let kernels: Vec<(Vec<Complex64>, usize)> = wavelets
        .into_iter()
        .map(|w| {
            let offset = (w.len() - 1) / 2;
            let mut buf = w;
            buf.resize(n_fft, Complex64::default());
            fft.process(&mut buf);
            (buf, offset)
        })
        .collect();

    log::info!(
        "Computing Morlet power of {} epochs at {} frequencies",
        signal.n_epochs(),
        freqs.len()
    );
    let power = par_map(signal.n_epochs(), n_jobs, |e| {
        let epoch = &signal.epochs()[e].data;
        let channels = epoch
            .row_iter()
            .map(|row| {
                let mut x: Vec<Complex64> = row.iter().map(|&v| Complex64::new(v, 0.0)).collect();
                x.resize(n_fft, Complex64::default());
                fft.process(&mut x);
                let mut power = DMatrix::zeros(kernels.len(), n_times);
                for (k, (w, offset)) in kernels.iter().enumerate() {
                    let mut buf: Vec<Complex64> = x.iter().zip(w).map(|(a, b)| a * b).collect();
                    ifft.process(&mut buf);
                    for t in 0..n_times {
                        power[(k, t)] = buf[offset + t].norm_sqr() / (n_fft * n_fft) as f64;
                    }
                }
                power
            })
            .collect::<Vec<DMatrix<f64>>>();
        Ok(channels)
    })?;

    let (power, n_averaged) = match average {
        true => {
            let n = power.len();
            let mut iter = power.into_iter();
            let mut sum = iter.next().unwrap_or_default();
            for epoch in iter {
                for (acc, p) in sum.iter_mut().zip(epoch) {
                    *acc += p;
                }
            }
            sum.iter_mut().for_each(|p| *p /= n as f64);
            (vec![sum], n)
        }
        false => (power, 1),
    };

    Ok(Tfr {
        channels: signal
            .channel_names()
            .iter()
            .map(|name| name.to_string())
            .collect(),
        freqs: freqs.to_vec(),
        times: signal.times(),
        power,
        n_averaged,
    })
}
