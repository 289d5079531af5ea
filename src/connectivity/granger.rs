//! Multivariate spectral Granger causality between seed and target channel groups.
use nalgebra::DMatrix;
use num_complex::Complex64;
use serde_json::{json, Map, Value};
use std::f64::consts::PI;

use super::autocov::{Autocovariance, VarModel};
use super::rank::RankReduction;
use super::results::{Connection, GrangerResults, Measure};
use super::settings::{GrangerSettings, PowerMethod, MIN_CYCLES_PER_WINDOW};
use super::spectral::{CrossSpectrum, SpectralEstimator};
use crate::error::MIError;
use crate::parallel::par_map;
use crate::signal::signal::sample_range;
use crate::signal::Signal;

/// Log-determinant of a Hermitian positive definite matrix.
fn log_det(m: &DMatrix<Complex64>) -> Result<f64, MIError> {
    let hermitian = (m + m.adjoint()) * Complex64::new(0.5, 0.0);
    let chol = hermitian.cholesky().ok_or_else(|| {
        MIError::NumericalError("spectral matrix is not positive definite".to_string())
    })?;
    Ok(2.0 * chol.l_dirty().diagonal().iter().map(|d| d.re.ln()).sum::<f64>())
}

fn block(m: &DMatrix<Complex64>, rows: &[usize], cols: &[usize]) -> DMatrix<Complex64> {
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| m[(rows[i], cols[j])])
}

fn real_block(m: &DMatrix<f64>, rows: &[usize], cols: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| m[(rows[i], cols[j])])
}

/// Spectral Granger causality from `sources` to `targets` implied by a VAR model, at each
/// normalized angular frequency.
///
/// GC_{x→y}(ω) = ln det S_yy(ω) - ln det(S_yy(ω) - H_yx(ω) Σ_{x|y} H_yx(ω)ᴴ), where Σ_{x|y} is the
/// partial residual covariance of the sources given the targets.
pub fn spectral_gc(
    model: &VarModel,
    sources: &[usize],
    targets: &[usize],
    omegas: &[f64],
) -> Result<Vec<f64>, MIError> {
    let sigma = model.residual_cov();
    let s_xx = real_block(sigma, sources, sources);
    let s_xy = real_block(sigma, sources, targets);
    let s_yy = real_block(sigma, targets, targets);
    let s_yy_inv = s_yy.clone().try_inverse().ok_or_else(|| {
        MIError::NumericalError("singular residual covariance of the targets".to_string())
    })?;
    let partial = (&s_xx - &s_xy * s_yy_inv * s_xy.transpose()).map(|v| Complex64::new(v, 0.0));

    omegas
        .iter()
        .map(|&omega| {
            let h = model.transfer(omega)?;
            let s = model.spectral_density(omega)?;
            let s_yy = block(&s, targets, targets);
            let h_yx = block(&h, targets, sources);
            let intrinsic = &s_yy - &h_yx * &partial * h_yx.adjoint();
            Ok(log_det(&s_yy)? - log_det(&intrinsic)?)
        })
        .collect()
}

/// The four measures of one seed/target problem at every grid frequency.
struct Spectra {
    gc: Vec<f64>,
    net_gc: Vec<f64>,
    trgc: Vec<f64>,
    net_trgc: Vec<f64>,
}

fn measures_from_csd(
    csd: &CrossSpectrum,
    time: usize,
    n_lags: usize,
    seeds: &[usize],
    targets: &[usize],
    omegas: &[f64],
) -> Result<Spectra, MIError> {
    let autocov = Autocovariance::from_csd(csd, time, n_lags)?;
    let model = VarModel::fit(&autocov)?;
    let reversed = VarModel::fit(&autocov.time_reversed())?;

    let st = spectral_gc(&model, seeds, targets, omegas)?;
    let ts = spectral_gc(&model, targets, seeds, omegas)?;
    let st_rev = spectral_gc(&reversed, seeds, targets, omegas)?;
    let ts_rev = spectral_gc(&reversed, targets, seeds, omegas)?;

    let n = omegas.len();
    let net_gc: Vec<f64> = (0..n).map(|f| st[f] - ts[f]).collect();
    Ok(Spectra {
        trgc: (0..n).map(|f| st[f] - st_rev[f]).collect(),
        net_trgc: (0..n)
            .map(|f| net_gc[f] - (st_rev[f] - ts_rev[f]))
            .collect(),
        gc: st,
        net_gc,
    })
}

/// Output frequencies: the grid bins in the requested bands, or one averaged value per band.
#[derive(Debug, Clone)]
struct FreqSelection {
    /// Grid indices at which the measures are evaluated.
    bins: Vec<usize>,
    /// Positions in `bins` averaged into each output frequency.
    groups: Vec<Vec<usize>>,
    freqs: Vec<f64>,
}

impl FreqSelection {
    fn new(
        grid: &[f64],
        bands: &[(f64, f64)],
        fskip: usize,
        faverage: bool,
        first_bin: usize,
    ) -> Result<Self, MIError> {
        let tol = 1e-9 * grid.last().copied().unwrap_or(1.0).max(1.0);
        let in_band = |f: f64, (low, high): (f64, f64)| f >= low - tol && f <= high + tol;

        let bins: Vec<usize> = (first_bin..grid.len())
            .filter(|&k| bands.iter().any(|&band| in_band(grid[k], band)))
            .step_by(fskip + 1)
            .collect();
        if bins.is_empty() {
            return Err(MIError::InvalidParameter(
                "no frequency of the spectrum lies within the requested bands".to_string(),
            ));
        }

        let (groups, freqs) = match faverage {
            true => {
                let mut groups = Vec::with_capacity(bands.len());
                let mut freqs = Vec::with_capacity(bands.len());
                for &band in bands.iter() {
                    let group: Vec<usize> = (0..bins.len())
                        .filter(|&pos| in_band(grid[bins[pos]], band))
                        .collect();
                    if group.is_empty() {
                        return Err(MIError::InvalidParameter(format!(
                            "no frequency of the spectrum lies within [{}, {}]",
                            band.0, band.1
                        )));
                    }
                    freqs.push(
                        group.iter().map(|&pos| grid[bins[pos]]).sum::<f64>() / group.len() as f64,
                    );
                    groups.push(group);
                }
                (groups, freqs)
            }
            false => (
                (0..bins.len()).map(|pos| vec![pos]).collect(),
                bins.iter().map(|&k| grid[k]).collect(),
            ),
        };
        Ok(FreqSelection {
            bins,
            groups,
            freqs,
        })
    }

    fn reduce(&self, values: &[f64]) -> Vec<f64> {
        self.groups
            .iter()
            .map(|group| group.iter().map(|&pos| values[pos]).sum::<f64>() / group.len() as f64)
            .collect()
    }
}

/// Multivariate spectral Granger causality analysis of a signal.
///
/// The analysis is configured and checked by [`ConnectivityGranger::new`] and run by
/// [`ConnectivityGranger::process`], which consumes the analysis: a configured analysis produces
/// exactly one result.
///
/// ```compile_fail
/// use motor_intention::connectivity::ConnectivityGranger;
///
/// fn run_twice(analysis: ConnectivityGranger) {
///     let first = analysis.process();
///     let second = analysis.process();
/// }
/// ```
pub struct ConnectivityGranger<'a> {
    signal: &'a Signal,
    settings: GrangerSettings,
    connections: Vec<Connection>,
    samples: (usize, usize),
    estimator: SpectralEstimator,
    bands: Vec<(f64, f64)>,
    selection: FreqSelection,
}

impl<'a> ConnectivityGranger<'a> {
    /// Configure the analysis of a signal.
    ///
    /// The seed and target selectors are resolved against the channels of the signal: every seed
    /// group is paired with every target group. The function returns an error if a selector does
    /// not resolve, if a seed group and a target group share channels, or if the settings are not
    /// compatible with the data.
    ///
    /// # Example
    /// ```rust
    /// use motor_intention::connectivity::{ConnectivityGranger, GrangerSettings, Measure, PowerMethod};
    /// use motor_intention::signal::ChannelSelector;
    /// use motor_intention::simulate::simulate_lagged_pair;
    /// use rand::rngs::StdRng;
    /// use rand::SeedableRng;
    ///
    /// let mut rng = StdRng::seed_from_u64(42);
    /// let signal = simulate_lagged_pair(20, 200, 200.0, 5, 0.8, 0.5, &mut rng).unwrap();
    ///
    /// let mut settings = GrangerSettings::new(
    ///     PowerMethod::Fourier,
    ///     ChannelSelector::parse("A").unwrap(),
    ///     ChannelSelector::parse("B").unwrap(),
    /// );
    /// settings.n_lags = 10;
    ///
    /// let results = ConnectivityGranger::new(&signal, settings).unwrap().process().unwrap();
    /// assert_eq!(results.connections().len(), 1);
    /// assert_eq!(results.measure(Measure::Gc).len(), results.freqs().len());
    /// ```
    pub fn new(signal: &'a Signal, settings: GrangerSettings) -> Result<Self, MIError> {
        settings.validate()?;

        let seed_groups = settings.seeds.resolve(signal.channels())?;
        let target_groups = settings.targets.resolve(signal.channels())?;
        let mut connections = Vec::with_capacity(seed_groups.len() * target_groups.len());
        for seeds in seed_groups.iter() {
            for targets in target_groups.iter() {
                if let Some(&id) = seeds.indices.iter().find(|id| targets.indices.contains(id)) {
                    return Err(MIError::AmbiguousSelector(format!(
                        "the channel '{}' is both a seed ({}) and a target ({})",
                        signal.channels()[id].name,
                        seeds.label,
                        targets.label
                    )));
                }
                connections.push(Connection {
                    seeds: seeds.clone(),
                    targets: targets.clone(),
                });
            }
        }

        if signal.n_epochs() == 0 {
            return Err(MIError::InvalidParameter(
                "the signal has no epoch left".to_string(),
            ));
        }
        let times = signal.times();
        let tmin = settings.tmin.unwrap_or(times[0]);
        let tmax = settings.tmax.unwrap_or(times[times.len() - 1]);
        let samples = sample_range(&times, tmin, tmax, 0.5 / signal.sfreq()).ok_or_else(|| {
            MIError::InvalidParameter(format!("no sample in [{}, {}]", tmin, tmax))
        })?;
        let n_times = samples.1 - samples.0;

        // wavelet transforms use the whole epoch, the analysis window selects time points
        let estimator = match settings.power_method {
            PowerMethod::CwtMorlet => {
                SpectralEstimator::from_settings(&settings, signal.sfreq(), signal.n_times())?
            }
            _ => SpectralEstimator::from_settings(&settings, signal.sfreq(), n_times)?,
        };
        let grid = estimator.freqs();
        let n_grid = grid.len();
        if settings.n_lags >= n_grid - 1 {
            return Err(MIError::InvalidParameter(format!(
                "{} lags cannot be estimated from a spectrum of {} frequencies",
                settings.n_lags, n_grid
            )));
        }

        let duration = n_times as f64 / signal.sfreq();
        let top = grid[n_grid - 1];
        let bands: Vec<(f64, f64)> = settings
            .bands(MIN_CYCLES_PER_WINDOW / duration)?
            .into_iter()
            .map(|(low, high)| (low, high.min(top)))
            .collect();
        let first_bin = match estimator.is_time_resolved() {
            true => 1,
            false => 0,
        };
        let selection =
            FreqSelection::new(grid, &bands, settings.fskip, settings.faverage, first_bin)?;

        log::info!(
            "Granger causality ({}) for {} connections, {} windows, {} frequencies",
            settings.power_method,
            connections.len(),
            signal.windows().len(),
            selection.freqs.len()
        );

        Ok(ConnectivityGranger {
            signal,
            settings,
            connections,
            samples,
            estimator,
            bands,
            selection,
        })
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Compute GC, net GC, time-reversed GC and net time-reversed GC for every window and
    /// connection.
    pub fn process(self) -> Result<GrangerResults, MIError> {
        let n_windows = self.signal.windows().len();
        let n_grid = self.estimator.freqs().len();
        let omegas: Vec<f64> = self
            .selection
            .bins
            .iter()
            .map(|&k| PI * k as f64 / (n_grid - 1) as f64)
            .collect();

        let time_resolved = self.estimator.is_time_resolved() && !self.settings.average_timepoints;
        let all_times = self.signal.times();
        let window_times = &all_times[self.samples.0..self.samples.1];
        let times: Vec<f64> = match time_resolved {
            true => window_times.to_vec(),
            false => vec![(window_times[0] + window_times[window_times.len() - 1]) / 2.0],
        };

        let n_freqs = self.selection.freqs.len();
        let block_len = n_freqs * times.len();
        let size = n_windows * self.connections.len() * block_len;
        let mut gc = Vec::with_capacity(size);
        let mut net_gc = Vec::with_capacity(size);
        let mut trgc = Vec::with_capacity(size);
        let mut net_trgc = Vec::with_capacity(size);

        for window in 0..n_windows {
            let epochs = self.signal.window_epochs(window)?;
            for (con_id, con) in self.connections.iter().enumerate() {
                log::debug!(
                    "Window {}, connection {} ({} -> {})",
                    window,
                    con_id,
                    con.seeds.label,
                    con.targets.label
                );
                let rows: Vec<usize> = con
                    .seeds
                    .indices
                    .iter()
                    .chain(con.targets.indices.iter())
                    .copied()
                    .collect();
                let data: Vec<DMatrix<f64>> = epochs
                    .iter()
                    .map(|epoch| {
                        let selected = epoch.data.select_rows(rows.iter());
                        match self.estimator.is_time_resolved() {
                            true => selected,
                            false => selected
                                .columns(self.samples.0, self.samples.1 - self.samples.0)
                                .into_owned(),
                        }
                    })
                    .collect();

                let mut csd =
                    self.estimator
                        .csd(&data, self.settings.block_size, self.settings.n_jobs)?;
                if self.estimator.is_time_resolved() {
                    csd = csd.time_range(self.samples.0, self.samples.1)?;
                }
                if !time_resolved && csd.n_times() > 1 {
                    csd = csd.average_times();
                }
                let reduction = RankReduction::fit(
                    &csd,
                    con.seeds.len(),
                    con.targets.len(),
                    self.settings.n_components,
                )?;
                let csd = reduction.apply(&csd)?;
                let n_seeds = reduction.n_seed_components();
                let seeds: Vec<usize> = (0..n_seeds).collect();
                let targets: Vec<usize> =
                    (n_seeds..n_seeds + reduction.n_target_components()).collect();

                let per_time = par_map(csd.n_times(), self.settings.n_jobs, |t| {
                    measures_from_csd(&csd, t, self.settings.n_lags, &seeds, &targets, &omegas)
                })?;

                // [freq][time] within this window and connection
                let mut blocks = vec![vec![0.0; block_len]; 4];
                for (t, spectra) in per_time.iter().enumerate() {
                    let values = [
                        &spectra.gc,
                        &spectra.net_gc,
                        &spectra.trgc,
                        &spectra.net_trgc,
                    ];
                    for (m, v) in values.iter().enumerate() {
                        for (f, value) in self.selection.reduce(v).into_iter().enumerate() {
                            blocks[m][f * times.len() + t] = value;
                        }
                    }
                }
                gc.extend_from_slice(&blocks[0]);
                net_gc.extend_from_slice(&blocks[1]);
                trgc.extend_from_slice(&blocks[2]);
                net_trgc.extend_from_slice(&blocks[3]);
            }
        }

        let stride = self.connections.len() * block_len;
        let (n_windows, gc, net_gc, trgc, net_trgc) = match self.settings.average_windows {
            true => (
                1,
                average_windows(&gc, n_windows, stride),
                average_windows(&net_gc, n_windows, stride),
                average_windows(&trgc, n_windows, stride),
                average_windows(&net_trgc, n_windows, stride),
            ),
            false => (n_windows, gc, net_gc, trgc, net_trgc),
        };

        let mut processing = self.signal.processing().clone();
        processing.record("spectral_connectivity", self.used_settings())?;

        GrangerResults::new(
            self.connections,
            self.selection.freqs,
            self.bands,
            times,
            n_windows,
            gc,
            net_gc,
            trgc,
            net_trgc,
            processing,
        )
    }

    /// The settings relevant to the analysis, as recorded in the processing log.
    fn used_settings(&self) -> Map<String, Value> {
        let s = &self.settings;
        let mut params = Map::new();
        params.insert(
            "con_methods".to_string(),
            json!(Measure::ALL.iter().map(|m| m.as_str()).collect::<Vec<_>>()),
        );
        params.insert("power_method".to_string(), json!(s.power_method.as_str()));
        params.insert("n_lags".to_string(), json!(s.n_lags));
        params.insert("n_components".to_string(), json!(s.n_components));
        params.insert("average_windows".to_string(), json!(s.average_windows));
        params.insert("average_timepoints".to_string(), json!(s.average_timepoints));
        params.insert("t_min".to_string(), json!(s.tmin));
        params.insert("t_max".to_string(), json!(s.tmax));
        match s.power_method {
            PowerMethod::Multitaper => {
                params.insert("mt_bandwidth".to_string(), json!(s.mt_bandwidth));
                params.insert("mt_adaptive".to_string(), json!(s.mt_adaptive));
                params.insert("mt_low_bias".to_string(), json!(s.mt_low_bias));
            }
            PowerMethod::CwtMorlet => {
                params.insert("cwt_n_cycles".to_string(), json!(s.cwt_n_cycles));
            }
            PowerMethod::Fourier => {}
        }
        params
    }
}

fn average_windows(values: &[f64], n_windows: usize, stride: usize) -> Vec<f64> {
    (0..stride)
        .map(|i| (0..n_windows).map(|w| values[w * stride + i]).sum::<f64>() / n_windows as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::settings::{Bands, NComponents};
    use crate::signal::{ChannelInfo, ChannelSelector, ChannelType, Epoch};
    use crate::simulate::simulate_lagged_pair;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn settings(method: PowerMethod, seeds: &str, targets: &str) -> GrangerSettings {
        let mut s = GrangerSettings::new(
            method,
            ChannelSelector::parse(seeds).unwrap(),
            ChannelSelector::parse(targets).unwrap(),
        );
        s.n_lags = 10;
        s
    }

    fn lagged_pair() -> Signal {
        let mut rng = StdRng::seed_from_u64(42);
        simulate_lagged_pair(30, 200, 200.0, 5, 0.8, 0.5, &mut rng).unwrap()
    }

    #[test]
    fn test_gc_zero_without_coupling() {
        // independent AR(1) processes: no causality in the model
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.0, 0.3]);
        let lags = vec![
            DMatrix::from_row_slice(2, 2, &[1.0 / 0.75, 0.0, 0.0, 1.0 / 0.91]),
            &a * DMatrix::from_row_slice(2, 2, &[1.0 / 0.75, 0.0, 0.0, 1.0 / 0.91]),
        ];
        let model = VarModel::fit(&Autocovariance::new(lags).unwrap()).unwrap();
        let gc = spectral_gc(&model, &[0], &[1], &[0.1, 1.0, 2.0]).unwrap();
        for v in gc {
            assert_relative_eq!(v, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_gc_positive_with_coupling() {
        // x_1 drives x_2 with one lag
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.6, 0.2]);
        let mut gamma0 = DMatrix::identity(2, 2);
        for _ in 0..200 {
            gamma0 = &a * &gamma0 * a.transpose() + DMatrix::identity(2, 2);
        }
        let gamma1 = &a * &gamma0;
        let model = VarModel::fit(&Autocovariance::new(vec![gamma0, gamma1]).unwrap()).unwrap();
        let forward = spectral_gc(&model, &[0], &[1], &[0.5]).unwrap();
        let backward = spectral_gc(&model, &[1], &[0], &[0.5]).unwrap();
        assert!(forward[0] > 0.1);
        assert_relative_eq!(backward[0], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_freq_selection() {
        let grid: Vec<f64> = (0..=10).map(|k| k as f64 * 10.0).collect();
        let sel = FreqSelection::new(&grid, &[(10.0, 30.0), (60.0, 70.0)], 0, false, 0).unwrap();
        assert_eq!(sel.freqs, vec![10.0, 20.0, 30.0, 60.0, 70.0]);

        let sel = FreqSelection::new(&grid, &[(10.0, 50.0)], 1, false, 0).unwrap();
        assert_eq!(sel.freqs, vec![10.0, 30.0, 50.0]);

        let sel = FreqSelection::new(&grid, &[(10.0, 30.0), (60.0, 70.0)], 0, true, 0).unwrap();
        assert_eq!(sel.freqs, vec![20.0, 65.0]);
        assert_eq!(sel.reduce(&[1.0, 2.0, 3.0, 4.0, 6.0]), vec![2.0, 5.0]);

        assert!(matches!(
            FreqSelection::new(&grid, &[(10.0, 30.0), (31.0, 39.0)], 0, true, 0),
            Err(MIError::InvalidParameter(_))
        ));
        assert!(matches!(
            FreqSelection::new(&grid, &[(101.0, 200.0)], 0, false, 0),
            Err(MIError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_net_gc_identity() {
        let signal = lagged_pair();
        let forward = ConnectivityGranger::new(&signal, settings(PowerMethod::Fourier, "A", "B"))
            .unwrap()
            .process()
            .unwrap();
        let backward = ConnectivityGranger::new(&signal, settings(PowerMethod::Fourier, "B", "A"))
            .unwrap()
            .process()
            .unwrap();
        let gc_ab = forward.measure(Measure::Gc);
        let gc_ba = backward.measure(Measure::Gc);
        let net = forward.measure(Measure::NetGc);
        for f in 0..net.len() {
            assert_relative_eq!(net[f], gc_ab[f] - gc_ba[f], epsilon = 1e-10);
        }
        let net_trgc_ab = forward.measure(Measure::NetTrgc);
        let net_trgc_ba = backward.measure(Measure::NetTrgc);
        for f in 0..net.len() {
            assert_relative_eq!(net_trgc_ab[f], -net_trgc_ba[f], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_processing_log() {
        let signal = lagged_pair();
        let mut s = settings(PowerMethod::Multitaper, "A", "B");
        s.mt_bandwidth = Some(5.0);
        let results = ConnectivityGranger::new(&signal, s).unwrap().process().unwrap();
        let params = results.processing().get("spectral_connectivity").unwrap();
        assert_eq!(params["power_method"], json!("multitaper"));
        assert_eq!(params["n_lags"], json!(10));
        assert_eq!(params["n_components"], json!("rank"));
        assert_eq!(params["mt_bandwidth"], json!(5.0));
        assert!(params.get("cwt_n_cycles").is_none());
        assert_eq!(
            params["con_methods"],
            json!(["gc", "net_gc", "trgc", "net_trgc"])
        );
    }

    #[test]
    fn test_faverage_and_windows() {
        let mut signal = lagged_pair();
        signal.bootstrap(3, 20, 1).unwrap();
        let mut s = settings(PowerMethod::Fourier, "A", "B");
        s.fmin = Some(Bands::Multiple(vec![5.0, 20.0]));
        s.fmax = Some(Bands::Multiple(vec![15.0, 40.0]));
        s.faverage = true;
        let results = ConnectivityGranger::new(&signal, s.clone())
            .unwrap()
            .process()
            .unwrap();
        assert_eq!(results.n_windows(), 3);
        assert_eq!(results.freqs().len(), 2);
        assert_relative_eq!(results.freqs()[0], 10.0);
        assert_relative_eq!(results.freqs()[1], 30.0);

        s.average_windows = true;
        let averaged = ConnectivityGranger::new(&signal, s).unwrap().process().unwrap();
        assert_eq!(averaged.n_windows(), 1);
        let mean: f64 = (0..3)
            .map(|w| results.get(Measure::Gc, w, 0, 1, 0).unwrap())
            .sum::<f64>()
            / 3.0;
        assert_relative_eq!(averaged.get(Measure::Gc, 0, 0, 1, 0).unwrap(), mean, epsilon = 1e-12);
    }

    #[test]
    fn test_morlet_time_resolved() {
        let signal = lagged_pair();
        let mut s = settings(PowerMethod::CwtMorlet, "A", "B");
        s.cwt_freqs = Some((1..=10).map(|k| 10.0 * k as f64).collect());
        s.cwt_n_cycles = crate::connectivity::settings::NCycles::Single(5.0);
        s.n_lags = 5;
        s.fmin = Some(Bands::Single(10.0));
        s.fmax = Some(Bands::Single(40.0));
        s.tmin = Some(0.2);
        s.tmax = Some(0.3);
        let results = ConnectivityGranger::new(&signal, s.clone())
            .unwrap()
            .process()
            .unwrap();
        assert_eq!(results.times().len(), 21);
        assert_eq!(results.freqs(), &[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(results.measure(Measure::Gc).len(), 4 * 21);

        s.average_timepoints = true;
        let averaged = ConnectivityGranger::new(&signal, s).unwrap().process().unwrap();
        assert_eq!(averaged.times().len(), 1);
    }

    #[test]
    fn test_selector_errors() {
        let signal = lagged_pair();
        assert!(matches!(
            ConnectivityGranger::new(&signal, settings(PowerMethod::Fourier, "A", "C")),
            Err(MIError::NoChannelsMatch(_))
        ));
        let mut s = settings(PowerMethod::Fourier, "A", "B");
        s.targets = ChannelSelector::ByName(vec!["A".to_string(), "B".to_string()]);
        assert!(matches!(
            ConnectivityGranger::new(&signal, s),
            Err(MIError::AmbiguousSelector(_))
        ));
    }

    #[test]
    fn test_type_selectors_split_by_reference() {
        let mut rng = StdRng::seed_from_u64(42);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let channels = vec![
            ChannelInfo::new("ECOG_1", ChannelType::Ecog, "bipolar"),
            ChannelInfo::new("ECOG_2", ChannelType::Ecog, "common_average"),
            ChannelInfo::new("LFP_1", ChannelType::Dbs, "bipolar"),
        ];
        let epochs = (0..10)
            .map(|i| Epoch::new(DMatrix::from_fn(3, 100, |_, _| normal.sample(&mut rng)), i))
            .collect();
        let signal = Signal::new(channels, 100.0, 0.0, epochs).unwrap();
        let results = ConnectivityGranger::new(
            &signal,
            settings(PowerMethod::Fourier, "type_ecog", "type_dbs"),
        )
        .unwrap()
        .process()
        .unwrap();
        assert_eq!(results.connections().len(), 2);
        assert_eq!(results.connections()[1].seeds.label, "ecog_common_average");
    }

    #[test]
    fn test_invalid_lags_for_grid() {
        let signal = lagged_pair();
        let mut s = settings(PowerMethod::Fourier, "A", "B");
        s.n_lags = 100;
        assert!(matches!(
            ConnectivityGranger::new(&signal, s),
            Err(MIError::InvalidParameter(_))
        ));
        let mut s = settings(PowerMethod::Fourier, "A", "B");
        s.n_components = NComponents::Counts(2, 1);
        assert!(matches!(
            ConnectivityGranger::new(&signal, s).unwrap().process(),
            Err(MIError::InvalidParameter(_))
        ));
    }
}
