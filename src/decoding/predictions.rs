//! Trial by time matrices of classifier predictions.
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::MIError;
use crate::recording::BadEpochs;
use crate::signal::signal::sample_range;

/// Tolerance, relative to the sampling step, when matching times to window bounds.
const TIME_TOLERANCE: f64 = 0.5;

/// Whether the trials went through bad epoch screening.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Screening {
    Unscreened,
    Screened { n_dropped: usize },
}

/// How the baseline window is used to normalize the traces.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum BaselineMode {
    /// Subtract the baseline mean.
    #[serde(rename = "mean")]
    Mean,
    /// Subtract the baseline mean and divide by the baseline standard deviation.
    #[serde(rename = "zscore")]
    Zscore,
}

#[derive(Deserialize)]
struct TimelockedFile {
    times: Vec<f64>,
    predictions: Vec<Vec<f64>>,
    #[serde(default)]
    trial_ids: Option<Vec<i64>>,
}

/// Timelocked prediction traces, one row per trial.
#[derive(Debug, PartialEq, Clone)]
pub struct PredictionSet {
    times: Vec<f64>,
    data: DMatrix<f64>,
    trial_ids: Vec<i64>,
    screening: Screening,
}

impl PredictionSet {
    /// Create an unscreened prediction set from a trial by time matrix.
    pub fn new(times: Vec<f64>, data: DMatrix<f64>, trial_ids: Vec<i64>) -> Result<Self, MIError> {
        if data.ncols() != times.len() {
            return Err(MIError::IncompatibleData(format!(
                "{} prediction samples for {} time points",
                data.ncols(),
                times.len()
            )));
        }
        if data.nrows() != trial_ids.len() {
            return Err(MIError::IncompatibleData(format!(
                "{} trials for {} trial ids",
                data.nrows(),
                trial_ids.len()
            )));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(MIError::InvalidParameter(
                "prediction times must be strictly increasing".to_string(),
            ));
        }
        Ok(PredictionSet {
            times,
            data,
            trial_ids,
            screening: Screening::Unscreened,
        })
    }

    /// Read the timelocked predictions of one recording (JSON with `times`, `predictions` and
    /// optional `trial_ids`). Trials are numbered from zero when no ids are stored.
    pub fn from_timelocked_json<P: AsRef<Path>>(path: P) -> Result<Self, MIError> {
        let file = File::open(path.as_ref())?;
        let raw: TimelockedFile = serde_json::from_reader(BufReader::new(file))?;

        let n_times = raw.times.len();
        if let Some(row) = raw.predictions.iter().find(|row| row.len() != n_times) {
            return Err(MIError::IncompatibleData(format!(
                "trial with {} samples for {} time points",
                row.len(),
                n_times
            )));
        }
        let n_trials = raw.predictions.len();
        let data = DMatrix::from_fn(n_trials, n_times, |i, j| raw.predictions[i][j]);
        let trial_ids = raw
            .trial_ids
            .unwrap_or_else(|| (0..n_trials as i64).collect());
        log::debug!(
            "Loaded {} trials of {} samples from {}",
            n_trials,
            n_times,
            path.as_ref().display()
        );
        PredictionSet::new(raw.times, data, trial_ids)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    pub fn trial_ids(&self) -> &[i64] {
        &self.trial_ids
    }

    pub fn n_trials(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn screening(&self) -> Screening {
        self.screening
    }

    pub fn is_screened(&self) -> bool {
        matches!(self.screening, Screening::Screened { .. })
    }

    pub(crate) fn set_screening(&mut self, screening: Screening) {
        self.screening = screening;
    }

    /// Remove the trials listed in the bad epoch table. Returns the number of trials removed.
    /// Screening a set twice is an error.
    pub fn drop_bad_trials(&mut self, bad_epochs: &BadEpochs) -> Result<usize, MIError> {
        if self.is_screened() {
            return Err(MIError::ProcessingOrder(
                "bad trials have already been dropped".to_string(),
            ));
        }
        let kept: Vec<usize> = (0..self.n_trials())
            .filter(|&i| !bad_epochs.contains(self.trial_ids[i]))
            .collect();
        let n_dropped = self.n_trials() - kept.len();

        let mut screened = self.select_trials(&kept);
        screened.screening = Screening::Screened { n_dropped };
        *self = screened;
        log::info!("Dropped {} bad trials, {} left", n_dropped, self.n_trials());
        Ok(n_dropped)
    }

    /// A new set made of the given trials (repetitions allowed), keeping the screening state.
    pub fn select_trials(&self, indices: &[usize]) -> PredictionSet {
        let data = self.data.select_rows(indices.iter());
        PredictionSet {
            times: self.times.clone(),
            data,
            trial_ids: indices.iter().map(|&i| self.trial_ids[i]).collect(),
            screening: self.screening,
        }
    }

    fn window(&self, tmin: f64, tmax: f64) -> Option<(usize, usize)> {
        let step = match self.times.len() {
            0 | 1 => 0.0,
            _ => self.times[1] - self.times[0],
        };
        sample_range(&self.times, tmin, tmax, TIME_TOLERANCE * step)
    }

    /// Normalize the traces by the statistics of the baseline window.
    ///
    /// With `trialwise`, each trial uses its own baseline. Otherwise the baseline samples of all
    /// trials are pooled.
    pub fn baseline_correct(
        &mut self,
        baseline: (f64, f64),
        mode: BaselineMode,
        trialwise: bool,
    ) -> Result<(), MIError> {
        let (start, stop) = self.window(baseline.0, baseline.1).ok_or_else(|| {
            MIError::MissingDependency(format!(
                "no prediction sample in the baseline window [{}, {}]",
                baseline.0, baseline.1
            ))
        })?;
        let block = self.data.columns(start, stop - start);

        let stats: Vec<(f64, f64)> = match trialwise {
            true => block
                .row_iter()
                .map(|row| mean_std(&row.iter().copied().collect::<Vec<f64>>()))
                .collect(),
            false => {
                let pooled: Vec<f64> = block.iter().copied().collect();
                vec![mean_std(&pooled); self.n_trials()]
            }
        };

        let scales = stats
            .iter()
            .enumerate()
            .map(|(i, &(_, std))| match mode {
                BaselineMode::Mean => Ok(1.0),
                BaselineMode::Zscore if std > 0.0 => Ok(1.0 / std),
                BaselineMode::Zscore => Err(MIError::NumericalError(format!(
                    "baseline of trial {} has zero variance",
                    self.trial_ids[i]
                ))),
            })
            .collect::<Result<Vec<f64>, MIError>>()?;

        for (i, (&(mean, _), scale)) in stats.iter().zip(scales).enumerate() {
            self.data.row_mut(i).apply(|v| *v = (*v - mean) * scale);
        }
        Ok(())
    }

    /// A copy restricted to the samples within [tmin, tmax].
    pub fn crop(&self, tmin: f64, tmax: f64) -> Result<PredictionSet, MIError> {
        let (start, stop) = self.window(tmin, tmax).ok_or_else(|| {
            MIError::InvalidParameter(format!("no prediction sample in [{}, {}]", tmin, tmax))
        })?;
        Ok(PredictionSet {
            times: self.times[start..stop].to_vec(),
            data: self.data.columns(start, stop - start).into_owned(),
            trial_ids: self.trial_ids.clone(),
            screening: self.screening,
        })
    }

    /// The trial average at each time point.
    pub fn mean_trace(&self) -> Vec<f64> {
        self.data.row_mean().iter().copied().collect()
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
