//! Earliest decoding time, averaged over resampled cluster permutation tests.
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::cluster::{cluster_permutation_test, first_significant_sample, ClusterCorrection, Tail};
use super::predictions::PredictionSet;
use crate::error::MIError;
use crate::parallel::par_map;

fn default_n_perm() -> usize {
    500
}

fn default_alpha() -> f64 {
    0.05
}

fn default_min_cluster_size() -> usize {
    2
}

fn default_resample_trials() -> Option<usize> {
    Some(50)
}

fn default_true() -> bool {
    true
}

fn default_n_iterations() -> usize {
    500
}

fn default_n_jobs() -> usize {
    1
}

fn default_seed() -> u64 {
    42
}

/// Parameters of the earliest decoding time estimator.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecodingTimeSettings {
    /// The prediction value of no effect.
    #[serde(default)]
    pub threshold: f64,
    #[serde(default = "default_n_perm")]
    pub n_perm: usize,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub correction: ClusterCorrection,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Trials drawn per iteration, or all trials without resampling.
    #[serde(default = "default_resample_trials")]
    pub resample_trials: Option<usize>,
    /// Draw trials with replacement.
    #[serde(default = "default_true")]
    pub replace: bool,
    #[serde(default = "default_n_iterations")]
    pub n_iterations: usize,
    #[serde(default = "default_n_jobs")]
    pub n_jobs: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub tail: Tail,
}

impl Default for DecodingTimeSettings {
    fn default() -> Self {
        DecodingTimeSettings {
            threshold: 0.0,
            n_perm: default_n_perm(),
            alpha: default_alpha(),
            correction: ClusterCorrection::default(),
            min_cluster_size: default_min_cluster_size(),
            resample_trials: default_resample_trials(),
            replace: true,
            n_iterations: default_n_iterations(),
            n_jobs: default_n_jobs(),
            seed: default_seed(),
            tail: Tail::default(),
        }
    }
}

impl DecodingTimeSettings {
    pub fn validate(&self) -> Result<(), MIError> {
        if self.n_perm == 0 {
            return Err(MIError::InvalidParameter(
                "n_perm must be positive".to_string(),
            ));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(MIError::InvalidParameter(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if self.min_cluster_size == 0 {
            return Err(MIError::InvalidParameter(
                "min_cluster_size must be positive".to_string(),
            ));
        }
        if self.resample_trials == Some(0) {
            return Err(MIError::InvalidParameter(
                "resample_trials must be positive".to_string(),
            ));
        }
        if self.n_iterations == 0 {
            return Err(MIError::InvalidParameter(
                "n_iterations must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Save the settings to a file (JSON).
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load and validate settings from a file (JSON).
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, MIError> {
        let file = File::open(path)?;
        let settings: DecodingTimeSettings = serde_json::from_reader(BufReader::new(file))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// The averaged estimate over all iterations.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct EarliestTimepoint {
    pub time: f64,
    pub trials_used: usize,
}

/// The trial indices used by one iteration.
fn draw_trials<R: Rng>(n_trials: usize, settings: &DecodingTimeSettings, rng: &mut R) -> Vec<usize> {
    match (settings.resample_trials, settings.replace) {
        (None, _) => (0..n_trials).collect(),
        (Some(k), true) => (0..k).map(|_| rng.gen_range(0..n_trials)).collect(),
        (Some(k), false) => sample(rng, n_trials, k.min(n_trials)).into_vec(),
    }
}

/// One resampled estimate: the time of the first significant sample, or `default`, and the
/// number of trials tested.
pub fn single_earliest_timepoint<R: Rng>(
    set: &PredictionSet,
    settings: &DecodingTimeSettings,
    default: f64,
    rng: &mut R,
) -> Result<(f64, usize), MIError> {
    let trials = draw_trials(set.n_trials(), settings, rng);
    let resampled = set.select_trials(&trials);
    let clusters = cluster_permutation_test(
        resampled.data(),
        settings.threshold,
        settings.n_perm,
        settings.alpha,
        settings.correction,
        settings.tail,
        rng,
    )?;
    let time = first_significant_sample(&clusters, settings.alpha, settings.min_cluster_size)
        .map_or(default, |i| set.times()[i]);
    Ok((time, trials.len()))
}

/// Estimate the earliest time at which the predictions differ from the threshold.
///
/// The set must have been screened for bad trials. Each iteration resamples the trials, runs a
/// cluster permutation test and reports the first sample of the earliest significant cluster,
/// or `default` when there is none. Iterations are seeded from `settings.seed` and their index,
/// so the estimate does not depend on the number of jobs.
///
/// # Example
/// ```rust
/// use motor_intention::decoding::{estimate_earliest_timepoint, DecodingTimeSettings, PredictionSet};
/// use motor_intention::recording::BadEpochs;
/// use nalgebra::DMatrix;
///
/// let times: Vec<f64> = (0..20).map(|i| -1.0 + 0.1 * i as f64).collect();
/// let mut set = PredictionSet::new(times, DMatrix::zeros(10, 20), (0..10).collect()).unwrap();
/// set.drop_bad_trials(&BadEpochs::none()).unwrap();
///
/// let settings = DecodingTimeSettings { n_perm: 20, n_iterations: 4, ..Default::default() };
/// let estimate = estimate_earliest_timepoint(&set, &settings, 0.5).unwrap();
/// assert_eq!(estimate.time, 0.5);
/// assert_eq!(estimate.trials_used, 50);
/// ```
pub fn estimate_earliest_timepoint(
    set: &PredictionSet,
    settings: &DecodingTimeSettings,
    default: f64,
) -> Result<EarliestTimepoint, MIError> {
    settings.validate()?;
    if !set.is_screened() {
        return Err(MIError::MissingDependency(
            "predictions must be screened for bad trials before estimating decoding times"
                .to_string(),
        ));
    }
    if set.n_trials() == 0 || set.n_times() == 0 {
        return Err(MIError::InvalidParameter(
            "cannot estimate a decoding time without trials".to_string(),
        ));
    }

    log::info!(
        "Estimating earliest decoding time from {} trials over {} iterations",
        set.n_trials(),
        settings.n_iterations
    );
    let estimates = par_map(settings.n_iterations, settings.n_jobs, |i| {
        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed.wrapping_add(i as u64));
        single_earliest_timepoint(set, settings, default, &mut rng)
    })?;

    let n = estimates.len() as f64;
    let time = estimates.iter().map(|(t, _)| t).sum::<f64>() / n;
    let trials_used = estimates.iter().map(|&(_, k)| k as f64).sum::<f64>() / n;
    log::debug!("Earliest decoding time {:.3} s", time);
    Ok(EarliestTimepoint {
        time,
        trials_used: trials_used.round() as usize,
    })
}

/// Clip a decoding time to the reference event, so that detections after the event count as
/// detections at the event.
pub fn clip_to_reference(time: f64) -> f64 {
    time.min(0.0)
}
