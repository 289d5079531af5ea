//! Readiness potentials: baseline-corrected, trial-averaged slow cortical potentials preceding
//! movement onset.
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::decoding::{PredictionSet, Screening};
use crate::error::MIError;
use crate::signal::{ChannelSelector, Signal};

/// Parameters of the readiness potential average.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadinessSettings {
    /// Start of the averaged window (s).
    pub tmin: f64,
    /// End of the averaged window (s).
    pub tmax: f64,
    pub baseline: (f64, f64),
    /// Peak-to-peak amplitude above which an epoch is rejected (V).
    pub reject: f64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        ReadinessSettings {
            tmin: -3.0,
            tmax: 2.0,
            baseline: (-3.0, -2.0),
            reject: 1e-3,
        }
    }
}

/// The average over epochs of a set of channels.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Evoked {
    pub channels: Vec<String>,
    pub times: Vec<f64>,
    /// Channels by time points.
    pub data: DMatrix<f64>,
    pub n_epochs: usize,
}

impl Evoked {
    /// The average over channels at each time point.
    pub fn channel_mean(&self) -> Vec<f64> {
        self.data.row_mean().iter().copied().collect()
    }

    /// Save the evoked response to a file (JSON).
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

/// Baseline-correct, reject and crop the picked channels of a screened signal.
fn prepare(
    signal: &Signal,
    picks: &ChannelSelector,
    settings: &ReadinessSettings,
) -> Result<Signal, MIError> {
    if !signal.processing().contains("drop_bad_epochs") {
        return Err(MIError::MissingDependency(
            "bad epochs must be dropped before averaging readiness potentials".to_string(),
        ));
    }
    let mut picked = signal.pick(picks)?;
    picked.apply_baseline(settings.baseline)?;
    picked.reject_by_amplitude(settings.reject)?;
    if picked.n_epochs() == 0 {
        return Err(MIError::InvalidParameter(format!(
            "all epochs exceed the rejection threshold {}",
            settings.reject
        )));
    }
    picked.crop(settings.tmin, settings.tmax)
}

/// Average the picked channels of a signal over epochs.
///
/// The signal must have been screened for bad epochs. Each epoch is corrected by its mean over
/// the baseline window, epochs with a peak-to-peak amplitude above `settings.reject` on a
/// picked channel are rejected, and the remaining epochs are cropped and averaged.
pub fn compute_readiness_potential(
    signal: &Signal,
    picks: &ChannelSelector,
    settings: &ReadinessSettings,
) -> Result<Evoked, MIError> {
    let prepared = prepare(signal, picks, settings)?;
    let n_epochs = prepared.n_epochs();
    let mut data = DMatrix::zeros(prepared.n_channels(), prepared.n_times());
    for epoch in prepared.epochs() {
        data += &epoch.data;
    }
    data /= n_epochs as f64;
    log::info!(
        "Averaged {} epochs over {} channels",
        n_epochs,
        prepared.n_channels()
    );
    Ok(Evoked {
        channels: prepared
            .channel_names()
            .iter()
            .map(|name| name.to_string())
            .collect(),
        times: prepared.times(),
        data,
        n_epochs,
    })
}

/// The per-epoch average of the picked channels, as timelocked traces for the decoding time
/// estimator. Trials are identified by their event ids.
pub fn timelocked_traces(
    signal: &Signal,
    picks: &ChannelSelector,
    settings: &ReadinessSettings,
) -> Result<PredictionSet, MIError> {
    let prepared = prepare(signal, picks, settings)?;
    let n_dropped = signal
        .processing()
        .get("drop_bad_epochs")
        .and_then(|params| params.get("n_dropped"))
        .and_then(|value| value.as_u64())
        .unwrap_or(0) as usize;

    let traces: Vec<_> = prepared
        .epochs()
        .iter()
        .map(|epoch| epoch.data.row_mean())
        .collect();
    let data = DMatrix::from_fn(traces.len(), prepared.n_times(), |i, j| traces[i][j]);
    let trial_ids = prepared.epochs().iter().map(|epoch| epoch.event_id).collect();

    let mut set = PredictionSet::new(prepared.times(), data, trial_ids)?;
    set.set_screening(Screening::Screened { n_dropped });
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::BadEpochs;
    use crate::signal::{ChannelInfo, ChannelType, Epoch};
    use approx::assert_relative_eq;

    /// Two ECoG channels at 10 Hz from -3.5 s to 2.4 s, with a ramp starting at -1 s.
    fn signal() -> Signal {
        let channels = vec![
            ChannelInfo::new("ECOG_L_1", ChannelType::Ecog, "bipolar"),
            ChannelInfo::new("ECOG_L_2", ChannelType::Ecog, "bipolar"),
            ChannelInfo::new("LFP_L_1", ChannelType::Dbs, "bipolar"),
        ];
        let epochs = (0..4)
            .map(|id| {
                let data = DMatrix::from_fn(3, 60, |c, t| {
                    let time = -3.5 + t as f64 / 10.0;
                    let offset = 1e-5 * (id + c) as f64;
                    let ramp = if time > -1.0 { -1e-5 * (time + 1.0) } else { 0.0 };
                    // epoch 3 carries an artifact on the first channel
                    let artifact = if id == 3 && c == 0 && t == 40 { 5e-3 } else { 0.0 };
                    offset + (c as f64 + 1.0) * ramp + artifact
                });
                Epoch::new(data, id as i64)
            })
            .collect();
        Signal::new(channels, 10.0, -3.5, epochs).unwrap()
    }

    fn screened() -> Signal {
        let mut signal = signal();
        signal.drop_bad_epochs(&BadEpochs::from_ids([1])).unwrap();
        signal
    }

    fn ecog() -> ChannelSelector {
        ChannelSelector::ByType {
            ch_type: ChannelType::Ecog,
            split_by_reference: false,
        }
    }

    #[test]
    fn test_requires_screening() {
        assert!(matches!(
            compute_readiness_potential(&signal(), &ecog(), &ReadinessSettings::default()),
            Err(MIError::MissingDependency(_))
        ));
    }

    #[test]
    fn test_readiness_potential() {
        let evoked =
            compute_readiness_potential(&screened(), &ecog(), &ReadinessSettings::default())
                .unwrap();
        assert_eq!(evoked.channels, vec!["ECOG_L_1", "ECOG_L_2"]);
        // epoch 1 is bad and epoch 3 is rejected
        assert_eq!(evoked.n_epochs, 2);
        assert_eq!(evoked.times.len(), 51);
        assert_relative_eq!(evoked.times[0], -3.0, epsilon = 1e-12);
        assert_relative_eq!(evoked.data[(0, 0)], 0.0, epsilon = 1e-15);
        // at 2 s the ramp is -3e-5 on the first channel and -6e-5 on the second
        assert_relative_eq!(evoked.data[(1, 50)], -6e-5, epsilon = 1e-12);
        assert_relative_eq!(evoked.channel_mean()[50], -4.5e-5, epsilon = 1e-12);
    }

    #[test]
    fn test_timelocked_traces() {
        let set = timelocked_traces(&screened(), &ecog(), &ReadinessSettings::default()).unwrap();
        assert_eq!(set.trial_ids(), &[0, 2]);
        assert_eq!(set.screening(), Screening::Screened { n_dropped: 1 });
        assert_relative_eq!(set.data()[(1, 50)], -4.5e-5, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_baseline() {
        let settings = ReadinessSettings {
            baseline: (-10.0, -9.0),
            ..Default::default()
        };
        assert!(matches!(
            compute_readiness_potential(&screened(), &ecog(), &settings),
            Err(MIError::MissingDependency(_))
        ));
    }
}
