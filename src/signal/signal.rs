//! Epoched multichannel recordings.
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::channel::ChannelInfo;
use super::processing::ProcessingLog;
use super::selector::ChannelSelector;
use crate::error::MIError;
use crate::recording::BadEpochs;

/// One trial, with one row per channel and one column per time sample.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Epoch {
    pub data: DMatrix<f64>,
    pub event_id: i64,
}

impl Epoch {
    pub fn new(data: DMatrix<f64>, event_id: i64) -> Self {
        Epoch { data, event_id }
    }

    /// The largest peak-to-peak amplitude over all channels.
    pub fn peak_to_peak(&self) -> f64 {
        self.data
            .row_iter()
            .map(|row| row.max() - row.min())
            .fold(0.0, f64::max)
    }
}

/// A signal made of epochs sharing the same channels and time axis.
///
/// The channels are fixed at construction. Epochs can only be removed. Connectivity is computed
/// separately for each window, i.e., each set of epoch indices, which by default is a single
/// window with all epochs.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(try_from = "SignalFile")]
pub struct Signal {
    channels: Vec<ChannelInfo>,
    sfreq: f64,
    tmin: f64,
    epochs: Vec<Epoch>,
    windows: Vec<Vec<usize>>,
    metadata: BTreeMap<String, String>,
    processing: ProcessingLog,
}

/// The stored form of a signal, checked again when loaded.
#[derive(Deserialize)]
struct SignalFile {
    channels: Vec<ChannelInfo>,
    sfreq: f64,
    tmin: f64,
    epochs: Vec<Epoch>,
    windows: Vec<Vec<usize>>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    processing: ProcessingLog,
}

impl TryFrom<SignalFile> for Signal {
    type Error = MIError;

    fn try_from(file: SignalFile) -> Result<Self, Self::Error> {
        let mut signal = Signal::new(file.channels, file.sfreq, file.tmin, file.epochs)?;
        if let Some(&id) = file.windows.iter().flatten().find(|&&id| id >= signal.n_epochs()) {
            return Err(MIError::IncompatibleData(format!(
                "a window refers to epoch {} of a signal with {} epochs",
                id,
                signal.n_epochs()
            )));
        }
        signal.windows = file.windows;
        signal.metadata = file.metadata;
        signal.processing = file.processing;
        Ok(signal)
    }
}

impl Signal {
    /// Create a signal from epochs.
    /// The function returns an error if there is no channel, if two channels share a name, if the
    /// sampling frequency is not positive, if the epochs have no sample, or if the epochs do not
    /// all have the same shape.
    ///
    /// # Example
    /// ```rust
    /// use motor_intention::signal::{ChannelInfo, ChannelType, Epoch, Signal};
    /// use nalgebra::DMatrix;
    ///
    /// let channels = vec![
    ///     ChannelInfo::new("ECOG_L_1", ChannelType::Ecog, "bipolar"),
    ///     ChannelInfo::new("LFP_L_1", ChannelType::Dbs, "bipolar"),
    /// ];
    /// let epochs = (0..3).map(|i| Epoch::new(DMatrix::zeros(2, 100), i)).collect();
    /// let signal = Signal::new(channels, 100.0, -0.5, epochs).unwrap();
    ///
    /// assert_eq!(signal.n_epochs(), 3);
    /// assert_eq!(signal.times()[50], 0.0);
    /// ```
    pub fn new(
        channels: Vec<ChannelInfo>,
        sfreq: f64,
        tmin: f64,
        epochs: Vec<Epoch>,
    ) -> Result<Self, MIError> {
        if channels.is_empty() {
            return Err(MIError::InvalidParameter(
                "a signal must have at least one channel".to_string(),
            ));
        }
        for (id, ch) in channels.iter().enumerate() {
            if channels[..id].iter().any(|other| other.name == ch.name) {
                return Err(MIError::InvalidParameter(format!(
                    "the channel name '{}' is used more than once",
                    ch.name
                )));
            }
        }
        if !(sfreq > 0.0 && sfreq.is_finite()) {
            return Err(MIError::InvalidParameter(
                "the sampling frequency must be positive".to_string(),
            ));
        }
        if !tmin.is_finite() {
            return Err(MIError::InvalidParameter(
                "the epoch start time must be finite".to_string(),
            ));
        }
        let n_times = epochs.first().map_or(0, |epoch| epoch.data.ncols());
        if !epochs.is_empty() && n_times == 0 {
            return Err(MIError::InvalidParameter(
                "epochs must have at least one sample".to_string(),
            ));
        }
        for epoch in epochs.iter() {
            if epoch.data.nrows() != channels.len() || epoch.data.ncols() != n_times {
                return Err(MIError::IncompatibleData(format!(
                    "epoch {} has shape {}x{}, expected {}x{}",
                    epoch.event_id,
                    epoch.data.nrows(),
                    epoch.data.ncols(),
                    channels.len(),
                    n_times
                )));
            }
        }

        let windows = vec![(0..epochs.len()).collect()];
        Ok(Signal {
            channels,
            sfreq,
            tmin,
            epochs,
            windows,
            metadata: BTreeMap::new(),
            processing: ProcessingLog::new(),
        })
    }

    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|ch| ch.name.as_str()).collect()
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|ch| ch.name == name)
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    pub fn tmin(&self) -> f64 {
        self.tmin
    }

    pub fn n_times(&self) -> usize {
        self.epochs.first().map_or(0, |epoch| epoch.data.ncols())
    }

    /// The time of every sample, relative to the event.
    pub fn times(&self) -> Vec<f64> {
        (0..self.n_times())
            .map(|i| self.tmin + i as f64 / self.sfreq)
            .collect()
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    pub fn n_epochs(&self) -> usize {
        self.epochs.len()
    }

    pub fn windows(&self) -> &[Vec<usize>] {
        &self.windows
    }

    /// The epochs of the window with the given index.
    pub fn window_epochs(&self, window: usize) -> Result<Vec<&Epoch>, MIError> {
        let indices = self.windows.get(window).ok_or_else(|| {
            MIError::InvalidParameter(format!("window {} does not exist", window))
        })?;
        Ok(indices.iter().map(|&id| &self.epochs[id]).collect())
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn processing(&self) -> &ProcessingLog {
        &self.processing
    }

    /// Remove the epochs with the given indices.
    pub fn drop_epochs(&mut self, indices: &[usize]) -> Result<(), MIError> {
        if let Some(&id) = indices.iter().find(|&&id| id >= self.epochs.len()) {
            return Err(MIError::InvalidParameter(format!(
                "epoch index {} is out of range for {} epochs",
                id,
                self.epochs.len()
            )));
        }
        let mut params = Map::new();
        params.insert("indices".to_string(), json!(indices));
        self.processing.record("drop_epochs", params)?;
        self.remove_epochs(indices);
        Ok(())
    }

    /// Remove the epochs whose event is listed in the bad epoch table.
    /// Returns the number of epochs removed.
    pub fn drop_bad_epochs(&mut self, bad_epochs: &BadEpochs) -> Result<usize, MIError> {
        let indices: Vec<usize> = self
            .epochs
            .iter()
            .enumerate()
            .filter(|(_, epoch)| bad_epochs.contains(epoch.event_id))
            .map(|(id, _)| id)
            .collect();
        let mut params = Map::new();
        params.insert("event_ids".to_string(), json!(bad_epochs.event_ids()));
        params.insert("n_dropped".to_string(), json!(indices.len()));
        self.processing.record("drop_bad_epochs", params)?;
        self.remove_epochs(&indices);
        log::info!("Dropped {} bad epochs", indices.len());
        Ok(indices.len())
    }

    /// Remove the epochs whose peak-to-peak amplitude exceeds the threshold on any channel.
    /// Returns the number of epochs removed.
    pub fn reject_by_amplitude(&mut self, threshold: f64) -> Result<usize, MIError> {
        if !(threshold > 0.0) {
            return Err(MIError::InvalidParameter(
                "the rejection threshold must be positive".to_string(),
            ));
        }
        let indices: Vec<usize> = self
            .epochs
            .iter()
            .enumerate()
            .filter(|(_, epoch)| epoch.peak_to_peak() > threshold)
            .map(|(id, _)| id)
            .collect();
        let mut params = Map::new();
        params.insert("reject".to_string(), json!(threshold));
        self.processing.record("reject_by_amplitude", params)?;
        self.remove_epochs(&indices);
        if !indices.is_empty() {
            log::warn!(
                "Rejected {} of {} epochs above {}",
                indices.len(),
                indices.len() + self.epochs.len(),
                threshold
            );
        }
        Ok(indices.len())
    }

    fn remove_epochs(&mut self, indices: &[usize]) {
        let mut new_index = vec![None; self.epochs.len()];
        let mut kept = 0;
        for (id, slot) in new_index.iter_mut().enumerate() {
            if !indices.contains(&id) {
                *slot = Some(kept);
                kept += 1;
            }
        }

        let epochs = std::mem::take(&mut self.epochs);
        self.epochs = epochs
            .into_iter()
            .enumerate()
            .filter(|(id, _)| new_index[*id].is_some())
            .map(|(_, epoch)| epoch)
            .collect();

        self.windows = self
            .windows
            .iter()
            .map(|window| window.iter().filter_map(|&id| new_index[id]).collect())
            .filter(|window: &Vec<usize>| !window.is_empty())
            .collect();
    }

    /// A copy of the signal restricted to the samples within [tmin, tmax].
    pub fn crop(&self, tmin: f64, tmax: f64) -> Result<Signal, MIError> {
        if tmax < tmin {
            return Err(MIError::InvalidParameter(format!(
                "tmax ({}) must not be smaller than tmin ({})",
                tmax, tmin
            )));
        }
        let (start, stop) = sample_range(&self.times(), tmin, tmax, 0.5 / self.sfreq)
            .ok_or_else(|| {
                MIError::InvalidParameter(format!("no sample in [{}, {}]", tmin, tmax))
            })?;

        let mut cropped = self.clone();
        let mut params = Map::new();
        params.insert("tmin".to_string(), json!(tmin));
        params.insert("tmax".to_string(), json!(tmax));
        cropped.processing.record("crop", params)?;
        cropped.tmin = self.tmin + start as f64 / self.sfreq;
        for epoch in cropped.epochs.iter_mut() {
            epoch.data = epoch.data.columns(start, stop - start).into_owned();
        }
        Ok(cropped)
    }

    /// A copy of the signal with only the channels matched by the selector, in signal order.
    pub fn pick(&self, selector: &ChannelSelector) -> Result<Signal, MIError> {
        let mut indices: Vec<usize> = selector
            .resolve(&self.channels)?
            .into_iter()
            .flat_map(|group| group.indices)
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let mut picked = self.clone();
        let mut params = Map::new();
        params.insert("picks".to_string(), json!(selector.to_string()));
        picked.processing.record("pick", params)?;
        picked.channels = indices.iter().map(|&i| self.channels[i].clone()).collect();
        for epoch in picked.epochs.iter_mut() {
            epoch.data = epoch.data.select_rows(indices.iter());
        }
        Ok(picked)
    }

    /// Subtract from every channel of every epoch its mean over the baseline window.
    pub fn apply_baseline(&mut self, baseline: (f64, f64)) -> Result<(), MIError> {
        let (start, stop) = sample_range(&self.times(), baseline.0, baseline.1, 0.5 / self.sfreq)
            .ok_or_else(|| {
                MIError::MissingDependency(format!(
                    "no sample in the baseline window [{}, {}]",
                    baseline.0, baseline.1
                ))
            })?;
        let mut params = Map::new();
        params.insert("baseline".to_string(), json!([baseline.0, baseline.1]));
        self.processing.record("apply_baseline", params)?;
        for epoch in self.epochs.iter_mut() {
            let means = epoch.data.columns(start, stop - start).column_mean();
            for mut col in epoch.data.column_iter_mut() {
                col -= &means;
            }
        }
        Ok(())
    }

    /// Replace the windows by bootstrap samples of the epochs, drawn with replacement.
    pub fn bootstrap(
        &mut self,
        n_bootstraps: usize,
        n_epochs_per_bootstrap: usize,
        seed: u64,
    ) -> Result<(), MIError> {
        if n_bootstraps == 0 || n_epochs_per_bootstrap == 0 {
            return Err(MIError::InvalidParameter(
                "the number of bootstraps and of epochs per bootstrap must be positive"
                    .to_string(),
            ));
        }
        if self.epochs.is_empty() {
            return Err(MIError::InvalidParameter(
                "cannot bootstrap a signal without epochs".to_string(),
            ));
        }
        let mut params = Map::new();
        params.insert("n_bootstraps".to_string(), json!(n_bootstraps));
        params.insert("n_epochs_per_bootstrap".to_string(), json!(n_epochs_per_bootstrap));
        params.insert("seed".to_string(), json!(seed));
        self.processing.record("bootstrap", params)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let n_epochs = self.epochs.len();
        self.windows = (0..n_bootstraps)
            .map(|_| {
                (0..n_epochs_per_bootstrap)
                    .map(|_| rng.gen_range(0..n_epochs))
                    .collect()
            })
            .collect();
        log::debug!("Drew {} bootstrap windows", n_bootstraps);
        Ok(())
    }

    /// Save the signal to a file (JSON).
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a signal from a file (JSON).
    /// The function returns an error if the stored signal breaks any of the checks of
    /// [`Signal::new`], or if a window refers to a missing epoch.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Signal, MIError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let signal = serde_json::from_reader(reader)?;
        Ok(signal)
    }
}

/// The half-open range of the samples with time in [tmin - tol, tmax + tol], if any.
pub fn sample_range(times: &[f64], tmin: f64, tmax: f64, tol: f64) -> Option<(usize, usize)> {
    let start = times.iter().position(|&t| t >= tmin - tol)?;
    let stop = times.iter().rposition(|&t| t <= tmax + tol)? + 1;
    match start < stop {
        true => Some((start, stop)),
        false => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::channel::ChannelType;
    use approx::assert_relative_eq;

    fn channels() -> Vec<ChannelInfo> {
        vec![
            ChannelInfo::new("ECOG_L_1", ChannelType::Ecog, "bipolar"),
            ChannelInfo::new("LFP_L_1", ChannelType::Dbs, "bipolar"),
        ]
    }

    fn signal(n_epochs: usize) -> Signal {
        let epochs = (0..n_epochs)
            .map(|i| Epoch::new(DMatrix::from_element(2, 10, i as f64), i as i64 + 100))
            .collect();
        Signal::new(channels(), 10.0, -0.5, epochs).unwrap()
    }

    #[test]
    fn test_new_validation() {
        assert!(matches!(
            Signal::new(vec![], 10.0, 0.0, vec![]),
            Err(MIError::InvalidParameter(_))
        ));

        let mut dup = channels();
        dup[1].name = "ECOG_L_1".to_string();
        assert!(matches!(
            Signal::new(dup, 10.0, 0.0, vec![]),
            Err(MIError::InvalidParameter(_))
        ));

        assert!(matches!(
            Signal::new(channels(), 0.0, 0.0, vec![]),
            Err(MIError::InvalidParameter(_))
        ));

        let epochs = vec![
            Epoch::new(DMatrix::zeros(2, 10), 0),
            Epoch::new(DMatrix::zeros(2, 9), 1),
        ];
        assert!(matches!(
            Signal::new(channels(), 10.0, 0.0, epochs),
            Err(MIError::IncompatibleData(_))
        ));

        let empty = vec![Epoch::new(DMatrix::zeros(2, 0), 0)];
        assert!(matches!(
            Signal::new(channels(), 10.0, 0.0, empty),
            Err(MIError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_times() {
        let signal = signal(2);
        let times = signal.times();
        assert_eq!(times.len(), 10);
        assert_relative_eq!(times[0], -0.5);
        assert_relative_eq!(times[9], 0.4);
        assert_eq!(signal.channel_index("LFP_L_1"), Some(1));
        assert_eq!(signal.channel_index("LFP_R_1"), None);
    }

    #[test]
    fn test_drop_epochs_remaps_windows() {
        let mut signal = signal(5);
        signal.bootstrap(2, 4, 42).unwrap();
        let before: Vec<Vec<i64>> = (0..2)
            .map(|w| {
                signal
                    .window_epochs(w)
                    .unwrap()
                    .iter()
                    .map(|e| e.event_id)
                    .filter(|&id| id != 101)
                    .collect()
            })
            .collect();

        signal.drop_epochs(&[1]).unwrap();
        assert_eq!(signal.n_epochs(), 4);
        for (w, expected) in before.iter().enumerate().filter(|(_, e)| !e.is_empty()) {
            let ids: Vec<i64> = signal
                .window_epochs(w)
                .unwrap()
                .iter()
                .map(|e| e.event_id)
                .collect();
            assert_eq!(&ids, expected);
        }

        assert!(matches!(
            signal.drop_epochs(&[0]),
            Err(MIError::ProcessingOrder(_))
        ));
    }

    #[test]
    fn test_drop_epochs_out_of_range() {
        let mut signal = signal(3);
        assert!(matches!(
            signal.drop_epochs(&[3]),
            Err(MIError::InvalidParameter(_))
        ));
        assert_eq!(signal.n_epochs(), 3);
        assert!(signal.processing().is_empty());
    }

    #[test]
    fn test_drop_bad_epochs() {
        let mut signal = signal(4);
        let bad = BadEpochs::from_ids(vec![101, 103, 999]);
        assert_eq!(signal.drop_bad_epochs(&bad).unwrap(), 2);
        let ids: Vec<i64> = signal.epochs().iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![100, 102]);
        assert_eq!(signal.windows(), &[vec![0, 1]]);
    }

    #[test]
    fn test_reject_by_amplitude() {
        let mut epochs: Vec<Epoch> = (0..3).map(|i| Epoch::new(DMatrix::zeros(2, 10), i)).collect();
        epochs[1].data[(1, 4)] = 5e-3;
        let mut signal = Signal::new(channels(), 10.0, 0.0, epochs).unwrap();
        assert_eq!(signal.reject_by_amplitude(1e-3).unwrap(), 1);
        assert_eq!(signal.n_epochs(), 2);
    }

    #[test]
    fn test_crop() {
        let signal = signal(2);
        let cropped = signal.crop(-0.2, 0.1).unwrap();
        assert_eq!(cropped.n_times(), 4);
        assert_relative_eq!(cropped.tmin(), -0.2, epsilon = 1e-12);
        assert!(cropped.processing().contains("crop"));
        assert!(!signal.processing().contains("crop"));
        assert!(matches!(
            signal.crop(2.0, 3.0),
            Err(MIError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_pick() {
        let signal = signal(2);
        let picked = signal.pick(&ChannelSelector::parse("type_dbs").unwrap()).unwrap();
        assert_eq!(picked.channel_names(), vec!["LFP_L_1"]);
        assert_eq!(picked.epochs()[1].data.shape(), (1, 10));
        assert!(picked.processing().contains("pick"));
        assert!(matches!(
            signal.pick(&ChannelSelector::parse("type_emg").unwrap()),
            Err(MIError::NoChannelsMatch(_))
        ));
    }

    #[test]
    fn test_apply_baseline() {
        let epochs = vec![Epoch::new(
            DMatrix::from_fn(2, 10, |c, t| (c + t) as f64),
            0,
        )];
        let mut signal = Signal::new(channels(), 10.0, -0.5, epochs).unwrap();
        signal.apply_baseline((-0.5, -0.4)).unwrap();
        // baseline means are 0.5 and 1.5
        assert_relative_eq!(signal.epochs()[0].data[(0, 0)], -0.5);
        assert_relative_eq!(signal.epochs()[0].data[(1, 9)], 8.5);
        assert!(matches!(
            signal.apply_baseline((-0.5, -0.4)),
            Err(MIError::ProcessingOrder(_))
        ));
        assert!(matches!(
            signal.clone().apply_baseline((2.0, 3.0)),
            Err(MIError::MissingDependency(_))
        ));
    }

    #[test]
    fn test_bootstrap_is_seeded() {
        let mut a = signal(10);
        let mut b = signal(10);
        a.bootstrap(3, 10, 7).unwrap();
        b.bootstrap(3, 10, 7).unwrap();
        assert_eq!(a.windows(), b.windows());
        assert_eq!(a.windows().len(), 3);
        assert!(a.windows().iter().all(|w| w.len() == 10));
    }

    #[test]
    fn test_save_load() {
        let mut signal = signal(3);
        signal.set_metadata("subject", "EL012");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal.json");
        signal.save_to(&path).unwrap();
        let loaded = Signal::load_from(&path).unwrap();
        assert_eq!(loaded, signal);
    }

    #[test]
    fn test_load_rejects_corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal.json");
        let stored = serde_json::to_value(signal(3)).unwrap();

        let mut bad_window = stored.clone();
        bad_window["windows"] = serde_json::json!([[0, 1, 9]]);
        std::fs::write(&path, bad_window.to_string()).unwrap();
        match Signal::load_from(&path) {
            Err(MIError::IOError(msg)) => assert!(msg.contains("epoch 9"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }

        let mut duplicate = stored;
        duplicate["channels"][1]["name"] = serde_json::json!("ECOG_L_1");
        std::fs::write(&path, duplicate.to_string()).unwrap();
        match Signal::load_from(&path) {
            Err(MIError::IOError(msg)) => assert!(msg.contains("more than once"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }
}
