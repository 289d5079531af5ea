//! Settings of the Granger causality analysis.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::MIError;
use crate::signal::ChannelSelector;

/// Number of cycles in the analysis window of the lowest default frequency.
pub const MIN_CYCLES_PER_WINDOW: f64 = 5.0;

/// The method used to estimate the cross-spectral density.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum PowerMethod {
    #[serde(rename = "multitaper")]
    Multitaper,
    #[serde(rename = "fourier")]
    Fourier,
    #[serde(rename = "cwt_morlet")]
    CwtMorlet,
}

impl PowerMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerMethod::Multitaper => "multitaper",
            PowerMethod::Fourier => "fourier",
            PowerMethod::CwtMorlet => "cwt_morlet",
        }
    }
}

impl fmt::Display for PowerMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A frequency bound, either a single value or one value per band.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bands {
    Single(f64),
    Multiple(Vec<f64>),
}

impl Bands {
    fn len(&self) -> Option<usize> {
        match self {
            Bands::Single(_) => None,
            Bands::Multiple(values) => Some(values.len()),
        }
    }

    fn at(&self, id: usize) -> f64 {
        match self {
            Bands::Single(value) => *value,
            Bands::Multiple(values) => values[id],
        }
    }
}

/// The number of wavelet cycles, either shared or one per frequency.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NCycles {
    Single(f64),
    PerFrequency(Vec<f64>),
}

impl NCycles {
    /// The number of cycles for each of `n_freqs` frequencies.
    pub fn expand(&self, n_freqs: usize) -> Result<Vec<f64>, MIError> {
        let n_cycles = match self {
            NCycles::Single(value) => vec![*value; n_freqs],
            NCycles::PerFrequency(values) => {
                if values.len() != n_freqs {
                    return Err(MIError::InvalidParameter(format!(
                        "{} wavelet cycle counts given for {} frequencies",
                        values.len(),
                        n_freqs
                    )));
                }
                values.clone()
            }
        };
        if n_cycles.iter().any(|&n| !(n > 0.0)) {
            return Err(MIError::InvalidParameter(
                "the number of wavelet cycles must be positive".to_string(),
            ));
        }
        Ok(n_cycles)
    }
}

/// Dimensionality reduction policy of the seed and target groups.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "ComponentsRepr", into = "ComponentsRepr")]
pub enum NComponents {
    /// Keep as many components as the numerical rank of each group.
    Rank,
    /// Keep the given numbers of seed and target components.
    Counts(usize, usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ComponentsRepr {
    Policy(String),
    Counts(Vec<usize>),
}

impl TryFrom<ComponentsRepr> for NComponents {
    type Error = MIError;

    fn try_from(repr: ComponentsRepr) -> Result<Self, Self::Error> {
        match repr {
            ComponentsRepr::Policy(policy) if policy == "rank" => Ok(NComponents::Rank),
            ComponentsRepr::Policy(policy) => Err(MIError::InvalidParameter(format!(
                "unknown component policy '{}'",
                policy
            ))),
            ComponentsRepr::Counts(counts) => match counts.as_slice() {
                [n_seeds, n_targets] => Ok(NComponents::Counts(*n_seeds, *n_targets)),
                _ => Err(MIError::InvalidParameter(
                    "component counts must be given for the seeds and the targets".to_string(),
                )),
            },
        }
    }
}

impl From<NComponents> for ComponentsRepr {
    fn from(n_components: NComponents) -> Self {
        match n_components {
            NComponents::Rank => ComponentsRepr::Policy("rank".to_string()),
            NComponents::Counts(n_seeds, n_targets) => {
                ComponentsRepr::Counts(vec![n_seeds, n_targets])
            }
        }
    }
}

fn default_fskip() -> usize {
    0
}

fn default_true() -> bool {
    true
}

fn default_n_cycles() -> NCycles {
    NCycles::Single(7.0)
}

fn default_n_components() -> NComponents {
    NComponents::Rank
}

fn default_n_lags() -> usize {
    20
}

fn default_block_size() -> usize {
    1000
}

fn default_n_jobs() -> usize {
    1
}

/// Settings of a Granger causality analysis.
///
/// Unset frequency bounds default to the lowest frequency with five cycles in the analysis window
/// and to the Nyquist frequency of the frequency grid.
///
/// # Example
/// ```rust
/// use motor_intention::connectivity::{GrangerSettings, PowerMethod};
///
/// let settings: GrangerSettings = serde_json::from_str(r#"{
///     "power_method": "multitaper",
///     "seeds": "type_ecog",
///     "targets": ["LFP_R_1", "LFP_R_2"],
///     "fmin": [8.0, 13.0],
///     "fmax": [12.0, 30.0],
///     "n_lags": 20
/// }"#).unwrap();
/// assert_eq!(settings.power_method, PowerMethod::Multitaper);
/// assert!(settings.validate().is_ok());
///
/// assert!(serde_json::from_str::<GrangerSettings>(
///     r#"{"power_method": "welch", "seeds": "a", "targets": "b"}"#
/// ).is_err());
/// ```
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrangerSettings {
    pub power_method: PowerMethod,
    pub seeds: ChannelSelector,
    pub targets: ChannelSelector,
    #[serde(default)]
    pub fmin: Option<Bands>,
    #[serde(default)]
    pub fmax: Option<Bands>,
    #[serde(default = "default_fskip")]
    pub fskip: usize,
    #[serde(default)]
    pub faverage: bool,
    #[serde(default)]
    pub tmin: Option<f64>,
    #[serde(default)]
    pub tmax: Option<f64>,
    #[serde(default)]
    pub mt_bandwidth: Option<f64>,
    #[serde(default)]
    pub mt_adaptive: bool,
    #[serde(default = "default_true")]
    pub mt_low_bias: bool,
    #[serde(default)]
    pub cwt_freqs: Option<Vec<f64>>,
    #[serde(default = "default_n_cycles")]
    pub cwt_n_cycles: NCycles,
    #[serde(default = "default_n_components")]
    pub n_components: NComponents,
    #[serde(default = "default_n_lags")]
    pub n_lags: usize,
    #[serde(default)]
    pub average_windows: bool,
    #[serde(default)]
    pub average_timepoints: bool,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_n_jobs")]
    pub n_jobs: usize,
}

impl GrangerSettings {
    /// Settings with default values for everything but the method and the channel selectors.
    pub fn new(
        power_method: PowerMethod,
        seeds: ChannelSelector,
        targets: ChannelSelector,
    ) -> Self {
        GrangerSettings {
            power_method,
            seeds,
            targets,
            fmin: None,
            fmax: None,
            fskip: default_fskip(),
            faverage: false,
            tmin: None,
            tmax: None,
            mt_bandwidth: None,
            mt_adaptive: false,
            mt_low_bias: true,
            cwt_freqs: None,
            cwt_n_cycles: default_n_cycles(),
            n_components: default_n_components(),
            n_lags: default_n_lags(),
            average_windows: false,
            average_timepoints: false,
            block_size: default_block_size(),
            n_jobs: default_n_jobs(),
        }
    }

    /// Check the settings that do not depend on the data.
    pub fn validate(&self) -> Result<(), MIError> {
        if self.n_lags == 0 {
            return Err(MIError::InvalidParameter(
                "the number of lags must be a positive integer".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(MIError::InvalidParameter(
                "the block size must be positive".to_string(),
            ));
        }
        if let (Some(tmin), Some(tmax)) = (self.tmin, self.tmax) {
            if tmax < tmin {
                return Err(MIError::InvalidParameter(format!(
                    "tmax ({}) must not be smaller than tmin ({})",
                    tmax, tmin
                )));
            }
        }
        if let Some(bandwidth) = self.mt_bandwidth {
            if !(bandwidth > 0.0) {
                return Err(MIError::InvalidParameter(
                    "the multitaper bandwidth must be positive".to_string(),
                ));
            }
        }
        if let NComponents::Counts(n_seeds, n_targets) = self.n_components {
            if n_seeds == 0 || n_targets == 0 {
                return Err(MIError::InvalidParameter(
                    "at least one component must be kept per group".to_string(),
                ));
            }
        }
        if self.power_method == PowerMethod::CwtMorlet {
            let freqs = self.cwt_freqs.as_ref().ok_or_else(|| {
                MIError::InvalidParameter(
                    "wavelet frequencies are required by the cwt_morlet method".to_string(),
                )
            })?;
            if freqs.is_empty() || freqs.iter().any(|&f| !(f > 0.0 && f.is_finite())) {
                return Err(MIError::InvalidParameter(
                    "wavelet frequencies must be positive".to_string(),
                ));
            }
            if freqs.windows(2).any(|pair| pair[1] <= pair[0]) {
                return Err(MIError::InvalidParameter(
                    "wavelet frequencies must be strictly increasing".to_string(),
                ));
            }
            self.cwt_n_cycles.expand(freqs.len())?;
        }
        self.bands(0.0)?;
        Ok(())
    }

    /// The frequency bands, pairing the lower and upper bounds element-wise.
    /// A single bound paired with a list is used for every band.
    pub fn bands(&self, default_fmin: f64) -> Result<Vec<(f64, f64)>, MIError> {
        let fmin = self.fmin.clone().unwrap_or(Bands::Single(default_fmin));
        let fmax = self.fmax.clone().unwrap_or(Bands::Single(f64::INFINITY));

        let n_bands = match (fmin.len(), fmax.len()) {
            (None, None) => 1,
            (Some(n), None) | (None, Some(n)) => n,
            (Some(n_min), Some(n_max)) if n_min == n_max => n_min,
            (Some(n_min), Some(n_max)) => {
                return Err(MIError::InvalidParameter(format!(
                    "{} lower and {} upper frequency bounds",
                    n_min, n_max
                )))
            }
        };
        if n_bands == 0 {
            return Err(MIError::InvalidParameter(
                "at least one frequency band is required".to_string(),
            ));
        }

        (0..n_bands)
            .map(|id| {
                let (low, high) = (fmin.at(id), fmax.at(id));
                if low.is_nan() || high.is_nan() || low < 0.0 || high < low {
                    return Err(MIError::InvalidParameter(format!(
                        "invalid frequency band [{}, {}]",
                        low, high
                    )));
                }
                Ok((low, high))
            })
            .collect()
    }

    /// Save the settings to a file (JSON).
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load settings from a file (JSON) and validate them.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<GrangerSettings, MIError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let settings: GrangerSettings = serde_json::from_reader(reader)?;
        settings.validate()?;
        Ok(settings)
    }
}
