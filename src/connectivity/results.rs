//! Granger causality results.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::MIError;
use crate::signal::{ChannelGroup, ProcessingLog};

/// The connectivity measures computed by the Granger causality analysis.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Measure {
    #[serde(rename = "gc")]
    Gc,
    #[serde(rename = "net_gc")]
    NetGc,
    #[serde(rename = "trgc")]
    Trgc,
    #[serde(rename = "net_trgc")]
    NetTrgc,
}

impl Measure {
    pub const ALL: [Measure; 4] = [Measure::Gc, Measure::NetGc, Measure::Trgc, Measure::NetTrgc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Measure::Gc => "gc",
            Measure::NetGc => "net_gc",
            Measure::Trgc => "trgc",
            Measure::NetTrgc => "net_trgc",
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A seed group and a target group analysed together.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub seeds: ChannelGroup,
    pub targets: ChannelGroup,
}

/// One row of the long-format connectivity table.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ConnectivityRow {
    pub window: usize,
    pub seeds: String,
    pub targets: String,
    pub freq: f64,
    pub time: f64,
    pub gc: f64,
    pub net_gc: f64,
    pub trgc: f64,
    pub net_trgc: f64,
}

/// Directed connectivity between seed and target groups.
///
/// Values are stored flat, indexed by window, connection, frequency and time point, in that
/// order. Results are immutable once created.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(try_from = "ResultsFile")]
pub struct GrangerResults {
    connections: Vec<Connection>,
    freqs: Vec<f64>,
    bands: Vec<(f64, f64)>,
    times: Vec<f64>,
    n_windows: usize,
    gc: Vec<f64>,
    net_gc: Vec<f64>,
    trgc: Vec<f64>,
    net_trgc: Vec<f64>,
    processing: ProcessingLog,
}

#[derive(Deserialize)]
struct ResultsFile {
    connections: Vec<Connection>,
    freqs: Vec<f64>,
    bands: Vec<(f64, f64)>,
    times: Vec<f64>,
    n_windows: usize,
    gc: Vec<f64>,
    net_gc: Vec<f64>,
    trgc: Vec<f64>,
    net_trgc: Vec<f64>,
    #[serde(default)]
    processing: ProcessingLog,
}

impl TryFrom<ResultsFile> for GrangerResults {
    type Error = MIError;

    fn try_from(file: ResultsFile) -> Result<Self, Self::Error> {
        GrangerResults::new(
            file.connections,
            file.freqs,
            file.bands,
            file.times,
            file.n_windows,
            file.gc,
            file.net_gc,
            file.trgc,
            file.net_trgc,
            file.processing,
        )
    }
}

impl GrangerResults {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        connections: Vec<Connection>,
        freqs: Vec<f64>,
        bands: Vec<(f64, f64)>,
        times: Vec<f64>,
        n_windows: usize,
        gc: Vec<f64>,
        net_gc: Vec<f64>,
        trgc: Vec<f64>,
        net_trgc: Vec<f64>,
        processing: ProcessingLog,
    ) -> Result<Self, MIError> {
        let size = n_windows * connections.len() * freqs.len() * times.len();
        if [&gc, &net_gc, &trgc, &net_trgc].iter().any(|v| v.len() != size) {
            return Err(MIError::IncompatibleData(format!(
                "connectivity arrays do not have the expected size {}",
                size
            )));
        }
        Ok(GrangerResults {
            connections,
            freqs,
            bands,
            times,
            n_windows,
            gc,
            net_gc,
            trgc,
            net_trgc,
            processing,
        })
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// The frequencies of the results, or the mean frequency of each band when frequencies are
    /// averaged.
    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn bands(&self) -> &[(f64, f64)] {
        &self.bands
    }

    /// The time points of the results. Spectra without time resolution have a single time point,
    /// the center of the analysis window.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn n_windows(&self) -> usize {
        self.n_windows
    }

    pub fn processing(&self) -> &ProcessingLog {
        &self.processing
    }

    /// All values of a measure.
    pub fn measure(&self, measure: Measure) -> &[f64] {
        match measure {
            Measure::Gc => &self.gc,
            Measure::NetGc => &self.net_gc,
            Measure::Trgc => &self.trgc,
            Measure::NetTrgc => &self.net_trgc,
        }
    }

    fn offset(&self, window: usize, con: usize) -> Result<usize, MIError> {
        if window >= self.n_windows || con >= self.connections.len() {
            return Err(MIError::InvalidParameter(format!(
                "no result for window {} and connection {}",
                window, con
            )));
        }
        Ok((window * self.connections.len() + con) * self.freqs.len() * self.times.len())
    }

    /// The value of a measure at one window, connection, frequency and time point.
    pub fn get(
        &self,
        measure: Measure,
        window: usize,
        con: usize,
        freq: usize,
        time: usize,
    ) -> Result<f64, MIError> {
        if freq >= self.freqs.len() || time >= self.times.len() {
            return Err(MIError::InvalidParameter(format!(
                "no result for frequency {} and time {}",
                freq, time
            )));
        }
        let offset = self.offset(window, con)?;
        Ok(self.measure(measure)[offset + freq * self.times.len() + time])
    }

    /// The values of a measure for one window and connection, indexed by frequency then time.
    pub fn spectrum(&self, measure: Measure, window: usize, con: usize) -> Result<&[f64], MIError> {
        let offset = self.offset(window, con)?;
        let len = self.freqs.len() * self.times.len();
        Ok(&self.measure(measure)[offset..offset + len])
    }

    /// The results in long format, one row per window, connection, frequency and time point.
    pub fn rows(&self) -> Vec<ConnectivityRow> {
        let mut rows = Vec::with_capacity(self.gc.len());
        let mut id = 0;
        for window in 0..self.n_windows {
            for con in self.connections.iter() {
                for &freq in self.freqs.iter() {
                    for &time in self.times.iter() {
                        rows.push(ConnectivityRow {
                            window,
                            seeds: con.seeds.label.clone(),
                            targets: con.targets.label.clone(),
                            freq,
                            time,
                            gc: self.gc[id],
                            net_gc: self.net_gc[id],
                            trgc: self.trgc[id],
                            net_trgc: self.net_trgc[id],
                        });
                        id += 1;
                    }
                }
            }
        }
        rows
    }

    /// Save the results with their processing log to a file (JSON).
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load results from a file (JSON).
    /// The function returns an error if the stored arrays do not match the stored dimensions.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<GrangerResults, MIError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let results = serde_json::from_reader(reader)?;
        Ok(results)
    }
}
