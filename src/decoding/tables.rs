//! Result tables in CSV format.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::MIError;
use crate::recording::{Medication, Stimulation};

/// One row of the earliest decoding time table.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EarliestTimeRow {
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Medication")]
    pub medication: Medication,
    #[serde(rename = "Stimulation")]
    pub stimulation: Stimulation,
    #[serde(rename = "Channels")]
    pub channels: String,
    /// Seconds relative to the reference event.
    #[serde(rename = "Earliest Timepoint")]
    pub earliest_timepoint: f64,
    pub trials_used: usize,
}

/// One row of the decoding accuracy table.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AccuracyRow {
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Medication")]
    pub medication: Medication,
    #[serde(rename = "Stimulation")]
    pub stimulation: Stimulation,
    #[serde(rename = "Channels")]
    pub channels: String,
    #[serde(rename = "Balanced Accuracy")]
    pub balanced_accuracy: f64,
}

/// Write rows to a CSV file with a header line.
pub fn write_rows<T: Serialize, P: AsRef<Path>>(path: P, rows: &[T]) -> Result<(), MIError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::debug!("Wrote {} rows to {}", rows.len(), path.as_ref().display());
    Ok(())
}

/// Read all rows of a CSV file with a header line.
pub fn read_rows<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>, MIError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<Result<Vec<T>, csv::Error>>()?;
    Ok(rows)
}

/// The mean recall over the classes present in `y_true`.
pub fn balanced_accuracy(y_true: &[i64], y_pred: &[i64]) -> Result<f64, MIError> {
    if y_true.len() != y_pred.len() {
        return Err(MIError::IncompatibleData(format!(
            "{} labels for {} predictions",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.is_empty() {
        return Err(MIError::InvalidParameter(
            "balanced accuracy of an empty sample".to_string(),
        ));
    }
    let classes: BTreeSet<i64> = y_true.iter().copied().collect();
    let recall_sum: f64 = classes
        .iter()
        .map(|&class| {
            let (hits, total) = y_true
                .iter()
                .zip(y_pred)
                .filter(|(&t, _)| t == class)
                .fold((0, 0), |(hits, total), (_, &p)| {
                    (hits + (p == class) as usize, total + 1)
                });
            hits as f64 / total as f64
        })
        .sum();
    Ok(recall_sum / classes.len() as f64)
}
