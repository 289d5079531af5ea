//! Recording identifiers and per-recording bad epoch tables.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::error::MIError;

/// The suffix of a bad epoch table, appended to the recording basename.
pub const BAD_EPOCHS_SUFFIX: &str = "_badepochs.csv";

/// Dopaminergic medication state.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum Medication {
    #[serde(rename = "OFF")]
    Off,
    #[serde(rename = "ON")]
    On,
}

/// Deep brain stimulation state.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum Stimulation {
    #[serde(rename = "OFF")]
    Off,
    #[serde(rename = "ON")]
    On,
}

impl fmt::Display for Medication {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Medication::Off => write!(f, "OFF"),
            Medication::On => write!(f, "ON"),
        }
    }
}

impl fmt::Display for Stimulation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stimulation::Off => write!(f, "OFF"),
            Stimulation::On => write!(f, "ON"),
        }
    }
}

/// Subject and condition of a recording, as encoded in its BIDS basename.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct RecordingId {
    pub subject: String,
    pub medication: Medication,
    pub stimulation: Stimulation,
}

impl RecordingId {
    /// Parse a BIDS basename.
    /// The subject is the `sub-` entity, the medication state is read from the `ses-` entity and
    /// the stimulation state from the `acq-` entity.
    ///
    /// # Example
    /// ```rust
    /// use motor_intention::recording::{Medication, RecordingId, Stimulation};
    ///
    /// let id = RecordingId::from_basename(
    ///     "sub-EL008_ses-EcogLfpMedOn01_task-SelfpacedRotationL_acq-StimOff_run-1_ieeg",
    /// ).unwrap();
    /// assert_eq!(id.subject, "EL008");
    /// assert_eq!(id.medication, Medication::On);
    /// assert_eq!(id.stimulation, Stimulation::Off);
    /// ```
    pub fn from_basename(basename: &str) -> Result<Self, MIError> {
        let entity = |key: &str| -> Option<&str> {
            basename
                .split('_')
                .find_map(|part| part.strip_prefix(key))
        };

        let subject = entity("sub-")
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| {
                MIError::InvalidParameter(format!("no subject in basename '{}'", basename))
            })?;

        let session = entity("ses-").unwrap_or("");
        let medication = if session.contains("MedOff") {
            Medication::Off
        } else if session.contains("MedOn") {
            Medication::On
        } else {
            return Err(MIError::InvalidParameter(format!(
                "no medication state in basename '{}'",
                basename
            )));
        };

        let acquisition = entity("acq-").unwrap_or("");
        let stimulation = if acquisition.contains("StimOff") {
            Stimulation::Off
        } else if acquisition.contains("StimOn") {
            Stimulation::On
        } else {
            return Err(MIError::InvalidParameter(format!(
                "no stimulation state in basename '{}'",
                basename
            )));
        };

        Ok(RecordingId {
            subject: subject.to_string(),
            medication,
            stimulation,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BadEpochRecord {
    event_id: i64,
}

/// The events of a recording marked as bad during manual screening.
///
/// There is no default value: a screening is either loaded from its table or stated
/// explicitly with [`BadEpochs::none`] or [`BadEpochs::from_ids`].
#[derive(Debug, PartialEq, Clone)]
pub struct BadEpochs {
    event_ids: BTreeSet<i64>,
}

impl BadEpochs {
    /// A screening that found no bad epoch.
    pub fn none() -> Self {
        BadEpochs {
            event_ids: BTreeSet::new(),
        }
    }

    pub fn from_ids<I: IntoIterator<Item = i64>>(event_ids: I) -> Self {
        BadEpochs {
            event_ids: event_ids.into_iter().collect(),
        }
    }

    /// Load the bad epoch table `<basename>_badepochs.csv` from a directory.
    /// The function returns an error if the table does not exist: screening information is
    /// required wherever it is consumed.
    pub fn load<P: AsRef<Path>>(dir: P, basename: &str) -> Result<Self, MIError> {
        let path = dir
            .as_ref()
            .join(format!("{}{}", basename, BAD_EPOCHS_SUFFIX));
        if !path.is_file() {
            return Err(MIError::MissingDependency(format!(
                "no bad epoch table found at {}",
                path.display()
            )));
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut event_ids = BTreeSet::new();
        for record in reader.deserialize() {
            let record: BadEpochRecord = record?;
            event_ids.insert(record.event_id);
        }
        log::debug!("Loaded {} bad epochs from {}", event_ids.len(), path.display());
        Ok(BadEpochs { event_ids })
    }

    pub fn contains(&self, event_id: i64) -> bool {
        self.event_ids.contains(&event_id)
    }

    pub fn event_ids(&self) -> Vec<i64> {
        self.event_ids.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.event_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_explicit_screenings() {
        assert!(BadEpochs::none().is_empty());
        assert_eq!(BadEpochs::none(), BadEpochs::from_ids(Vec::new()));
        let bad = BadEpochs::from_ids([4, 2, 4]);
        assert_eq!(bad.event_ids(), vec![2, 4]);
        assert!(bad.contains(2) && !bad.contains(3));
    }

    #[test]
    fn test_from_basename() {
        let id = RecordingId::from_basename(
            "sub-EL012_ses-EcogLfpMedOff02_task-SelfpacedRotationR_acq-StimOnR_run-1_ieeg",
        )
        .unwrap();
        assert_eq!(id.subject, "EL012");
        assert_eq!(id.medication, Medication::Off);
        assert_eq!(id.stimulation, Stimulation::On);
    }

    #[test]
    fn test_from_basename_errors() {
        assert!(matches!(
            RecordingId::from_basename("ses-EcogLfpMedOff01_acq-StimOff"),
            Err(MIError::InvalidParameter(_))
        ));
        assert!(matches!(
            RecordingId::from_basename("sub-EL001_ses-EcogLfp01_acq-StimOff"),
            Err(MIError::InvalidParameter(_))
        ));
        assert!(matches!(
            RecordingId::from_basename("sub-EL001_ses-EcogLfpMedOn01_run-1"),
            Err(MIError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_load_bad_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let basename = "sub-EL001_ses-MedOff_acq-StimOff_run-1";
        fs::write(
            dir.path().join(format!("{}{}", basename, BAD_EPOCHS_SUFFIX)),
            "event_id,reason\n3,artifact\n17,no movement\n3,artifact\n",
        )
        .unwrap();

        let bad = BadEpochs::load(dir.path(), basename).unwrap();
        assert_eq!(bad.event_ids(), vec![3, 17]);
        assert!(bad.contains(17));
        assert!(!bad.contains(4));
    }

    #[test]
    fn test_load_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BadEpochs::load(dir.path(), "sub-EL001"),
            Err(MIError::MissingDependency(_))
        ));
    }
}
