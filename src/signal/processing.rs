//! Ordered log of the processing steps applied to a piece of data.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MIError;

/// A named processing step with the parameters it was run with.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub name: String,
    pub params: Map<String, Value>,
}

/// The provenance log carried by signals and results.
///
/// Each step can be recorded at most once, so that a log always describes a single pass
/// through the pipeline.
///
/// # Examples
///
/// ```rust
/// use motor_intention::signal::processing::ProcessingLog;
/// use motor_intention::error::MIError;
/// use serde_json::{json, Map};
///
/// let mut log = ProcessingLog::new();
/// let mut params = Map::new();
/// params.insert("n_bootstraps".to_string(), json!(50));
/// log.record("bootstrap", params.clone()).unwrap();
///
/// assert!(matches!(log.record("bootstrap", params), Err(MIError::ProcessingOrder(_))));
/// assert_eq!(log.len(), 1);
/// ```
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingLog {
    steps: Vec<ProcessingStep>,
}

impl ProcessingLog {
    pub fn new() -> Self {
        ProcessingLog { steps: Vec::new() }
    }

    /// Append a step to the log.
    /// The function returns an error if a step with the same name has already been recorded.
    pub fn record(&mut self, name: &str, params: Map<String, Value>) -> Result<(), MIError> {
        if self.contains(name) {
            return Err(MIError::ProcessingOrder(format!(
                "the step '{}' has already been applied; start again from unprocessed data",
                name
            )));
        }
        self.steps.push(ProcessingStep {
            name: name.to_string(),
            params,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.iter().any(|step| step.name == name)
    }

    /// The parameters of a recorded step, if any.
    pub fn get(&self, name: &str) -> Option<&Map<String, Value>> {
        self.steps
            .iter()
            .find(|step| step.name == name)
            .map(|step| &step.params)
    }

    pub fn steps(&self) -> &[ProcessingStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        map
    }

    #[test]
    fn test_record_keeps_order() {
        let mut log = ProcessingLog::new();
        log.record("crop", params("tmin", json!(-1.0))).unwrap();
        log.record("bootstrap", params("n", json!(10))).unwrap();

        let names: Vec<&str> = log.steps().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["crop", "bootstrap"]);
        assert_eq!(log.get("crop").unwrap()["tmin"], json!(-1.0));
        assert!(log.get("resample").is_none());
    }

    #[test]
    fn test_record_twice_fails_without_mutation() {
        let mut log = ProcessingLog::new();
        log.record("crop", params("tmin", json!(-1.0))).unwrap();
        let before = log.clone();

        let res = log.record("crop", params("tmin", json!(0.0)));
        assert!(matches!(res, Err(MIError::ProcessingOrder(_))));
        assert_eq!(log, before);
    }
}
