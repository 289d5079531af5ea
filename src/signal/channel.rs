//! Channel metadata.
use serde::{Deserialize, Serialize};
use std::fmt;

/// The recording modality of a channel.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelType {
    /// Electrocorticography, i.e., cortical surface electrodes.
    Ecog,
    /// Deep brain (subthalamic) electrodes.
    Dbs,
    /// Electromyography.
    Emg,
    /// Anything else, kept by name.
    Other(String),
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::Ecog => "ecog",
            ChannelType::Dbs => "dbs",
            ChannelType::Emg => "emg",
            ChannelType::Other(name) => name.as_str(),
        }
    }
}

impl From<&str> for ChannelType {
    fn from(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "ecog" => ChannelType::Ecog,
            "dbs" => ChannelType::Dbs,
            "emg" => ChannelType::Emg,
            other => ChannelType::Other(other.to_string()),
        }
    }
}

impl From<String> for ChannelType {
    fn from(name: String) -> Self {
        ChannelType::from(name.as_str())
    }
}

impl From<ChannelType> for String {
    fn from(ch_type: ChannelType) -> Self {
        ch_type.as_str().to_string()
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Name, type and re-referencing scheme of a channel.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// The channel label, unique within a signal.
    pub name: String,
    /// The recording modality.
    pub ch_type: ChannelType,
    /// The re-referencing scheme, e.g., "bipolar" or "common_average".
    pub reference: String,
}

impl ChannelInfo {
    pub fn new(name: &str, ch_type: ChannelType, reference: &str) -> Self {
        ChannelInfo {
            name: name.to_string(),
            ch_type,
            reference: reference.to_string(),
        }
    }
}
