//! Error module for the motor intention library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq)]
pub enum MIError {
    /// A processing step was applied to data that has already been through it.
    ProcessingOrder(String),
    /// A channel selector did not match any channel.
    NoChannelsMatch(String),
    /// A channel selector matched the same channel several times, or seeds and targets overlap.
    AmbiguousSelector(String),
    /// Required metadata (bad epochs, baseline) is missing.
    MissingDependency(String),
    /// Numerical failure, e.g., a singular autoregressive fit.
    NumericalError(String),
    /// Error for invalid parameters.
    InvalidParameter(String),
    /// Inputs with incompatible shapes.
    IncompatibleData(String),
    /// Error for I/O operations, including (de)serialization.
    IOError(String),
}

impl fmt::Display for MIError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MIError::ProcessingOrder(e) => write!(f, "Processing order violation: {}", e),
            MIError::NoChannelsMatch(e) => write!(f, "No channels match selector: {}", e),
            MIError::AmbiguousSelector(e) => write!(f, "Ambiguous channel selector: {}", e),
            MIError::MissingDependency(e) => write!(f, "Missing dependency: {}", e),
            MIError::NumericalError(e) => write!(f, "Numerical error: {}", e),
            MIError::InvalidParameter(e) => write!(f, "Invalid parameters: {}", e),
            MIError::IncompatibleData(e) => write!(f, "Incompatible data: {}", e),
            MIError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for MIError {}

impl From<std::io::Error> for MIError {
    fn from(e: std::io::Error) -> Self {
        MIError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for MIError {
    fn from(e: serde_json::Error) -> Self {
        MIError::IOError(e.to_string())
    }
}

impl From<csv::Error> for MIError {
    fn from(e: csv::Error) -> Self {
        MIError::IOError(e.to_string())
    }
}
