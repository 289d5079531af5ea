//! Spectral Granger causality: cross-spectral estimation, rank reduction, autoregressive models
//! and connectivity measures.
pub mod autocov;
pub mod granger;
pub mod rank;
pub mod results;
pub mod settings;
pub mod spectral;

pub use granger::ConnectivityGranger;
pub use results::{Connection, ConnectivityRow, GrangerResults, Measure};
pub use settings::{Bands, GrangerSettings, NComponents, NCycles, PowerMethod};
