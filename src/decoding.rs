//! Earliest decoding time of movement intention from timelocked classifier predictions.
//!
//! Prediction traces are screened against the bad epoch table of their recording, baseline
//! corrected, and passed to a cluster-based permutation estimator that reports the earliest
//! time at which the traces differ from a no-effect threshold.
pub mod cluster;
pub mod earliest;
pub mod predictions;
pub mod tables;

pub use cluster::{Cluster, ClusterCorrection, Tail};
pub use earliest::{
    clip_to_reference, estimate_earliest_timepoint, DecodingTimeSettings, EarliestTimepoint,
};
pub use predictions::{BaselineMode, PredictionSet, Screening};
pub use tables::{balanced_accuracy, read_rows, write_rows, AccuracyRow, EarliestTimeRow};
