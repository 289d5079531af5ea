//! This crate provides the analysis core of an intracranial study of movement intention in
//! Parkinson's disease: spectral Granger causality between cortical (ECoG) and subthalamic (DBS)
//! recordings, earliest decoding times of movement intention, and the statistical tests used to
//! compare conditions.
//!
//! # Granger Causality
//!
//! ```rust
//! use motor_intention::connectivity::{ConnectivityGranger, GrangerSettings, Measure, PowerMethod};
//! use motor_intention::signal::ChannelSelector;
//! use motor_intention::simulate::simulate_lagged_pair;
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! // Simulate 20 epochs where channel A drives channel B with a lag of 5 samples
//! let mut rng = StdRng::seed_from_u64(42);
//! let signal = simulate_lagged_pair(20, 200, 200.0, 5, 0.8, 0.5, &mut rng).unwrap();
//!
//! // Estimate the Granger causality from A to B
//! let settings = GrangerSettings::new(
//!     PowerMethod::Multitaper,
//!     ChannelSelector::parse("A").unwrap(),
//!     ChannelSelector::parse("B").unwrap(),
//! );
//! let results = ConnectivityGranger::new(&signal, settings).unwrap().process().unwrap();
//!
//! let gc = results.spectrum(Measure::Gc, 0, 0).unwrap();
//! let net = results.spectrum(Measure::NetGc, 0, 0).unwrap();
//! assert!(gc.iter().sum::<f64>() > 0.0);
//! assert!(net.iter().sum::<f64>() > 0.0);
//! ```
//!
//! # Earliest Decoding Times
//!
//! ```rust
//! use motor_intention::decoding::{estimate_earliest_timepoint, DecodingTimeSettings, PredictionSet};
//! use motor_intention::recording::BadEpochs;
//! use nalgebra::DMatrix;
//!
//! // Predictions of 30 trials jump above the threshold at the 10th sample
//! let times: Vec<f64> = (0..20).map(|i| -1.0 + 0.1 * i as f64).collect();
//! let data = DMatrix::from_fn(30, 20, |i, j| if j >= 10 { 1.0 + 0.01 * i as f64 } else { 0.0 });
//! let mut set = PredictionSet::new(times.clone(), data, (0..30).collect()).unwrap();
//!
//! // Screening is required before estimating decoding times
//! set.drop_bad_trials(&BadEpochs::none()).unwrap();
//!
//! let settings = DecodingTimeSettings { n_perm: 100, n_iterations: 5, ..Default::default() };
//! let estimate = estimate_earliest_timepoint(&set, &settings, times[19]).unwrap();
//! assert!((estimate.time - times[10]).abs() < 1e-9);
//! ```
//!
//! # Comparing Conditions
//!
//! ```rust
//! use motor_intention::stats::StatTest;
//!
//! let off = [-1.2, -0.8, -1.5, -0.4, -0.9, -1.1];
//! let on = [-0.6, -0.5, -0.9, -0.1, -0.7, -0.2];
//! let res = StatTest::permutation_onesample().run(&off, &on).unwrap();
//! assert!(res.statistic < 0.0);
//! ```

pub mod connectivity;
pub mod decoding;
pub mod error;
pub mod parallel;
pub mod readiness;
pub mod recording;
pub mod signal;
pub mod simulate;
pub mod stats;
pub mod tfr;

/// The relative tolerance below which singular values are considered zero when estimating ranks.
pub const RANK_TOLERANCE: f64 = 1e-10;
/// The number of random resamples of the permutation tests, and the largest number of
/// permutations enumerated exactly.
pub const PERMUTATION_RESAMPLES: usize = 1_000_000;
