//! Synthetic recordings with known directed interactions.
use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::MIError;
use crate::signal::{ChannelInfo, ChannelType, Epoch, Signal};

/// Autoregressive coefficient of the driving channel.
const DRIVER_AR: f64 = 0.5;
/// Samples simulated and discarded before each epoch.
const BURN_IN: usize = 100;

/// Simulate a two-channel signal where channel "A" drives channel "B" with a fixed lag.
///
/// A is a first order autoregressive process with unit innovations. B is
/// `coupling * A[t - lag] + noise * e[t]` with white Gaussian `e`. Epochs start at time zero.
///
/// # Example
/// ```rust
/// use motor_intention::simulate::simulate_lagged_pair;
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// let mut rng = StdRng::seed_from_u64(42);
/// let signal = simulate_lagged_pair(50, 200, 200.0, 5, 0.8, 0.5, &mut rng).unwrap();
/// assert_eq!(signal.n_epochs(), 50);
/// assert_eq!(signal.channel_names(), vec!["A", "B"]);
/// ```
pub fn simulate_lagged_pair(
    n_epochs: usize,
    n_times: usize,
    sfreq: f64,
    lag: usize,
    coupling: f64,
    noise: f64,
    rng: &mut impl Rng,
) -> Result<Signal, MIError> {
    if n_times == 0 {
        return Err(MIError::InvalidParameter(
            "epochs must have at least one sample".to_string(),
        ));
    }
    if !(noise >= 0.0 && noise.is_finite()) {
        return Err(MIError::InvalidParameter(format!(
            "the noise level must be non-negative, got {}",
            noise
        )));
    }
    let innovation = Normal::new(0.0, 1.0)
        .map_err(|e| MIError::InvalidParameter(e.to_string()))?;
    let measurement = Normal::new(0.0, noise)
        .map_err(|e| MIError::InvalidParameter(format!("invalid noise level: {}", e)))?;

    let total = n_times + lag + BURN_IN;
    let epochs = (0..n_epochs)
        .map(|id| {
            let mut a = vec![0.0; total];
            for t in 1..total {
                a[t] = DRIVER_AR * a[t - 1] + innovation.sample(rng);
            }
            let start = lag + BURN_IN;
            let data = DMatrix::from_fn(2, n_times, |c, t| match c {
                0 => a[start + t],
                _ => coupling * a[start + t - lag] + measurement.sample(rng),
            });
            Epoch::new(data, id as i64)
        })
        .collect();

    let channels = vec![
        ChannelInfo::new("A", ChannelType::Ecog, "none"),
        ChannelInfo::new("B", ChannelType::Dbs, "none"),
    ];
    let mut signal = Signal::new(channels, sfreq, 0.0, epochs)?;
    signal.set_metadata("simulation", "lagged_pair");
    signal.set_metadata("lag", &lag.to_string());
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_lagged_copy_without_noise() {
        let mut rng = StdRng::seed_from_u64(42);
        let signal = simulate_lagged_pair(3, 50, 100.0, 4, 2.0, 0.0, &mut rng).unwrap();
        for epoch in signal.epochs() {
            for t in 4..50 {
                assert_eq!(epoch.data[(1, t)], 2.0 * epoch.data[(0, t - 4)]);
            }
        }
    }

    #[test]
    fn test_invalid_noise() {
        let mut rng = StdRng::seed_from_u64(42);
        assert!(matches!(
            simulate_lagged_pair(3, 50, 100.0, 4, 1.0, -1.0, &mut rng),
            Err(MIError::InvalidParameter(_))
        ));
        assert!(matches!(
            simulate_lagged_pair(3, 50, 100.0, 4, 1.0, f64::NAN, &mut rng),
            Err(MIError::InvalidParameter(_))
        ));
    }
}
