//! Permutation tests on the mean.
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;

use super::stat_test::TestResult;
use crate::error::MIError;
use crate::PERMUTATION_RESAMPLES;

/// Relative tolerance when comparing resampled statistics to the observed one.
const RELATIVE_TOLERANCE: f64 = 100.0 * f64::EPSILON;

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Two-sided p-value from the null statistics. `extra` is one when the observed statistic is
/// counted among random resamples and zero for an exact enumeration.
fn two_sided_pvalue(observed: f64, null: &[f64], extra: usize) -> f64 {
    let tol = (RELATIVE_TOLERANCE * observed).abs();
    let greater = null.iter().filter(|&&s| s >= observed - tol).count();
    let less = null.iter().filter(|&&s| s <= observed + tol).count();
    let total = (null.len() + extra) as f64;
    let p_greater = (greater + extra) as f64 / total;
    let p_less = (less + extra) as f64 / total;
    (2.0 * p_greater.min(p_less)).min(1.0)
}

/// The number of ways to choose `k` of `n` items, or `None` when it exceeds `limit`.
fn binomial_within(n: usize, k: usize, limit: usize) -> Option<usize> {
    let k = k.min(n - k);
    let mut value: u128 = 1;
    for i in 0..k {
        value = value * (n - i) as u128 / (i + 1) as u128;
        if value > limit as u128 {
            return None;
        }
    }
    Some(value as usize)
}

/// Two-sided sign-flip test on the mean of the paired differences `x - y`.
///
/// All sign patterns are enumerated when there are at most [`PERMUTATION_RESAMPLES`] of them,
/// otherwise as many random patterns are drawn.
pub fn permutation_onesample<R: Rng>(
    x: &[f64],
    y: &[f64],
    rng: &mut R,
) -> Result<TestResult, MIError> {
    if x.len() != y.len() {
        return Err(MIError::IncompatibleData(format!(
            "paired samples of lengths {} and {}",
            x.len(),
            y.len()
        )));
    }
    if x.is_empty() {
        return Err(MIError::InvalidParameter("empty samples".to_string()));
    }
    let diffs: Vec<f64> = x.iter().zip(y).map(|(a, b)| a - b).collect();
    let n = diffs.len();
    let statistic = mean(&diffs);

    let flipped_mean = |signs: &dyn Fn(usize) -> bool| {
        diffs
            .iter()
            .enumerate()
            .map(|(i, d)| if signs(i) { -d } else { *d })
            .sum::<f64>()
            / n as f64
    };

    let exact = n < usize::BITS as usize && (1usize << n) <= PERMUTATION_RESAMPLES;
    let pvalue = match exact {
        true => {
            let null: Vec<f64> = (0..1usize << n)
                .map(|mask| flipped_mean(&|i: usize| (mask >> i) & 1 == 1))
                .collect();
            two_sided_pvalue(statistic, &null, 0)
        }
        false => {
            log::debug!("Drawing {} random sign flips", PERMUTATION_RESAMPLES);
            let null: Vec<f64> = (0..PERMUTATION_RESAMPLES)
                .map(|_| {
                    let signs: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.5)).collect();
                    flipped_mean(&|i: usize| signs[i])
                })
                .collect();
            two_sided_pvalue(statistic, &null, 1)
        }
    };
    Ok(TestResult { statistic, pvalue })
}

/// Two-sided relabelling test on the difference of means of independent samples.
///
/// All splits of the pooled sample are enumerated when there are at most
/// [`PERMUTATION_RESAMPLES`] of them, otherwise as many random splits are drawn.
pub fn permutation_twosample<R: Rng>(
    x: &[f64],
    y: &[f64],
    rng: &mut R,
) -> Result<TestResult, MIError> {
    if x.is_empty() || y.is_empty() {
        return Err(MIError::InvalidParameter(
            "both samples must be non-empty".to_string(),
        ));
    }
    let n_x = x.len();
    let pooled: Vec<f64> = x.iter().chain(y).copied().collect();
    let total: f64 = pooled.iter().sum();
    let n = pooled.len();
    let statistic = mean(x) - mean(y);

    let split_statistic = |sum_x: f64| sum_x / n_x as f64 - (total - sum_x) / (n - n_x) as f64;

    let pvalue = match binomial_within(n, n_x, PERMUTATION_RESAMPLES) {
        Some(_) => {
            let null: Vec<f64> = (0..n)
                .combinations(n_x)
                .map(|ids| split_statistic(ids.iter().map(|&i| pooled[i]).sum()))
                .collect();
            two_sided_pvalue(statistic, &null, 0)
        }
        None => {
            log::debug!("Drawing {} random relabellings", PERMUTATION_RESAMPLES);
            let mut shuffled = pooled.clone();
            let null: Vec<f64> = (0..PERMUTATION_RESAMPLES)
                .map(|_| {
                    shuffled.shuffle(rng);
                    split_statistic(shuffled[..n_x].iter().sum())
                })
                .collect();
            two_sided_pvalue(statistic, &null, 1)
        }
    };
    Ok(TestResult { statistic, pvalue })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_binomial_within() {
        assert_eq!(binomial_within(6, 3, 100), Some(20));
        assert_eq!(binomial_within(6, 0, 100), Some(1));
        assert_eq!(binomial_within(40, 20, 1_000_000), None);
    }

    #[test]
    fn test_onesample_exact() {
        let mut rng = StdRng::seed_from_u64(42);
        let x = [1.0, 2.0, 3.0, 4.0];
        let res = permutation_onesample(&x, &[0.0; 4], &mut rng).unwrap();
        assert_relative_eq!(res.statistic, 2.5);
        // only the identity reaches the observed mean
        assert_relative_eq!(res.pvalue, 2.0 / 16.0);
    }

    #[test]
    fn test_onesample_identical() {
        let mut rng = StdRng::seed_from_u64(42);
        let x = [0.1, 0.7, -0.3, 1.4, 2.2];
        let res = permutation_onesample(&x, &x, &mut rng).unwrap();
        assert_eq!(res.statistic, 0.0);
        assert_eq!(res.pvalue, 1.0);
    }

    #[test]
    fn test_twosample_exact() {
        let mut rng = StdRng::seed_from_u64(42);
        let res = permutation_twosample(&[4.0, 5.0, 6.0], &[1.0, 2.0, 3.0], &mut rng).unwrap();
        assert_relative_eq!(res.statistic, 3.0);
        assert_relative_eq!(res.pvalue, 2.0 / 20.0);
    }

    #[test]
    fn test_twosample_identical() {
        let mut rng = StdRng::seed_from_u64(42);
        let x = [0.5, 0.5, 0.5];
        let res = permutation_twosample(&x, &x, &mut rng).unwrap();
        assert_eq!(res.statistic, 0.0);
        assert_eq!(res.pvalue, 1.0);
    }

    #[test]
    fn test_errors() {
        let mut rng = StdRng::seed_from_u64(42);
        assert!(matches!(
            permutation_onesample(&[1.0, 2.0], &[1.0], &mut rng),
            Err(MIError::IncompatibleData(_))
        ));
        assert!(matches!(
            permutation_twosample(&[], &[1.0], &mut rng),
            Err(MIError::InvalidParameter(_))
        ));
    }
}
