//! Wilcoxon signed-rank test on paired samples.
use statrs::distribution::{ContinuousCDF, Normal};

use super::rank_average;
use super::stat_test::TestResult;
use crate::error::MIError;

/// Largest sample for which the exact null distribution is used.
const MAX_EXACT_SIZE: usize = 50;

/// Probabilities of every signed-rank sum 0..=n(n+1)/2 for n untied ranks.
fn exact_distribution(n: usize) -> Vec<f64> {
    let max = n * (n + 1) / 2;
    let mut probs = vec![0.0; max + 1];
    probs[0] = 1.0;
    for rank in 1..=n {
        for w in (rank..=rank * (rank + 1) / 2).rev() {
            probs[w] += probs[w - rank];
        }
    }
    let total = 2f64.powi(n as i32);
    probs.iter().map(|c| c / total).collect()
}

/// Two-sided signed-rank test on the differences `x - y`.
///
/// Zero differences are discarded. The statistic is the smaller of the positive and negative
/// rank sums. Without ties and with at most 50 nonzero differences the p-value is exact,
/// otherwise it comes from the normal approximation with tie correction and without continuity
/// correction.
pub fn wilcoxon(x: &[f64], y: &[f64]) -> Result<TestResult, MIError> {
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
    let diffs: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(a, b)| a - b)
        .filter(|d| *d != 0.0)
        .collect();
    if diffs.is_empty() {
        return Ok(TestResult {
            statistic: 0.0,
            pvalue: 1.0,
        });
    }

    let n = diffs.len();
    let abs: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
    let (ranks, ties) = rank_average(&abs);
    let w_plus: f64 = ranks.iter().zip(&diffs).filter(|(_, d)| **d > 0.0).map(|(r, _)| r).sum();
    let w_minus = (n * (n + 1)) as f64 / 2.0 - w_plus;
    let statistic = w_plus.min(w_minus);

    let has_ties = ties.iter().any(|&t| t > 1);
    let pvalue = match n <= MAX_EXACT_SIZE && !has_ties {
        true => {
            let probs = exact_distribution(n);
            // without ties the rank sums are integers
            let cdf: f64 = probs[..=statistic as usize].iter().sum();
            2.0 * cdf
        }
        false => {
            let nf = n as f64;
            let mean = nf * (nf + 1.0) / 4.0;
            let tie_term: f64 = ties.iter().map(|&t| (t * t * t - t) as f64).sum::<f64>() / 48.0;
            let var = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_term;
            match var > 0.0 {
                true => {
                    let normal = Normal::new(0.0, 1.0)
                        .map_err(|e| MIError::NumericalError(e.to_string()))?;
                    2.0 * normal.cdf((statistic - mean) / var.sqrt())
                }
                false => 1.0,
            }
        }
    };
    Ok(TestResult {
        statistic,
        pvalue: pvalue.min(1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_distribution() {
        let probs = exact_distribution(3);
        // sums of subsets of {1, 2, 3}: 0, 1, 2, 3, 3, 4, 5, 6
        assert_relative_eq!(probs[3], 0.25);
        assert_relative_eq!(probs[6], 0.125);
        assert_relative_eq!(probs.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_exact() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [0.0; 6];
        let res = wilcoxon(&x, &y).unwrap();
        assert_eq!(res.statistic, 0.0);
        assert_relative_eq!(res.pvalue, 2.0 / 64.0);

        let x = [1.0, -2.0, 3.0, 4.0, 5.0, 6.0];
        let res = wilcoxon(&x, &y).unwrap();
        assert_eq!(res.statistic, 2.0);
        // W <= 2 for subsets {}, {1}, {2}
        assert_relative_eq!(res.pvalue, 2.0 * 3.0 / 64.0);
    }

    #[test]
    fn test_zero_differences_dropped() {
        let res = wilcoxon(&[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(res.statistic, 0.0);
        assert_relative_eq!(res.pvalue, 0.5);
    }

    #[test]
    fn test_identical_samples() {
        let x = [0.3, 1.2, -0.7];
        assert_eq!(
            wilcoxon(&x, &x).unwrap(),
            TestResult {
                statistic: 0.0,
                pvalue: 1.0
            }
        );
    }

    #[test]
    fn test_normal_approximation_with_ties() {
        let x = [1.0, 1.0, -1.0, 2.0, 2.0, 3.0];
        let y = [0.0; 6];
        let res = wilcoxon(&x, &y).unwrap();
        // ranks of |d|: 2, 2, 2, 4.5, 4.5, 6 and W- = 2
        assert_eq!(res.statistic, 2.0);
        let var = 6.0 * 7.0 * 13.0 / 24.0 - (24.0 + 6.0) / 48.0;
        let z = (2.0 - 10.5) / f64::sqrt(var);
        let normal = Normal::new(0.0, 1.0).unwrap();
        assert_relative_eq!(res.pvalue, 2.0 * normal.cdf(z), epsilon = 1e-12);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            wilcoxon(&[1.0], &[1.0, 2.0]),
            Err(MIError::IncompatibleData(_))
        ));
    }
}
