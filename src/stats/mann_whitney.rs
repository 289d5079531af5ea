//! Mann-Whitney U test on independent samples.
use statrs::distribution::{ContinuousCDF, Normal};

use super::rank_average;
use super::stat_test::TestResult;
use crate::error::MIError;

/// Size of the smaller sample up to which the exact null distribution is used.
const MAX_EXACT_SIZE: usize = 8;

/// Probabilities of every U value 0..=n1*n2 under the null hypothesis.
fn exact_distribution(n1: usize, n2: usize) -> Vec<f64> {
    // counts[j] holds the counts for i x-values and j y-values, filled row by row
    let mut counts: Vec<Vec<f64>> = vec![vec![1.0]; n2 + 1];
    for i in 1..=n1 {
        let mut next: Vec<Vec<f64>> = vec![vec![1.0]];
        for j in 1..=n2 {
            let mut row = vec![0.0; i * j + 1];
            // the largest value is an x, above all j y-values
            for (u, c) in counts[j].iter().enumerate() {
                row[u + j] += c;
            }
            // the largest value is a y
            for (u, c) in next[j - 1].iter().enumerate() {
                row[u] += c;
            }
            next.push(row);
        }
        counts = next;
    }
    let dist = &counts[n2];
    let total: f64 = dist.iter().sum();
    dist.iter().map(|c| c / total).collect()
}

/// Two-sided rank-sum test. The statistic is the U statistic of `x`.
///
/// The p-value is exact when one of the samples has at most 8 values and there are no ties,
/// otherwise it comes from the normal approximation with tie and continuity correction.
pub fn mann_whitney_u(x: &[f64], y: &[f64]) -> Result<TestResult, MIError> {
    if x.is_empty() || y.is_empty() {
        return Err(MIError::InvalidParameter(
            "both samples must be non-empty".to_string(),
        ));
    }
    let (n1, n2) = (x.len(), y.len());
    let pooled: Vec<f64> = x.iter().chain(y).copied().collect();
    let (ranks, ties) = rank_average(&pooled);

    let r1: f64 = ranks[..n1].iter().sum();
    let u1 = r1 - (n1 * (n1 + 1)) as f64 / 2.0;
    let u2 = (n1 * n2) as f64 - u1;
    let u = u1.max(u2);

    let has_ties = ties.iter().any(|&t| t > 1);
    let pvalue = match (n1 <= MAX_EXACT_SIZE || n2 <= MAX_EXACT_SIZE) && !has_ties {
        true => {
            let probs = exact_distribution(n1, n2);
            2.0 * probs[u as usize..].iter().sum::<f64>()
        }
        false => {
            let n = (n1 + n2) as f64;
            let mean = (n1 * n2) as f64 / 2.0;
            let tie_term: f64 = ties.iter().map(|&t| (t * t * t - t) as f64).sum::<f64>();
            let var = (n1 * n2) as f64 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
            match var > 0.0 {
                true => {
                    let normal = Normal::new(0.0, 1.0)
                        .map_err(|e| MIError::NumericalError(e.to_string()))?;
                    2.0 * normal.sf((u - mean - 0.5) / var.sqrt())
                }
                false => 1.0,
            }
        }
    };
    Ok(TestResult {
        statistic: u1,
        pvalue: pvalue.min(1.0),
    })
}
