//! Named hypothesis tests used to compare conditions across subjects.
//!
//! # Example
//! ```rust
//! use motor_intention::stats::StatTest;
//!
//! let x = [0.2, -0.4, -1.1, -0.3, 0.5];
//! let res = StatTest::wilcoxon().run(&x, &x).unwrap();
//! assert_eq!(res.pvalue, 1.0);
//! ```
pub mod mann_whitney;
pub mod permutation;
pub mod wilcoxon;

pub use mann_whitney::mann_whitney_u;
pub use permutation::{permutation_onesample, permutation_twosample};
pub use stat_test::{StatTest, TestKind, TestResult};
pub use wilcoxon::wilcoxon;

/// Ranks starting at one, with tied values sharing their average rank, and the size of every
/// group of ties.
pub(crate) fn rank_average(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut ties = Vec::new();
    let mut start = 0;
    while start < order.len() {
        let mut stop = start + 1;
        while stop < order.len() && values[order[stop]] == values[order[start]] {
            stop += 1;
        }
        let rank = (start + stop + 1) as f64 / 2.0;
        for &id in &order[start..stop] {
            ranks[id] = rank;
        }
        ties.push(stop - start);
        start = stop;
    }
    (ranks, ties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_average() {
        let (ranks, ties) = rank_average(&[3.0, 1.0, 3.0, 2.0, 3.0]);
        assert_eq!(ranks, vec![4.0, 1.0, 4.0, 2.0, 4.0]);
        assert_eq!(ties, vec![1, 1, 3]);
    }
}
