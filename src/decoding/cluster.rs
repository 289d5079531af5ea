//! One-sample cluster-based permutation test along the time axis.
use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::MIError;

/// The statistic assigned to a cluster of supra-threshold samples.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum ClusterCorrection {
    /// Absolute sum of the sample statistics in the cluster.
    #[default]
    #[serde(rename = "cluster_mass", alias = "cluster_pvals")]
    Mass,
    /// Number of samples in the cluster.
    #[serde(rename = "cluster_extent")]
    Extent,
}

/// The alternative hypothesis.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum Tail {
    /// Predictions above the threshold.
    #[default]
    #[serde(rename = "greater")]
    Greater,
    #[serde(rename = "less")]
    Less,
    #[serde(rename = "two_sided")]
    TwoSided,
}

/// A run of contiguous samples whose statistic exceeds the critical value with a common sign.
#[derive(Debug, PartialEq, Clone)]
pub struct Cluster {
    /// First sample of the cluster.
    pub start: usize,
    /// One past the last sample of the cluster.
    pub stop: usize,
    pub statistic: f64,
    pub pvalue: f64,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }
}

/// One-sample t statistic of every column against `threshold`.
///
/// A column without spread has statistic zero when its mean equals the threshold, and an
/// infinite statistic with the sign of the difference otherwise.
pub fn t_statistics(data: &DMatrix<f64>, threshold: f64) -> Vec<f64> {
    let n = data.nrows() as f64;
    data.column_iter()
        .map(|col| {
            let mean = col.mean() - threshold;
            let var = col.iter().map(|v| (v - threshold - mean).powi(2)).sum::<f64>() / (n - 1.0);
            let se = (var / n).sqrt();
            match se > 0.0 {
                true => mean / se,
                false if mean == 0.0 => 0.0,
                false => mean.signum() * f64::INFINITY,
            }
        })
        .collect()
}

/// The critical value of the t statistic with `n_trials - 1` degrees of freedom.
pub fn critical_value(n_trials: usize, alpha: f64, tail: Tail) -> Result<f64, MIError> {
    if n_trials < 2 {
        return Err(MIError::InvalidParameter(format!(
            "at least 2 trials are needed for a t statistic, got {}",
            n_trials
        )));
    }
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(MIError::InvalidParameter(format!(
            "alpha must be in (0, 1), got {}",
            alpha
        )));
    }
    let dist = StudentsT::new(0.0, 1.0, (n_trials - 1) as f64)
        .map_err(|e| MIError::NumericalError(e.to_string()))?;
    let level = match tail {
        Tail::TwoSided => 1.0 - alpha / 2.0,
        _ => 1.0 - alpha,
    };
    Ok(dist.inverse_cdf(level))
}

fn exceeds(t: f64, critical: f64, tail: Tail) -> Option<bool> {
    match tail {
        Tail::Greater if t > critical => Some(true),
        Tail::Less if t < -critical => Some(false),
        Tail::TwoSided if t.abs() > critical => Some(t > 0.0),
        _ => None,
    }
}

/// The clusters of a sequence of sample statistics, with unset p-values.
pub fn find_clusters(
    tstats: &[f64],
    critical: f64,
    tail: Tail,
    correction: ClusterCorrection,
) -> Vec<Cluster> {
    let mut clusters = Vec::new();
    let mut current: Option<(usize, bool)> = None;

    let mut close = |start: usize, stop: usize| {
        let statistic = match correction {
            ClusterCorrection::Mass => tstats[start..stop].iter().sum::<f64>().abs(),
            ClusterCorrection::Extent => (stop - start) as f64,
        };
        clusters.push(Cluster {
            start,
            stop,
            statistic,
            pvalue: f64::NAN,
        });
    };

    for (i, &t) in tstats.iter().enumerate() {
        let sign = exceeds(t, critical, tail);
        match (current, sign) {
            (Some((_, s)), Some(sign)) if s == sign => {}
            (Some((start, _)), _) => {
                close(start, i);
                current = sign.map(|s| (i, s));
            }
            (None, _) => current = sign.map(|s| (i, s)),
        }
    }
    if let Some((start, _)) = current {
        close(start, tstats.len());
    }
    clusters
}

fn max_statistic(clusters: &[Cluster]) -> f64 {
    clusters.iter().map(|c| c.statistic).fold(0.0, f64::max)
}

/// Test every time sample of a trial by time matrix against `threshold` and return the
/// clusters with their permutation p-values, in time order.
///
/// The null distribution is the maximum cluster statistic over `n_perm` random sign flips of
/// the trials around the threshold. The p-value of a cluster is
/// `(1 + #{null >= statistic}) / (n_perm + 1)`.
pub fn cluster_permutation_test<R: Rng>(
    data: &DMatrix<f64>,
    threshold: f64,
    n_perm: usize,
    alpha: f64,
    correction: ClusterCorrection,
    tail: Tail,
    rng: &mut R,
) -> Result<Vec<Cluster>, MIError> {
    if n_perm == 0 {
        return Err(MIError::InvalidParameter(
            "the number of permutations must be positive".to_string(),
        ));
    }
    let critical = critical_value(data.nrows(), alpha, tail)?;
    let mut clusters = find_clusters(&t_statistics(data, threshold), critical, tail, correction);
    if clusters.is_empty() {
        return Ok(clusters);
    }

    let centered = data.map(|v| v - threshold);
    let null: Vec<f64> = (0..n_perm)
        .map(|_| {
            let mut flipped = centered.clone();
            for mut row in flipped.row_iter_mut() {
                if rng.gen_bool(0.5) {
                    row.neg_mut();
                }
            }
            max_statistic(&find_clusters(
                &t_statistics(&flipped, 0.0),
                critical,
                tail,
                correction,
            ))
        })
        .collect();

    for cluster in clusters.iter_mut() {
        let count = null.iter().filter(|&&s| s >= cluster.statistic).count();
        cluster.pvalue = (1 + count) as f64 / (n_perm + 1) as f64;
    }
    log::debug!(
        "Found {} clusters, smallest p-value {}",
        clusters.len(),
        clusters.iter().map(|c| c.pvalue).fold(1.0, f64::min)
    );
    Ok(clusters)
}

/// The first sample of the earliest cluster with p-value below `alpha` and at least
/// `min_cluster_size` samples.
pub fn first_significant_sample(
    clusters: &[Cluster],
    alpha: f64,
    min_cluster_size: usize,
) -> Option<usize> {
    clusters
        .iter()
        .filter(|c| c.pvalue < alpha && c.len() >= min_cluster_size)
        .map(|c| c.start)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_t_statistics() {
        let data = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.0, 2.0, 2.0, 0.0, 3.0, 2.0, 0.0]);
        let t = t_statistics(&data, 0.0);
        // mean 2, sd 1, n 3
        assert_relative_eq!(t[0], 2.0 * 3f64.sqrt());
        assert_eq!(t[1], f64::INFINITY);
        assert_eq!(t[2], 0.0);

        let t = t_statistics(&data, 2.0);
        assert_relative_eq!(t[0], 0.0);
        assert_eq!(t[2], f64::NEG_INFINITY);
    }

    #[test]
    fn test_critical_value() {
        assert_relative_eq!(
            critical_value(11, 0.05, Tail::Greater).unwrap(),
            1.8125,
            epsilon = 1e-3
        );
        assert_relative_eq!(
            critical_value(11, 0.05, Tail::TwoSided).unwrap(),
            2.2281,
            epsilon = 1e-3
        );
        assert!(matches!(
            critical_value(1, 0.05, Tail::Greater),
            Err(MIError::InvalidParameter(_))
        ));
        assert!(matches!(
            critical_value(10, 1.5, Tail::Greater),
            Err(MIError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_find_clusters() {
        let t = [0.0, 3.0, 4.0, -3.0, -5.0, 0.5, 2.5];
        let clusters = find_clusters(&t, 2.0, Tail::Greater, ClusterCorrection::Mass);
        assert_eq!(clusters.len(), 2);
        assert_eq!((clusters[0].start, clusters[0].stop), (1, 3));
        assert_relative_eq!(clusters[0].statistic, 7.0);
        assert_eq!((clusters[1].start, clusters[1].stop), (6, 7));

        let clusters = find_clusters(&t, 2.0, Tail::TwoSided, ClusterCorrection::Extent);
        assert_eq!(clusters.len(), 3);
        assert_eq!((clusters[1].start, clusters[1].stop), (3, 5));
        assert_eq!(clusters[1].statistic, 2.0);

        let clusters = find_clusters(&t, 2.0, Tail::Less, ClusterCorrection::Mass);
        assert_eq!(clusters.len(), 1);
        assert_relative_eq!(clusters[0].statistic, 8.0);
    }

    #[test]
    fn test_permutation_detects_effect() {
        let mut rng = StdRng::seed_from_u64(42);
        let data = DMatrix::from_fn(20, 30, |i, j| match j >= 10 {
            true => 1.0 + 0.1 * (i as f64 - 9.5),
            false => 0.1 * (i as f64 - 9.5) * if j % 2 == 0 { 1.0 } else { -1.0 },
        });
        let clusters = cluster_permutation_test(
            &data,
            0.0,
            200,
            0.05,
            ClusterCorrection::Mass,
            Tail::Greater,
            &mut rng,
        )
        .unwrap();
        assert_eq!(first_significant_sample(&clusters, 0.05, 2), Some(10));
        assert!(clusters.iter().all(|c| c.pvalue > 0.0 && c.pvalue <= 1.0));
    }

    #[test]
    fn test_min_cluster_size() {
        let clusters = vec![
            Cluster {
                start: 2,
                stop: 3,
                statistic: 10.0,
                pvalue: 0.01,
            },
            Cluster {
                start: 5,
                stop: 9,
                statistic: 10.0,
                pvalue: 0.01,
            },
        ];
        assert_eq!(first_significant_sample(&clusters, 0.05, 1), Some(2));
        assert_eq!(first_significant_sample(&clusters, 0.05, 2), Some(5));
        assert_eq!(first_significant_sample(&clusters, 0.001, 1), None);
    }

    #[test]
    fn test_correction_names() {
        let c: ClusterCorrection = serde_json::from_str("\"cluster_pvals\"").unwrap();
        assert_eq!(c, ClusterCorrection::Mass);
        assert_eq!(
            serde_json::to_string(&ClusterCorrection::Extent).unwrap(),
            "\"cluster_extent\""
        );
        assert!(serde_json::from_str::<Tail>("\"both\"").is_err());
    }
}
