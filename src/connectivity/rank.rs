//! Reduction of the seed and target groups to their numerical rank.
use nalgebra::DMatrix;

use super::settings::NComponents;
use super::spectral::CrossSpectrum;
use crate::error::MIError;
use crate::RANK_TOLERANCE;

/// Singular values (in decreasing order) and left singular vectors of a real matrix.
fn sorted_svd(matrix: &DMatrix<f64>) -> Result<(Vec<f64>, DMatrix<f64>), MIError> {
    let svd = matrix.clone().svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| MIError::NumericalError("singular value decomposition failed".to_string()))?;
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

    let values = order.iter().map(|&id| svd.singular_values[id]).collect();
    let vectors = DMatrix::from_fn(u.nrows(), order.len(), |i, j| u[(i, order[j])]);
    Ok((values, vectors))
}

/// The number of singular values above `RANK_TOLERANCE` times the largest one.
pub fn numerical_rank(matrix: &DMatrix<f64>) -> Result<usize, MIError> {
    let (values, _) = sorted_svd(matrix)?;
    let max = values.first().copied().unwrap_or(0.0);
    Ok(values.iter().filter(|&&s| s > RANK_TOLERANCE * max).count())
}

/// The projector of a group onto its `n_components` leading singular directions.
/// The projector is the identity when every dimension is kept.
fn group_projector(mean_csd: &DMatrix<f64>, n_components: usize) -> Result<DMatrix<f64>, MIError> {
    let dim = mean_csd.nrows();
    if n_components == dim {
        return Ok(DMatrix::identity(dim, dim));
    }
    let (_, vectors) = sorted_svd(mean_csd)?;
    Ok(vectors.columns(0, n_components).into_owned())
}

/// Projection of the seeds and targets of a cross-spectrum onto their leading components.
///
/// The signals of the cross-spectrum are the seeds followed by the targets.
#[derive(Debug, PartialEq, Clone)]
pub struct RankReduction {
    projector: DMatrix<f64>,
    n_seed_components: usize,
    n_target_components: usize,
}

impl RankReduction {
    /// Fit the projection of each group from the real part of its frequency-averaged
    /// cross-spectrum.
    /// The function returns an error if an explicit number of components exceeds the rank of its
    /// group.
    pub fn fit(
        csd: &CrossSpectrum,
        n_seeds: usize,
        n_targets: usize,
        policy: NComponents,
    ) -> Result<Self, MIError> {
        if n_seeds == 0 || n_targets == 0 || n_seeds + n_targets != csd.n_signals() {
            return Err(MIError::IncompatibleData(format!(
                "{} seeds and {} targets for a cross-spectrum of {} signals",
                n_seeds,
                n_targets,
                csd.n_signals()
            )));
        }
        let seeds: Vec<usize> = (0..n_seeds).collect();
        let targets: Vec<usize> = (n_seeds..n_seeds + n_targets).collect();
        let seed_csd = csd.real_mean(&seeds);
        let target_csd = csd.real_mean(&targets);
        let seed_rank = numerical_rank(&seed_csd)?;
        let target_rank = numerical_rank(&target_csd)?;

        let (n_seed_components, n_target_components) = match policy {
            NComponents::Rank => (seed_rank, target_rank),
            NComponents::Counts(n_s, n_t) => {
                for (group, n, rank) in [("seed", n_s, seed_rank), ("target", n_t, target_rank)] {
                    if n == 0 || n > rank {
                        return Err(MIError::InvalidParameter(format!(
                            "{} {} components requested, the rank of the group is {}",
                            n, group, rank
                        )));
                    }
                }
                (n_s, n_t)
            }
        };
        if n_seed_components == 0 || n_target_components == 0 {
            return Err(MIError::NumericalError(
                "a channel group has no signal (rank 0)".to_string(),
            ));
        }
        if n_seed_components < n_seeds || n_target_components < n_targets {
            log::debug!(
                "Reducing {} seeds to {} and {} targets to {} components",
                n_seeds,
                n_seed_components,
                n_targets,
                n_target_components
            );
        }

        let seed_proj = group_projector(&seed_csd, n_seed_components)?;
        let target_proj = group_projector(&target_csd, n_target_components)?;
        let mut projector =
            DMatrix::zeros(n_seeds + n_targets, n_seed_components + n_target_components);
        projector
            .view_mut((0, 0), (n_seeds, n_seed_components))
            .copy_from(&seed_proj);
        projector
            .view_mut((n_seeds, n_seed_components), (n_targets, n_target_components))
            .copy_from(&target_proj);

        Ok(RankReduction {
            projector,
            n_seed_components,
            n_target_components,
        })
    }

    pub fn n_seed_components(&self) -> usize {
        self.n_seed_components
    }

    pub fn n_target_components(&self) -> usize {
        self.n_target_components
    }

    pub fn projector(&self) -> &DMatrix<f64> {
        &self.projector
    }

    /// Project a cross-spectrum, Pᵀ C P.
    pub fn apply(&self, csd: &CrossSpectrum) -> Result<CrossSpectrum, MIError> {
        csd.project(&self.projector)
    }
}
