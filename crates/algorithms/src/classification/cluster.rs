//! Clustering engine and productivity threshold
//!
//! The engine standardizes the pixel matrix, runs affinity propagation and
//! reduces the clusters to a single threshold: the unweighted mean of each
//! cluster's mean-of-pixel-means. A small cluster therefore pulls the
//! threshold as hard as a large one.
//!
//! Cluster ids in the outcome are ranks: id 0 is the cluster with the
//! lowest mean.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fieldprod_core::{Algorithm, Error, Result};

use super::affinity::{affinity_propagation, AffinityParams};
use super::scaler::StandardScaler;

/// What a clustering run hands to classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOutcome {
    /// Cluster rank per pixel-matrix row, 0 = lowest cluster mean
    pub labels: Vec<usize>,
    pub threshold: f64,
    pub exemplar_count: usize,
    /// Pixel-matrix row of each cluster's exemplar
    pub exemplars: Vec<usize>,
    /// Mean-of-means per cluster id, ascending
    pub cluster_means: Vec<f64>,
    pub iterations: usize,
    /// `false` when the iteration cap ended the run (degraded result)
    pub converged: bool,
}

/// Anything that can cluster a V x N pixel matrix.
pub trait ClusterEngine {
    fn cluster(&self, pixel_matrix: &Array2<f64>) -> Result<ClusterOutcome>;

    /// Stable description of every parameter that changes the outcome.
    /// Used to key memoized results.
    fn fingerprint(&self) -> String;
}

impl<E: ClusterEngine + ?Sized> ClusterEngine for &E {
    fn cluster(&self, pixel_matrix: &Array2<f64>) -> Result<ClusterOutcome> {
        (**self).cluster(pixel_matrix)
    }

    fn fingerprint(&self) -> String {
        (**self).fingerprint()
    }
}

/// Mean of each row's mean, grouped by label, and their unweighted average.
///
/// Returns `(threshold, cluster_means)`; `cluster_means[c]` is NaN for a
/// label with no members, and such labels are left out of the average.
pub fn cluster_threshold(pixel_matrix: &Array2<f64>, labels: &[usize]) -> Result<(f64, Vec<f64>)> {
    if labels.len() != pixel_matrix.nrows() {
        return Err(Error::SizeMismatch {
            er: pixel_matrix.nrows(),
            ec: 1,
            ar: labels.len(),
            ac: 1,
        });
    }
    let clusters = labels.iter().max().map_or(0, |&m| m + 1);
    if clusters == 0 {
        return Err(Error::NoValidPixels);
    }

    let row_means = pixel_matrix
        .mean_axis(Axis(1))
        .ok_or(Error::NoValidPixels)?;

    let mut sums = vec![0.0; clusters];
    let mut counts = vec![0usize; clusters];
    for (&label, &mean) in labels.iter().zip(row_means.iter()) {
        sums[label] += mean;
        counts[label] += 1;
    }

    let cluster_means: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(&s, &c)| if c > 0 { s / c as f64 } else { f64::NAN })
        .collect();
    let populated: Vec<f64> = cluster_means.iter().copied().filter(|m| !m.is_nan()).collect();
    let threshold = populated.iter().sum::<f64>() / populated.len() as f64;

    Ok((threshold, cluster_means))
}

/// Rank of each cluster id when clusters are ordered by ascending mean.
/// Equal means keep their id order.
pub fn rank_by_mean(cluster_means: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..cluster_means.len()).collect();
    order.sort_by(|&a, &b| cluster_means[a].total_cmp(&cluster_means[b]));
    let mut rank = vec![0; order.len()];
    for (r, &id) in order.iter().enumerate() {
        rank[id] = r;
    }
    rank
}

/// Z-score + affinity propagation + unweighted threshold.
#[derive(Debug, Clone, Default)]
pub struct AffinityClusterer {
    pub params: AffinityParams,
}

impl AffinityClusterer {
    pub fn new(params: AffinityParams) -> Self {
        Self { params }
    }
}

impl ClusterEngine for AffinityClusterer {
    fn cluster(&self, pixel_matrix: &Array2<f64>) -> Result<ClusterOutcome> {
        if pixel_matrix.nrows() == 0 {
            return Err(Error::NoValidPixels);
        }
        let normalized = StandardScaler::fit_transform(pixel_matrix);
        let result = affinity_propagation(&normalized, &self.params)?;
        if !result.converged {
            warn!(
                "Clustering degraded: no convergence after {} iterations",
                result.iterations
            );
        }

        // Threshold is computed on the raw index values, not the z-scores
        let (threshold, means) = cluster_threshold(pixel_matrix, &result.labels)?;
        info!(
            "{} clusters over {} pixels, threshold {threshold:.4}",
            result.cluster_count(),
            pixel_matrix.nrows()
        );

        let rank = rank_by_mean(&means);
        let mut cluster_means = vec![0.0; rank.len()];
        let mut exemplars = vec![0; rank.len()];
        for (id, &r) in rank.iter().enumerate() {
            cluster_means[r] = means[id];
            exemplars[r] = result.exemplars.get(id).copied().unwrap_or_default();
        }

        Ok(ClusterOutcome {
            exemplar_count: result.cluster_count(),
            labels: result.labels.iter().map(|&l| rank[l]).collect(),
            threshold,
            exemplars,
            cluster_means,
            iterations: result.iterations,
            converged: result.converged,
        })
    }

    fn fingerprint(&self) -> String {
        let p = &self.params;
        format!(
            "affinity:d={:016x}:p={:016x}:it={}:conv={}:tol={:016x}",
            p.damping.to_bits(),
            p.preference.to_bits(),
            p.max_iterations,
            p.convergence_iter,
            p.tolerance.to_bits()
        )
    }
}

/// Clustering stage as an [`Algorithm`]
#[derive(Debug, Clone, Default)]
pub struct Cluster;

impl Algorithm for Cluster {
    type Input = Array2<f64>;
    type Output = ClusterOutcome;
    type Params = AffinityParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Cluster"
    }

    fn description(&self) -> &'static str {
        "Affinity propagation on z-scored pixel vectors with an unweighted cluster-mean threshold"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        AffinityClusterer::new(params).cluster(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_threshold_is_unweighted() {
        // Cluster 0: three pixels averaging 0.2, cluster 1: one pixel at 0.6
        let x = array![[0.1, 0.3], [0.2, 0.2], [0.25, 0.15], [0.6, 0.6]];
        let (threshold, means) = cluster_threshold(&x, &[0, 0, 0, 1]).unwrap();
        assert_relative_eq!(means[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(means[1], 0.6, epsilon = 1e-12);
        assert_relative_eq!(threshold, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_threshold_label_mismatch() {
        let x = array![[0.1], [0.2]];
        assert!(cluster_threshold(&x, &[0]).is_err());
    }

    #[test]
    fn test_identical_pixels_threshold_is_shared_value() {
        let x = Array2::from_elem((15, 5), 0.5);
        let outcome = AffinityClusterer::default().cluster(&x).unwrap();
        assert_eq!(outcome.exemplar_count, 1);
        assert_relative_eq!(outcome.threshold, 0.5, epsilon = 1e-12);
        assert!(outcome.converged);
    }

    fn two_groups(first: (usize, f64), second: (usize, f64)) -> Array2<f64> {
        let mut x = Array2::from_elem((first.0 + second.0, 5), first.1);
        x.slice_mut(ndarray::s![first.0.., ..]).fill(second.1);
        x
    }

    #[test]
    fn test_duplicate_groups_threshold_is_midpoint() {
        let x = two_groups((10, 0.3), (3, 0.7));
        let outcome = AffinityClusterer::default().cluster(&x).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.exemplar_count, 2);
        assert_relative_eq!(outcome.threshold, 0.5, epsilon = 1e-12);
        assert_eq!(outcome.exemplars, vec![0, 10]);
    }

    #[test]
    fn test_clusters_ranked_by_mean() {
        // High group first, so affinity propagation numbers it 0
        let x = two_groups((3, 0.7), (10, 0.3));
        let outcome = AffinityClusterer::default().cluster(&x).unwrap();
        assert_eq!(outcome.exemplar_count, 2);
        assert!(outcome.labels[..3].iter().all(|&l| l == 1));
        assert!(outcome.labels[3..].iter().all(|&l| l == 0));
        assert_relative_eq!(outcome.cluster_means[0], 0.3, epsilon = 1e-12);
        assert_relative_eq!(outcome.cluster_means[1], 0.7, epsilon = 1e-12);
        assert_eq!(outcome.exemplars, vec![3, 0]);
        assert_relative_eq!(outcome.threshold, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_rank_by_mean() {
        assert_eq!(rank_by_mean(&[0.6, 0.2, 0.4]), vec![2, 0, 1]);
        assert_eq!(rank_by_mean(&[0.5, 0.5, 0.1]), vec![1, 2, 0]);
        assert!(rank_by_mean(&[]).is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_params() {
        let a = AffinityClusterer::default();
        let b = AffinityClusterer::new(AffinityParams {
            preference: -5.0,
            ..Default::default()
        });
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), AffinityClusterer::default().fingerprint());
    }

    #[test]
    fn test_algorithm_trait() {
        let algo = Cluster;
        assert_eq!(algo.name(), "Cluster");
        let outcome = algo.execute_default(array![[0.3, 0.4]]).unwrap();
        assert_eq!(outcome.labels, vec![0]);
        assert_relative_eq!(outcome.threshold, 0.35, epsilon = 1e-12);
    }
}
