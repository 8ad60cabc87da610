//! Affinity propagation clustering
//!
//! Frey & Dueck (2007): points exchange responsibility and availability
//! messages until a stable set of exemplars emerges. The number of clusters
//! is not chosen up front; it follows from the `preference` on the
//! similarity diagonal (lower preference, fewer clusters).
//!
//! Similarity is negative squared Euclidean distance. Message rows are
//! independent within one update and are computed in parallel.
//!
//! Exact duplicate rows are collapsed before message passing; each distinct
//! row carries its multiplicity as a weight on its off-diagonal
//! similarities. A seeded noise on the similarities, as in scikit-learn,
//! breaks the remaining ties.

use std::collections::HashMap;

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::maybe_rayon::*;
use fieldprod_core::{Error, Result};

/// Seed of the tie-breaking noise
const NOISE_SEED: u64 = 42;

/// Parameters for affinity propagation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityParams {
    /// Message damping in [0.5, 1) (default: 0.9)
    pub damping: f64,
    /// Self-similarity on the diagonal (default: -10)
    pub preference: f64,
    /// Iteration cap (default: 200)
    pub max_iterations: usize,
    /// Iterations the exemplar set must stay unchanged (default: 15)
    pub convergence_iter: usize,
    /// Largest message change that counts as settled (default: 1e-6)
    pub tolerance: f64,
}

impl Default for AffinityParams {
    fn default() -> Self {
        Self {
            damping: 0.9,
            preference: -10.0,
            max_iterations: 200,
            convergence_iter: 15,
            tolerance: 1e-6,
        }
    }
}

impl AffinityParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.5..1.0).contains(&self.damping) {
            return Err(Error::InvalidParameter {
                name: "damping",
                value: self.damping.to_string(),
                reason: "must lie in [0.5, 1)".into(),
            });
        }
        if !self.preference.is_finite() {
            return Err(Error::InvalidParameter {
                name: "preference",
                value: self.preference.to_string(),
                reason: "must be finite".into(),
            });
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iterations",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.convergence_iter == 0 {
            return Err(Error::InvalidParameter {
                name: "convergence_iter",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(self.tolerance >= 0.0) {
            return Err(Error::InvalidParameter {
                name: "tolerance",
                value: self.tolerance.to_string(),
                reason: "must be non-negative".into(),
            });
        }
        Ok(())
    }
}

/// Result of affinity propagation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityResult {
    /// Dense cluster id per input row, ordered by exemplar row index
    pub labels: Vec<usize>,
    /// Exemplar row index of each cluster, ascending
    pub exemplars: Vec<usize>,
    pub iterations: usize,
    /// `false` when the iteration cap ended the run
    pub converged: bool,
}

impl AffinityResult {
    pub fn cluster_count(&self) -> usize {
        self.exemplars.len()
    }

    fn single_cluster(n: usize) -> Self {
        Self {
            labels: vec![0; n],
            exemplars: vec![0],
            iterations: 0,
            converged: true,
        }
    }

    fn singletons(n: usize) -> Self {
        Self {
            labels: (0..n).collect(),
            exemplars: (0..n).collect(),
            iterations: 0,
            converged: true,
        }
    }
}

/// Similarity matrix `s(i,k) = -||x_i - x_k||^2` with `preference` on the
/// diagonal.
pub fn similarity_matrix(x: &Array2<f64>, preference: f64) -> Result<Array2<f64>> {
    weighted_similarity(x, &vec![1; x.nrows()], preference)
}

/// Like [`similarity_matrix`], with row `i` off the diagonal scaled by
/// `weights[i]` (the number of input rows it stands for).
fn weighted_similarity(x: &Array2<f64>, weights: &[usize], preference: f64) -> Result<Array2<f64>> {
    let n = x.nrows();
    let data: Vec<f64> = (0..n)
        .into_par_iter()
        .flat_map(|i| {
            let xi = x.row(i);
            let w = weights[i] as f64;
            (0..n)
                .map(|k| {
                    if i == k {
                        preference
                    } else {
                        -w * xi
                            .iter()
                            .zip(x.row(k).iter())
                            .map(|(a, b)| (a - b) * (a - b))
                            .sum::<f64>()
                    }
                })
                .collect::<Vec<f64>>()
        })
        .collect();
    Array2::from_shape_vec((n, n), data).map_err(|e| Error::Other(e.to_string()))
}

/// First row index of each distinct row, and the distinct-row id of every
/// input row. Ids follow first appearance.
fn distinct_rows(x: &Array2<f64>) -> (Vec<usize>, Vec<usize>) {
    let mut seen: HashMap<Vec<u64>, usize> = HashMap::new();
    let mut firsts = Vec::new();
    let mut inverse = Vec::with_capacity(x.nrows());
    for (i, row) in x.rows().into_iter().enumerate() {
        // -0.0 and 0.0 are the same point
        let key: Vec<u64> = row
            .iter()
            .map(|&v| if v == 0.0 { 0 } else { v.to_bits() })
            .collect();
        let id = *seen.entry(key).or_insert_with(|| {
            firsts.push(i);
            firsts.len() - 1
        });
        inverse.push(id);
    }
    (firsts, inverse)
}

/// `s += (eps * s + tiny * 100) * U(0, 1)`, the degeneracy removal of
/// scikit-learn's implementation, from a fixed seed.
fn add_tie_noise(s: &mut Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    let tiny = f64::MIN_POSITIVE * 100.0;
    for v in s.iter_mut() {
        *v += (f64::EPSILON * *v + tiny) * rng.random::<f64>();
    }
}

/// Common off-diagonal similarity, if every off-diagonal entry is equal.
fn uniform_off_diagonal(s: &Array2<f64>) -> Option<f64> {
    let mut common = None;
    for ((i, k), &v) in s.indexed_iter() {
        if i == k {
            continue;
        }
        match common {
            None => common = Some(v),
            Some(c) if c != v => return None,
            _ => {}
        }
    }
    common
}

fn update_responsibilities(s: &Array2<f64>, a: &Array2<f64>) -> Vec<f64> {
    let n = s.nrows();
    (0..n)
        .into_par_iter()
        .flat_map(|i| {
            // Largest and second largest a(i,k') + s(i,k')
            let mut first = f64::NEG_INFINITY;
            let mut first_k = 0;
            let mut second = f64::NEG_INFINITY;
            for k in 0..n {
                let v = a[(i, k)] + s[(i, k)];
                if v > first {
                    second = first;
                    first = v;
                    first_k = k;
                } else if v > second {
                    second = v;
                }
            }
            (0..n)
                .map(|k| s[(i, k)] - if k == first_k { second } else { first })
                .collect::<Vec<f64>>()
        })
        .collect()
}

fn update_availabilities(r: &Array2<f64>) -> Vec<f64> {
    let n = r.nrows();
    // Column sums of max(0, r(i',k)), with r(k,k) itself unclipped
    let mut col_sum = vec![0.0; n];
    for ((i, k), &v) in r.indexed_iter() {
        col_sum[k] += if i == k { v } else { v.max(0.0) };
    }
    let col_sum = &col_sum;

    (0..n)
        .into_par_iter()
        .flat_map(|i| {
            (0..n)
                .map(|k| {
                    let own = r[(i, k)];
                    if i == k {
                        col_sum[k] - own
                    } else {
                        (col_sum[k] - own.max(0.0)).min(0.0)
                    }
                })
                .collect::<Vec<f64>>()
        })
        .collect()
}

/// Blend `update` into `messages` with damping; returns the largest change.
fn damp(messages: &mut Array2<f64>, update: Vec<f64>, damping: f64) -> f64 {
    let mut max_change = 0.0_f64;
    for (m, u) in messages.iter_mut().zip(update) {
        let next = damping * *m + (1.0 - damping) * u;
        max_change = max_change.max((next - *m).abs());
        *m = next;
    }
    max_change
}

fn exemplar_set(a: &Array2<f64>, r: &Array2<f64>) -> Vec<usize> {
    (0..a.nrows())
        .filter(|&k| a[(k, k)] + r[(k, k)] > 0.0)
        .collect()
}

fn argmax_over<I: IntoIterator<Item = usize>>(candidates: I, score: impl Fn(usize) -> f64) -> usize {
    let mut best = None;
    let mut best_score = f64::NEG_INFINITY;
    for k in candidates {
        let v = score(k);
        if best.is_none() || v > best_score {
            best = Some(k);
            best_score = v;
        }
    }
    best.unwrap_or(0)
}

/// Messages settled (or capped) on a similarity matrix.
struct Messages {
    /// Chosen exemplar per row
    chosen: Vec<usize>,
    iterations: usize,
    converged: bool,
}

fn pass_messages(s: &Array2<f64>, params: &AffinityParams) -> Messages {
    let n = s.nrows();
    let mut r = Array2::<f64>::zeros((n, n));
    let mut a = Array2::<f64>::zeros((n, n));
    let mut previous: Vec<usize> = Vec::new();
    let mut stable_for = 0usize;
    let mut converged = false;
    let mut iterations = 0;

    for it in 1..=params.max_iterations {
        iterations = it;
        let dr = damp(&mut r, update_responsibilities(s, &a), params.damping);
        let da = damp(&mut a, update_availabilities(&r), params.damping);

        let exemplars = exemplar_set(&a, &r);
        if exemplars == previous {
            stable_for += 1;
        } else {
            stable_for = 1;
            previous = exemplars;
        }

        let change = dr.max(da);
        if it % 25 == 0 {
            debug!(
                "iteration {it}: {} exemplars, max message change {change:.3e}",
                previous.len()
            );
        }
        if change < params.tolerance
            || (!previous.is_empty() && stable_for >= params.convergence_iter)
        {
            converged = true;
            break;
        }
    }

    if !converged {
        warn!(
            "Affinity propagation did not converge in {} iterations, using last messages",
            params.max_iterations
        );
    }

    let score = |i: usize, k: usize| a[(i, k)] + r[(i, k)];
    let exemplars = exemplar_set(&a, &r);
    let chosen = if exemplars.is_empty() {
        (0..n).map(|i| argmax_over(0..n, |k| score(i, k))).collect()
    } else {
        (0..n)
            .map(|i| {
                if exemplars.binary_search(&i).is_ok() {
                    i
                } else {
                    argmax_over(exemplars.iter().copied(), |k| score(i, k))
                }
            })
            .collect()
    };

    Messages {
        chosen,
        iterations,
        converged,
    }
}

/// Cluster the rows of `x` (samples x features).
///
/// When every pair of rows is equally similar the message passing has no
/// information to work with: a preference below that similarity gives one
/// cluster, at or above it every row becomes its own exemplar.
pub fn affinity_propagation(x: &Array2<f64>, params: &AffinityParams) -> Result<AffinityResult> {
    params.validate()?;
    let n = x.nrows();
    if n == 0 {
        return Err(Error::NoValidPixels);
    }
    if n == 1 {
        return Ok(AffinityResult::single_cluster(1));
    }

    let (firsts, inverse) = distinct_rows(x);
    let m = firsts.len();
    if m == 1 {
        debug!("All {n} rows identical, skipping message passing");
        return Ok(if params.preference < 0.0 {
            AffinityResult::single_cluster(n)
        } else {
            AffinityResult::singletons(n)
        });
    }

    let mut weights = vec![0usize; m];
    for &id in &inverse {
        weights[id] += 1;
    }
    let unique = x.select(Axis(0), &firsts);
    let mut s = weighted_similarity(&unique, &weights, params.preference)?;
    if m == n {
        if let Some(common) = uniform_off_diagonal(&s) {
            debug!("All {n} rows equally similar ({common}), skipping message passing");
            return Ok(if params.preference < common {
                AffinityResult::single_cluster(n)
            } else {
                AffinityResult::singletons(n)
            });
        }
    } else {
        debug!("{n} rows collapsed to {m} distinct rows");
    }
    add_tie_noise(&mut s);

    let messages = pass_messages(&s, params);

    let mut distinct = messages.chosen.clone();
    distinct.sort_unstable();
    distinct.dedup();
    let labels = inverse
        .iter()
        .map(|&id| distinct.binary_search(&messages.chosen[id]).unwrap_or(0))
        .collect();

    debug!(
        "{} clusters after {} iterations",
        distinct.len(),
        messages.iterations
    );

    Ok(AffinityResult {
        labels,
        // Distinct ids follow first appearance, so this stays ascending
        exemplars: distinct.iter().map(|&id| firsts[id]).collect(),
        iterations: messages.iterations,
        converged: messages.converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::StandardScaler;
    use ndarray::array;

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.1, 0.0],
            [-0.1, 0.05],
            [0.0, -0.15],
            [5.0, 5.0],
            [5.2, 5.0],
            [4.9, 5.1],
        ]
    }

    #[test]
    fn test_similarity_matrix() {
        let x = array![[0.0, 0.0], [3.0, 4.0]];
        let s = similarity_matrix(&x, -7.0).unwrap();
        assert_eq!(s[(0, 1)], -25.0);
        assert_eq!(s[(1, 0)], -25.0);
        assert_eq!(s[(0, 0)], -7.0);
    }

    #[test]
    fn test_two_separated_groups() {
        let result = affinity_propagation(&two_blobs(), &AffinityParams::default()).unwrap();

        assert!(result.converged);
        assert_eq!(result.cluster_count(), 2, "labels: {:?}", result.labels);
        let first = result.labels[0];
        assert!(result.labels[..4].iter().all(|&l| l == first));
        assert!(result.labels[4..].iter().all(|&l| l != first));
        // Dense ids in exemplar order: the low group holds the lower exemplar
        assert_eq!(first, 0);
        assert_eq!(result.exemplars, vec![0, 4]);
    }

    #[test]
    fn test_duplicate_groups_split_in_two() {
        // Integer-DN indices repeat exactly; group sizes must not change the split
        for (low, high) in [(10, 3), (12, 4), (20, 5), (6, 6), (1, 30)] {
            let mut values = vec![0.3; low * 5];
            values.extend(vec![0.7; high * 5]);
            let x = Array2::from_shape_vec((low + high, 5), values).unwrap();
            let z = StandardScaler::fit_transform(&x);

            let result = affinity_propagation(&z, &AffinityParams::default()).unwrap();
            assert!(result.converged);
            assert_eq!(result.cluster_count(), 2, "groups {low}/{high}: {:?}", result.labels);
            assert!(result.labels[..low].iter().all(|&l| l == 0));
            assert!(result.labels[low..].iter().all(|&l| l == 1));
            assert_eq!(result.exemplars, vec![0, low]);
        }
    }

    #[test]
    fn test_distinct_rows() {
        let x = array![[1.0, 2.0], [0.0, 1.0], [1.0, 2.0], [-0.0, 1.0]];
        let (firsts, inverse) = distinct_rows(&x);
        assert_eq!(firsts, vec![0, 1]);
        assert_eq!(inverse, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_noise_is_seeded_and_tiny() {
        let x = array![[0.0], [1.0], [3.0]];
        let clean = similarity_matrix(&x, -10.0).unwrap();
        let mut first = clean.clone();
        let mut second = clean.clone();
        add_tie_noise(&mut first);
        add_tie_noise(&mut second);

        assert_eq!(first, second);
        for (noisy, exact) in first.iter().zip(clean.iter()) {
            assert!((noisy - exact).abs() <= 1e-14 * exact.abs().max(1.0));
        }
    }

    #[test]
    fn test_identical_rows_single_cluster() {
        let x = Array2::from_elem((6, 3), 0.5);
        let result = affinity_propagation(&x, &AffinityParams::default()).unwrap();
        assert_eq!(result.labels, vec![0; 6]);
        assert_eq!(result.exemplars, vec![0]);
    }

    #[test]
    fn test_identical_rows_high_preference() {
        let x = Array2::from_elem((4, 2), 1.0);
        let params = AffinityParams {
            preference: 0.0,
            ..Default::default()
        };
        let result = affinity_propagation(&x, &params).unwrap();
        assert_eq!(result.labels, vec![0, 1, 2, 3]);
        assert_eq!(result.cluster_count(), 4);
    }

    #[test]
    fn test_single_row() {
        let x = array![[0.4, 0.5, 0.6]];
        let result = affinity_propagation(&x, &AffinityParams::default()).unwrap();
        assert_eq!(result.labels, vec![0]);
    }

    #[test]
    fn test_empty_is_error() {
        let x = Array2::<f64>::zeros((0, 5));
        assert!(matches!(
            affinity_propagation(&x, &AffinityParams::default()),
            Err(Error::NoValidPixels)
        ));
    }

    #[test]
    fn test_iteration_cap_reports_not_converged() {
        let params = AffinityParams {
            max_iterations: 2,
            ..Default::default()
        };
        let result = affinity_propagation(&two_blobs(), &params).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.labels.len(), 7);
    }

    #[test]
    fn test_invalid_damping() {
        for damping in [0.3, 1.0, f64::NAN] {
            let params = AffinityParams {
                damping,
                ..Default::default()
            };
            assert!(params.validate().is_err(), "damping {damping} accepted");
        }
    }
}
