//! Cluster-level zoning and the rule-based baseline
//!
//! A cluster profile follows one cluster through the years: its yearly
//! mean, spread and median, whether the cluster as a whole sits above the
//! threshold, and how many years it reached it. The rule-based baseline
//! skips clustering altogether and thresholds on the mean of pixel means.

use serde::{Deserialize, Serialize};
use tracing::info;

use fieldprod_core::{Error, Raster, Result};

use super::cluster::ClusterOutcome;
use super::productivity::{
    classify_at, pixel_class, pixel_high_low_map, reinstatable, round_to, Classification,
    ClassifyParams, NO_CLASS,
};
use crate::temporal::{nan_percentile, PreprocessedStack};

/// One cluster's values in one year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterYear {
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub median: f64,
}

/// A cluster across the whole stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    /// Rank id, 0 = lowest mean
    pub cluster: usize,
    pub pixels: usize,
    pub mean: f64,
    /// 1 below the threshold, 2 at or above
    pub level: u8,
    /// One plus the years whose cluster mean reached the threshold
    pub class: u8,
    /// Stack order, most recent first
    pub years: Vec<ClusterYear>,
}

/// Yearly statistics and classes of every cluster in `outcome`.
pub fn cluster_profiles(pre: &PreprocessedStack, outcome: &ClusterOutcome) -> Result<Vec<ClusterProfile>> {
    if outcome.labels.len() != pre.valid_count() {
        return Err(Error::SizeMismatch {
            er: pre.valid_count(),
            ec: 1,
            ar: outcome.labels.len(),
            ac: 1,
        });
    }

    let clusters = outcome.cluster_means.len();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); clusters];
    for (row, &label) in outcome.labels.iter().enumerate() {
        members
            .get_mut(label)
            .ok_or_else(|| Error::Other(format!("Cluster {label} has no mean in the outcome")))?
            .push(row);
    }

    let profiles = members
        .iter()
        .enumerate()
        .map(|(cluster, rows)| {
            let years: Vec<ClusterYear> = (0..pre.n_years())
                .map(|year| {
                    let values: Vec<f64> = rows.iter().map(|&r| pre.pixel_matrix[[r, year]]).collect();
                    year_summary(&values)
                })
                .collect();
            let yearly_means: Vec<f64> = years.iter().map(|y| y.mean).collect();
            let mean = outcome.cluster_means[cluster];
            ClusterProfile {
                cluster,
                pixels: rows.len(),
                mean,
                level: if mean < outcome.threshold { 1 } else { 2 },
                class: pixel_class(&yearly_means, outcome.threshold),
                years,
            }
        })
        .collect();
    Ok(profiles)
}

fn year_summary(values: &[f64]) -> ClusterYear {
    if values.is_empty() {
        return ClusterYear {
            mean: f64::NAN,
            std: f64::NAN,
            median: f64::NAN,
        };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    ClusterYear {
        mean,
        std: var.sqrt(),
        median: nan_percentile(values.iter().copied(), 50.0).unwrap_or(f64::NAN),
    }
}

/// Map of cluster classes: each valid pixel takes its cluster's class.
///
/// Reinstated outliers are classified on their own values, as in
/// [`classify`](super::classify).
pub fn cluster_class_map(
    pre: &PreprocessedStack,
    outcome: &ClusterOutcome,
    profiles: &[ClusterProfile],
    params: &ClassifyParams,
) -> Result<Raster<u8>> {
    let (rows, cols) = pre.grid_shape;
    let mut classes = vec![NO_CLASS; rows * cols];
    for (&label, &flat) in outcome.labels.iter().zip(&pre.valid_indices) {
        let profile = profiles
            .get(label)
            .ok_or_else(|| Error::Other(format!("No profile for cluster {label}")))?;
        classes[flat] = profile.class;
    }
    if params.include_excluded {
        for pixel in reinstatable(pre) {
            classes[pixel.index] = pixel_class(&pixel.values, outcome.threshold);
        }
    }

    let mut map = Raster::from_vec(classes, rows, cols)?;
    map.set_transform(pre.transform);
    map.set_nodata(Some(NO_CLASS));
    Ok(map)
}

/// Zoning without clustering.
#[derive(Debug, Clone)]
pub struct RuleBasedZoning {
    pub threshold: f64,
    pub classification: Classification,
    pub high_low_map: Raster<u8>,
}

/// Mean of the pixel means, rounded to 3 decimals.
pub fn rule_based_threshold(pre: &PreprocessedStack) -> Result<f64> {
    let means = pre
        .pixel_matrix
        .mean_axis(ndarray::Axis(1))
        .ok_or(Error::NoValidPixels)?;
    let mean = means.mean().ok_or(Error::NoValidPixels)?;
    Ok(round_to(mean, 3))
}

/// Classes and high/low levels per pixel against [`rule_based_threshold`].
pub fn rule_based_zoning(pre: &PreprocessedStack, params: &ClassifyParams) -> Result<RuleBasedZoning> {
    let threshold = rule_based_threshold(pre)?;
    let classification = classify_at(pre, threshold, 0, true, params)?;
    let high_low_map = pixel_high_low_map(pre, threshold, params)?;
    info!(
        "Rule-based baseline: threshold {threshold:.3}, profitability {}",
        classification.summary.profitability_score
    );
    Ok(RuleBasedZoning {
        threshold,
        classification,
        high_low_map,
    })
}
