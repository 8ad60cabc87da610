//! Productivity classes, map reconstruction and scoring
//!
//! A pixel's class is one plus the number of years its index reached the
//! threshold, so an N-year stack yields classes 1..=N+1. The map is rebuilt
//! by walking the grid in row-major order; positions that never entered the
//! pixel matrix keep the no-data sentinel 0.

use serde::{Deserialize, Serialize};
use tracing::info;

use fieldprod_core::{Algorithm, Error, Raster, Result};

use super::cluster::ClusterOutcome;
use crate::temporal::{ExcludedPixel, ExclusionKind, PreprocessedStack};

/// Class value of pixels that were not classified
pub const NO_CLASS: u8 = 0;

const SQUARE_METRES_PER_ACRE: f64 = 4046.86;

/// Parameters for [`classify`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyParams {
    /// Classify statistical outliers too and splice them back into the map
    pub include_excluded: bool,
    /// Ground area of one pixel (default: 900, a 30 m Landsat pixel)
    pub pixel_area_m2: f64,
}

impl Default for ClassifyParams {
    fn default() -> Self {
        Self {
            include_excluded: false,
            pixel_area_m2: 900.0,
        }
    }
}

/// Figures for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub class: u8,
    pub pixels: usize,
    /// Share of classified pixels, rounded to 2 decimals
    pub percentage: f64,
    pub area_m2: f64,
    /// Rounded to 3 decimals
    pub acres: f64,
}

/// Field-level result of classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub n_years: usize,
    /// Classes 1..=N+1 in order
    pub classes: Vec<ClassSummary>,
    /// 0-100
    pub profitability_score: u8,
    pub threshold: f64,
    pub exemplar_count: usize,
    pub classified_pixels: usize,
    /// Outliers put back into the map by `include_excluded`
    pub reinstated_pixels: usize,
    /// Clustering hit its iteration cap
    pub clustering_degraded: bool,
}

impl ClassificationSummary {
    /// Percentage of `class`, 0 for classes out of range
    pub fn percentage(&self, class: u8) -> f64 {
        self.classes
            .iter()
            .find(|c| c.class == class)
            .map_or(0.0, |c| c.percentage)
    }

    pub fn percentages(&self) -> Vec<f64> {
        self.classes.iter().map(|c| c.percentage).collect()
    }
}

/// Class map plus summary
#[derive(Debug, Clone)]
pub struct Classification {
    /// `NO_CLASS` where unclassified; carries the stack's georeferencing
    pub map: Raster<u8>,
    pub summary: ClassificationSummary,
}

/// `count(value >= threshold) + 1`
pub fn pixel_class(values: &[f64], threshold: f64) -> u8 {
    let above = values.iter().filter(|&&v| v >= threshold).count();
    u8::try_from(above + 1).unwrap_or(u8::MAX)
}

/// Profitability weight of classes 1..=N+1.
///
/// Five years use the calibrated {10, 30, 50, 70, 85, 100}; other stack
/// depths spread linearly from 10 to 100.
pub fn class_weights(n_years: usize) -> Vec<f64> {
    if n_years == 5 {
        return vec![10.0, 30.0, 50.0, 70.0, 85.0, 100.0];
    }
    let n = n_years.max(1) as f64;
    (0..=n_years.max(1))
        .map(|c| (10.0 + 90.0 * c as f64 / n).round())
        .collect()
}

/// `floor(sum(pct * weight) / 100)`, clamped to 0..=100.
pub fn profitability_score(percentages: &[f64], weights: &[f64]) -> u8 {
    let weighted: f64 = percentages.iter().zip(weights).map(|(p, w)| p * w).sum();
    (weighted / 100.0).floor().clamp(0.0, 100.0) as u8
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Statistical outliers that `include_excluded` may put back: fully finite
/// and never carrying the background value.
pub(crate) fn reinstatable(pre: &PreprocessedStack) -> impl Iterator<Item = &ExcludedPixel> {
    let background = pre.exclusions.background_value();
    pre.exclusions
        .of_kind(ExclusionKind::StatisticalOutlier)
        .filter(move |pixel| {
            pixel.values.iter().all(|v| v.is_finite())
                && background.map_or(true, |bg| !pixel.values.contains(&bg))
        })
}

fn row_mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn validate_area(params: &ClassifyParams) -> Result<()> {
    if params.pixel_area_m2 > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name: "pixel_area_m2",
            value: params.pixel_area_m2.to_string(),
            reason: "must be positive".into(),
        })
    }
}

fn check_labels(pre: &PreprocessedStack, outcome: &ClusterOutcome) -> Result<()> {
    if outcome.labels.len() == pre.valid_count() {
        Ok(())
    } else {
        Err(Error::SizeMismatch {
            er: pre.valid_count(),
            ec: 1,
            ar: outcome.labels.len(),
            ac: 1,
        })
    }
}

fn georeferenced(values: Vec<u8>, pre: &PreprocessedStack) -> Result<Raster<u8>> {
    let (rows, cols) = pre.grid_shape;
    let mut map = Raster::from_vec(values, rows, cols)?;
    map.set_transform(pre.transform);
    map.set_nodata(Some(NO_CLASS));
    Ok(map)
}

/// Classify every valid pixel (and optionally reinstated outliers), rebuild
/// the 2D map and compute the summary.
pub fn classify(
    pre: &PreprocessedStack,
    outcome: &ClusterOutcome,
    params: &ClassifyParams,
) -> Result<Classification> {
    check_labels(pre, outcome)?;
    classify_at(pre, outcome.threshold, outcome.exemplar_count, outcome.converged, params)
}

/// Years-above-`threshold` classes for a threshold from any source.
pub(crate) fn classify_at(
    pre: &PreprocessedStack,
    threshold: f64,
    exemplar_count: usize,
    converged: bool,
    params: &ClassifyParams,
) -> Result<Classification> {
    validate_area(params)?;
    let n_years = pre.n_years();
    let (rows, cols) = pre.grid_shape;

    let mut classes = vec![NO_CLASS; rows * cols];
    for (row, &flat) in pre.pixel_matrix.rows().into_iter().zip(&pre.valid_indices) {
        classes[flat] = row
            .as_slice()
            .map_or_else(|| pixel_class(&row.to_vec(), threshold), |v| pixel_class(v, threshold));
    }

    let mut reinstated = 0usize;
    if params.include_excluded {
        for pixel in reinstatable(pre) {
            classes[pixel.index] = pixel_class(&pixel.values, threshold);
            reinstated += 1;
        }
    }

    let mut counts = vec![0usize; n_years + 1];
    for &c in classes.iter().filter(|&&c| c != NO_CLASS) {
        counts[usize::from(c) - 1] += 1;
    }
    let total = pre.valid_count() + reinstated;

    let summaries: Vec<ClassSummary> = counts
        .iter()
        .enumerate()
        .map(|(i, &pixels)| {
            let area_m2 = pixels as f64 * params.pixel_area_m2;
            ClassSummary {
                class: (i + 1) as u8,
                pixels,
                percentage: round_to(100.0 * pixels as f64 / total as f64, 2),
                area_m2,
                acres: round_to(area_m2 / SQUARE_METRES_PER_ACRE, 3),
            }
        })
        .collect();

    let percentages: Vec<f64> = summaries.iter().map(|c| c.percentage).collect();
    let score = profitability_score(&percentages, &class_weights(n_years));
    let map = georeferenced(classes, pre)?;

    info!(
        "Classified {total} pixels into {} classes, profitability {score}",
        n_years + 1
    );

    Ok(Classification {
        map,
        summary: ClassificationSummary {
            n_years,
            classes: summaries,
            profitability_score: score,
            threshold,
            exemplar_count,
            classified_pixels: total,
            reinstated_pixels: reinstated,
            clustering_degraded: !converged,
        },
    })
}

/// Two-level map decided per cluster: every member of a cluster whose mean
/// is below the threshold gets 1, the others 2.
///
/// Reinstated outliers belong to no cluster and fall back to their own
/// mean. Excluded positions stay `NO_CLASS`.
pub fn high_low_map(
    pre: &PreprocessedStack,
    outcome: &ClusterOutcome,
    params: &ClassifyParams,
) -> Result<Raster<u8>> {
    check_labels(pre, outcome)?;
    let threshold = outcome.threshold;
    let level = |mean: f64| if mean < threshold { 1 } else { 2 };

    let (rows, cols) = pre.grid_shape;
    let mut levels = vec![NO_CLASS; rows * cols];
    for (&label, &flat) in outcome.labels.iter().zip(&pre.valid_indices) {
        let mean = outcome.cluster_means.get(label).copied().ok_or_else(|| {
            Error::Other(format!("Cluster {label} has no mean in the outcome"))
        })?;
        levels[flat] = level(mean);
    }
    if params.include_excluded {
        for pixel in reinstatable(pre) {
            levels[pixel.index] = level(row_mean(&pixel.values));
        }
    }
    georeferenced(levels, pre)
}

/// Two-level map decided per pixel: 1 where the pixel's own mean is below
/// `threshold`, 2 otherwise.
pub fn pixel_high_low_map(
    pre: &PreprocessedStack,
    threshold: f64,
    params: &ClassifyParams,
) -> Result<Raster<u8>> {
    let level = |mean: f64| if mean < threshold { 1 } else { 2 };
    let (rows, cols) = pre.grid_shape;
    let mut levels = vec![NO_CLASS; rows * cols];
    for (row, &flat) in pre.pixel_matrix.rows().into_iter().zip(&pre.valid_indices) {
        levels[flat] = level(row.sum() / row.len() as f64);
    }
    if params.include_excluded {
        for pixel in reinstatable(pre) {
            levels[pixel.index] = level(row_mean(&pixel.values));
        }
    }
    georeferenced(levels, pre)
}

/// Classification stage as an [`Algorithm`]
#[derive(Debug, Clone, Default)]
pub struct Classify;

impl Algorithm for Classify {
    type Input = (PreprocessedStack, ClusterOutcome);
    type Output = Classification;
    type Params = ClassifyParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Classify"
    }

    fn description(&self) -> &'static str {
        "Years-above-threshold productivity classes with map rebuild and profitability score"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        classify(&input.0, &input.1, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::{preprocess, PreprocessParams};
    use fieldprod_core::{RasterStack, RasterYear, YearMeta};

    fn outcome(labels: usize, threshold: f64) -> ClusterOutcome {
        ClusterOutcome {
            labels: vec![0; labels],
            threshold,
            exemplar_count: 1,
            exemplars: vec![0],
            cluster_means: vec![threshold],
            iterations: 0,
            converged: true,
        }
    }

    fn stack(years: Vec<Vec<f64>>, rows: usize, cols: usize) -> RasterStack {
        RasterStack::new(
            years
                .into_iter()
                .enumerate()
                .map(|(i, v)| {
                    RasterYear::new(
                        YearMeta::local(2024 - i as i32),
                        Raster::from_vec(v, rows, cols).unwrap(),
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_pixel_class_bounds() {
        assert_eq!(pixel_class(&[0.1, 0.2, 0.3, 0.1, 0.2], 0.5), 1);
        assert_eq!(pixel_class(&[0.5, 0.6, 0.7, 0.5, 0.9], 0.5), 6);
        assert_eq!(pixel_class(&[0.5, 0.4, 0.7, 0.1, 0.9], 0.5), 4);
    }

    #[test]
    fn test_class_weights() {
        assert_eq!(class_weights(5), vec![10.0, 30.0, 50.0, 70.0, 85.0, 100.0]);
        assert_eq!(class_weights(3), vec![10.0, 40.0, 70.0, 100.0]);
        assert_eq!(class_weights(1), vec![10.0, 100.0]);
    }

    #[test]
    fn test_score_floor_and_clamp() {
        let w = class_weights(5);
        assert_eq!(profitability_score(&[0.0, 0.0, 0.0, 0.0, 0.0, 100.0], &w), 100);
        assert_eq!(profitability_score(&[100.0, 0.0, 0.0, 0.0, 0.0, 0.0], &w), 10);
        // 50 * 30 + 50 * 85 = 5750 -> 57.5 -> 57
        assert_eq!(profitability_score(&[0.0, 50.0, 0.0, 0.0, 50.0, 0.0], &w), 57);
        assert_eq!(profitability_score(&[0.0, 0.0, 0.0, 0.0, 0.0, 100.01], &w), 100);
    }

    #[test]
    fn test_uniform_field_all_top_class() {
        let mut y0 = vec![0.5; 16];
        y0[6] = -1.0;
        let years = vec![y0, vec![0.5; 16], vec![0.5; 16], vec![0.5; 16], vec![0.5; 16]];
        let pre = preprocess(&stack(years, 4, 4), &PreprocessParams::default()).unwrap();
        let result = classify(&pre, &outcome(15, 0.5), &ClassifyParams::default()).unwrap();

        assert_eq!(result.map.get(1, 2).unwrap(), NO_CLASS);
        assert_eq!(result.map.iter().filter(|&&c| c == 6).count(), 15);
        assert_eq!(result.summary.percentage(6), 100.0);
        assert_eq!(result.summary.percentage(1), 0.0);
        assert_eq!(result.summary.profitability_score, 100);
        assert_eq!(result.summary.classes[5].pixels, 15);
        assert_eq!(result.summary.classes[5].area_m2, 13_500.0);
        assert_eq!(result.summary.classes[5].acres, 3.336);
    }

    #[test]
    fn test_reinstates_only_clean_outliers() {
        let y0 = vec![-1.0, 0.5, 0.52, 0.48, 0.5, 0.51, 0.49, 3.0, 0.5];
        let y1 = vec![0.5, 0.5, 0.52, 0.48, 0.5, 0.51, 0.49, 3.0, 0.5];
        let pre = preprocess(&stack(vec![y0, y1], 3, 3), &PreprocessParams::default()).unwrap();
        assert_eq!(pre.exclusions.count(ExclusionKind::StatisticalOutlier), 1);

        let out = outcome(pre.valid_count(), 0.5);
        let strict = classify(&pre, &out, &ClassifyParams::default()).unwrap();
        assert_eq!(strict.map.get(2, 1).unwrap(), NO_CLASS);

        let params = ClassifyParams {
            include_excluded: true,
            ..Default::default()
        };
        let loose = classify(&pre, &out, &params).unwrap();
        assert_eq!(loose.map.get(2, 1).unwrap(), 3);
        assert_eq!(loose.map.get(0, 0).unwrap(), NO_CLASS, "background stays out");
        assert_eq!(loose.summary.reinstated_pixels, 1);
        assert_eq!(loose.summary.classified_pixels, pre.valid_count() + 1);
    }

    #[test]
    fn test_label_count_mismatch() {
        let pre = preprocess(
            &stack(vec![vec![-1.0, 0.5, 0.5, 0.5]], 2, 2),
            &PreprocessParams::default(),
        )
        .unwrap();
        assert!(classify(&pre, &outcome(2, 0.5), &ClassifyParams::default()).is_err());
    }

    #[test]
    fn test_high_low_follows_cluster_mean() {
        let y0 = vec![-1.0, 0.2, 0.6, 0.4];
        let pre = preprocess(&stack(vec![y0.clone(), y0], 2, 2), &PreprocessParams::default()).unwrap();
        // 0.4 sits with 0.6 in a cluster averaging 0.5
        let out = ClusterOutcome {
            labels: vec![0, 1, 1],
            threshold: 0.45,
            exemplar_count: 2,
            exemplars: vec![0, 1],
            cluster_means: vec![0.2, 0.5],
            iterations: 20,
            converged: true,
        };
        let params = ClassifyParams::default();

        let map = high_low_map(&pre, &out, &params).unwrap();
        assert_eq!(map.get(0, 0).unwrap(), NO_CLASS);
        assert_eq!(map.get(0, 1).unwrap(), 1);
        assert_eq!(map.get(1, 0).unwrap(), 2);
        assert_eq!(map.get(1, 1).unwrap(), 2);

        let per_pixel = pixel_high_low_map(&pre, 0.45, &params).unwrap();
        assert_eq!(per_pixel.get(1, 1).unwrap(), 1);
        assert_eq!(per_pixel.get(1, 0).unwrap(), 2);
    }

    #[test]
    fn test_high_low_reinstated_outlier_uses_own_mean() {
        let y0 = vec![-1.0, 0.3, 0.32, 0.28, 0.3, 0.31, 0.29, 3.0, 0.3];
        let y1 = vec![0.3, 0.3, 0.32, 0.28, 0.3, 0.31, 0.29, 3.0, 0.3];
        let pre = preprocess(&stack(vec![y0, y1], 3, 3), &PreprocessParams::default()).unwrap();
        let mut out = outcome(pre.valid_count(), 0.5);
        out.cluster_means = vec![0.3];

        let strict = high_low_map(&pre, &out, &ClassifyParams::default()).unwrap();
        assert_eq!(strict.get(2, 1).unwrap(), NO_CLASS);
        assert_eq!(strict.get(1, 1).unwrap(), 1);

        let params = ClassifyParams {
            include_excluded: true,
            ..Default::default()
        };
        let loose = high_low_map(&pre, &out, &params).unwrap();
        assert_eq!(loose.get(2, 1).unwrap(), 2);
        assert_eq!(loose.get(0, 0).unwrap(), NO_CLASS);
    }

    #[test]
    fn test_high_low_label_mismatch() {
        let pre = preprocess(
            &stack(vec![vec![-1.0, 0.5, 0.5, 0.5]], 2, 2),
            &PreprocessParams::default(),
        )
        .unwrap();
        assert!(high_low_map(&pre, &outcome(2, 0.5), &ClassifyParams::default()).is_err());
    }
}
