//! Temporal stack preprocessing
//!
//! Turns an N-year stack into the dense V x N pixel matrix the clustering
//! engine runs on:
//!
//! 1. Background: every cell equal to the minimum of the most recent year.
//! 2. Tukey fence from the across-years average of the per-year 25th/75th
//!    percentiles of non-background cells.
//! 3. Statistical outliers: pixel mean across years outside the fence.
//! 4. Missing: any non-finite year value.
//!
//! Everything else is valid and enters the matrix in row-major order.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fieldprod_core::{Algorithm, Error, GeoTransform, RasterStack, Result};

use super::statistics::nan_percentile;

/// Which side(s) of the Tukey fence reject a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMode {
    /// Below `low` or above `high`
    #[default]
    Both,
    /// Only below `low`
    LowOnly,
    /// Only above `high`
    HighOnly,
    /// Background removal only
    None,
}

/// Parameters for [`preprocess`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessParams {
    pub outlier_mode: OutlierMode,
    /// IQR multiplier of the fence (default: 1.5)
    pub iqr_factor: f64,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            outlier_mode: OutlierMode::Both,
            iqr_factor: 1.5,
        }
    }
}

/// Why a position was left out of the pixel matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    Background,
    StatisticalOutlier,
    Missing,
}

/// An excluded position with its raw year vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedPixel {
    /// Row-major flat index
    pub index: usize,
    pub kind: ExclusionKind,
    /// Stack-order values, as they were before exclusion
    pub values: Vec<f64>,
}

/// All excluded positions, in row-major order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionSet {
    pixels: Vec<ExcludedPixel>,
    /// Minimum of the most recent year; `None` when that year has no finite cell
    background_value: Option<f64>,
}

impl ExclusionSet {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExcludedPixel> {
        self.pixels.iter()
    }

    pub fn of_kind(&self, kind: ExclusionKind) -> impl Iterator<Item = &ExcludedPixel> {
        self.pixels.iter().filter(move |p| p.kind == kind)
    }

    pub fn count(&self, kind: ExclusionKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn background_value(&self) -> Option<f64> {
        self.background_value
    }
}

/// Outlier fence derived from the stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TukeyFence {
    pub q1: f64,
    pub q3: f64,
    pub low: f64,
    pub high: f64,
}

impl TukeyFence {
    fn from_quartiles(q1: f64, q3: f64, k: f64) -> Self {
        let iqr = q3 - q1;
        Self {
            q1,
            q3,
            low: q1 - k * iqr,
            high: q3 + k * iqr,
        }
    }

    /// A fence that rejects nothing
    fn open() -> Self {
        Self {
            q1: f64::NAN,
            q3: f64::NAN,
            low: f64::NEG_INFINITY,
            high: f64::INFINITY,
        }
    }

    fn rejects(&self, mean: f64, mode: OutlierMode) -> bool {
        match mode {
            OutlierMode::Both => mean < self.low || mean > self.high,
            OutlierMode::LowOnly => mean < self.low,
            OutlierMode::HighOnly => mean > self.high,
            OutlierMode::None => false,
        }
    }
}

/// Output of [`preprocess`]
#[derive(Debug, Clone)]
pub struct PreprocessedStack {
    /// V x N, rows in row-major grid order
    pub pixel_matrix: Array2<f64>,
    /// (rows, cols) of the source grids
    pub grid_shape: (usize, usize),
    /// Georeferencing of the source grids
    pub transform: GeoTransform,
    /// Flat index of each matrix row
    pub valid_indices: Vec<usize>,
    pub exclusions: ExclusionSet,
    pub fence: TukeyFence,
}

impl PreprocessedStack {
    /// Number of years (matrix columns)
    pub fn n_years(&self) -> usize {
        self.pixel_matrix.ncols()
    }

    pub fn valid_count(&self) -> usize {
        self.valid_indices.len()
    }
}

/// Preprocessing stage as an [`Algorithm`]
#[derive(Debug, Clone, Default)]
pub struct Preprocess;

impl Algorithm for Preprocess {
    type Input = RasterStack;
    type Output = PreprocessedStack;
    type Params = PreprocessParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Preprocess"
    }

    fn description(&self) -> &'static str {
        "Background and Tukey-fence outlier removal over a multi-year stack"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        preprocess(&input, &params)
    }
}

/// Remove background and outlier pixels and build the pixel matrix.
pub fn preprocess(stack: &RasterStack, params: &PreprocessParams) -> Result<PreprocessedStack> {
    if !params.iqr_factor.is_finite() || params.iqr_factor < 0.0 {
        return Err(Error::InvalidParameter {
            name: "iqr_factor",
            value: params.iqr_factor.to_string(),
            reason: "must be a non-negative finite number".into(),
        });
    }

    let grid_shape = stack.shape();
    let cells = stack.cell_count();
    let n = stack.len();
    let latest = stack.latest().grid();

    // 1. background
    let background_value = latest
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .min_by(f64::total_cmp);
    let is_background: Vec<bool> = latest
        .iter()
        .map(|&v| Some(v) == background_value)
        .collect();

    // 2-3. fence from per-year quartiles over non-background cells
    let mut q1s = Vec::with_capacity(n);
    let mut q3s = Vec::with_capacity(n);
    for year in stack.years() {
        let values = || {
            year.grid()
                .iter()
                .zip(&is_background)
                .filter(|(_, bg)| !**bg)
                .map(|(&v, _)| v)
        };
        if let (Some(q1), Some(q3)) = (nan_percentile(values(), 25.0), nan_percentile(values(), 75.0)) {
            q1s.push(q1);
            q3s.push(q3);
        }
    }
    let fence = if q1s.is_empty() {
        TukeyFence::open()
    } else {
        let avg = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        TukeyFence::from_quartiles(avg(&q1s), avg(&q3s), params.iqr_factor)
    };
    debug!(
        "Fence [{:.4}, {:.4}] from Q1 {:.4} / Q3 {:.4}",
        fence.low, fence.high, fence.q1, fence.q3
    );

    // 4-5. walk row-major
    let mut matrix: Vec<f64> = Vec::with_capacity(cells * n);
    let mut valid_indices = Vec::with_capacity(cells);
    let mut pixels = Vec::new();

    for (flat, &background) in is_background.iter().enumerate() {
        let values = stack.pixel_vector(flat);
        let mean = values.iter().sum::<f64>() / n as f64;

        let kind = if background {
            Some(ExclusionKind::Background)
        } else if fence.rejects(mean, params.outlier_mode) {
            Some(ExclusionKind::StatisticalOutlier)
        } else if values.iter().any(|v| !v.is_finite()) {
            Some(ExclusionKind::Missing)
        } else {
            None
        };

        match kind {
            Some(kind) => pixels.push(ExcludedPixel {
                index: flat,
                kind,
                values,
            }),
            None => {
                matrix.extend_from_slice(&values);
                valid_indices.push(flat);
            }
        }
    }

    let exclusions = ExclusionSet {
        pixels,
        background_value,
    };
    info!(
        "Preprocessed {cells} cells x {n} years: {} valid, {} background, {} outliers, {} missing",
        valid_indices.len(),
        exclusions.count(ExclusionKind::Background),
        exclusions.count(ExclusionKind::StatisticalOutlier),
        exclusions.count(ExclusionKind::Missing),
    );

    if valid_indices.is_empty() {
        return Err(Error::NoValidPixels);
    }

    let pixel_matrix = Array2::from_shape_vec((valid_indices.len(), n), matrix)
        .map_err(|e| Error::Other(e.to_string()))?;

    Ok(PreprocessedStack {
        pixel_matrix,
        grid_shape,
        transform: *latest.transform(),
        valid_indices,
        exclusions,
        fence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldprod_core::{Raster, RasterYear, YearMeta};

    fn stack_from(years: Vec<Vec<f64>>, rows: usize, cols: usize) -> RasterStack {
        let years = years
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                RasterYear::new(
                    YearMeta::local(2024 - i as i32),
                    Raster::from_vec(v, rows, cols).unwrap(),
                )
            })
            .collect();
        RasterStack::new(years).unwrap()
    }

    #[test]
    fn test_background_from_latest_year() {
        let mut y0 = vec![0.5; 16];
        y0[5] = -1.0;
        let stack = stack_from(vec![y0, vec![0.5; 16], vec![0.5; 16]], 4, 4);
        let pre = preprocess(&stack, &PreprocessParams::default()).unwrap();

        assert_eq!(pre.valid_count(), 15);
        assert_eq!(pre.n_years(), 3);
        assert_eq!(pre.exclusions.count(ExclusionKind::Background), 1);
        let bg: Vec<usize> = pre.exclusions.of_kind(ExclusionKind::Background).map(|p| p.index).collect();
        assert_eq!(bg, vec![5]);
        assert_eq!(pre.exclusions.background_value(), Some(-1.0));
        assert!(!pre.valid_indices.contains(&5));
    }

    #[test]
    fn test_rows_in_row_major_order() {
        let y0 = vec![-1.0, 0.3, 0.4, 0.5, 0.6, 0.45];
        let y1 = vec![0.2, 0.35, 0.42, 0.5, 0.55, 0.41];
        let stack = stack_from(vec![y0, y1], 2, 3);
        let pre = preprocess(&stack, &PreprocessParams::default()).unwrap();

        assert_eq!(pre.valid_indices, vec![1, 2, 3, 4, 5]);
        assert_eq!(pre.pixel_matrix.row(0).to_vec(), vec![0.3, 0.35]);
        assert_eq!(pre.pixel_matrix.row(4).to_vec(), vec![0.45, 0.41]);
    }

    #[test]
    fn test_outliers_beyond_fence() {
        // Nine cells around 0.5, one very high, one background
        let mut y0 = vec![0.48, 0.49, 0.5, 0.51, 0.52, 0.5, 0.49, 0.51, 0.5, 5.0, 0.0];
        let y1 = y0.clone();
        y0[10] = -1.0;
        let stack = stack_from(vec![y0, y1], 1, 11);

        let pre = preprocess(&stack, &PreprocessParams::default()).unwrap();
        let outliers: Vec<usize> = pre
            .exclusions
            .of_kind(ExclusionKind::StatisticalOutlier)
            .map(|p| p.index)
            .collect();
        assert_eq!(outliers, vec![9]);
        assert_eq!(pre.valid_count(), 9);

        // Raw vector kept for later reinstatement
        let kept = pre.exclusions.iter().find(|p| p.index == 9).unwrap();
        assert_eq!(kept.values, vec![5.0, 5.0]);

        let low_only = PreprocessParams {
            outlier_mode: OutlierMode::LowOnly,
            ..Default::default()
        };
        let pre = preprocess(&stack, &low_only).unwrap();
        assert_eq!(pre.exclusions.count(ExclusionKind::StatisticalOutlier), 0);
        assert_eq!(pre.valid_count(), 10);
    }

    #[test]
    fn test_outlier_mode_names() {
        for (name, mode) in [
            ("both", OutlierMode::Both),
            ("low_only", OutlierMode::LowOnly),
            ("high_only", OutlierMode::HighOnly),
            ("none", OutlierMode::None),
        ] {
            let parsed: OutlierMode = serde_json::from_value(serde_json::json!(name)).unwrap();
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn test_nan_is_missing() {
        let y0 = vec![-1.0, 0.5, 0.5, 0.5];
        let y1 = vec![0.5, 0.5, f64::NAN, 0.5];
        let stack = stack_from(vec![y0, y1], 2, 2);
        let pre = preprocess(&stack, &PreprocessParams::default()).unwrap();

        assert_eq!(pre.exclusions.count(ExclusionKind::Missing), 1);
        assert_eq!(pre.valid_indices, vec![1, 3]);
    }

    #[test]
    fn test_background_wins_over_outlier() {
        let y0 = vec![-5.0, 0.5, 0.5, 0.5, 0.5];
        let stack = stack_from(vec![y0.clone(), y0], 1, 5);
        let pre = preprocess(&stack, &PreprocessParams::default()).unwrap();
        assert_eq!(pre.exclusions.count(ExclusionKind::Background), 1);
        assert_eq!(pre.exclusions.count(ExclusionKind::StatisticalOutlier), 0);
    }

    #[test]
    fn test_all_background_is_error() {
        let stack = stack_from(vec![vec![0.5; 4]], 2, 2);
        assert!(matches!(
            preprocess(&stack, &PreprocessParams::default()),
            Err(Error::NoValidPixels)
        ));
    }
}
