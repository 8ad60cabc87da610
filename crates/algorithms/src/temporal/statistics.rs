//! Aggregate index statistics over a stack
//!
//! Per-year distribution summaries plus an across-years view with a simple
//! trend (latest vs oldest yearly mean). This is the figure set a crop
//! recommendation service consumes alongside the productivity map.

use serde::{Deserialize, Serialize};

use fieldprod_core::{Raster, RasterStack};

/// Relative change (latest vs oldest yearly mean) below which the trend
/// counts as stable.
const STABLE_BAND: f64 = 0.05;

/// Percentile of a sorted, NaN-free slice with linear interpolation between
/// closest ranks (numpy's default). `None` for an empty slice.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Percentile of the finite values yielded by `values`
pub fn nan_percentile<I: IntoIterator<Item = f64>>(values: I, q: f64) -> Option<f64> {
    let mut v: Vec<f64> = values.into_iter().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    percentile_sorted(&v, q)
}

/// Distribution of one year's finite cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearStatistics {
    pub year: i32,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation
    pub std: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub valid_pixels: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

/// Per-year and across-years statistics of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalStatistics {
    /// Stack order (most recent first); years without finite cells omitted
    pub yearly: Vec<YearStatistics>,
    /// Mean of the yearly means
    pub mean: f64,
    /// Lowest yearly mean
    pub min: f64,
    /// Highest yearly mean
    pub max: f64,
    pub trend: Trend,
    pub years_analyzed: usize,
}

fn year_statistics(year: i32, grid: &Raster<f64>, fill_value: Option<f64>) -> Option<YearStatistics> {
    let mut values: Vec<f64> = grid
        .iter()
        .copied()
        .filter(|v| v.is_finite() && Some(*v) != fill_value)
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Some(YearStatistics {
        year,
        mean,
        min: values[0],
        max: values[values.len() - 1],
        std: var.sqrt(),
        p25: percentile_sorted(&values, 25.0)?,
        median: percentile_sorted(&values, 50.0)?,
        p75: percentile_sorted(&values, 75.0)?,
        valid_pixels: values.len(),
    })
}

/// Statistics of every year of `stack`, ignoring NaN and cells equal to
/// `fill_value` (the outside-field fill).
///
/// `None` when no year has a single usable cell.
pub fn temporal_statistics(stack: &RasterStack, fill_value: Option<f64>) -> Option<TemporalStatistics> {
    let yearly: Vec<YearStatistics> = stack
        .years()
        .iter()
        .filter_map(|y| year_statistics(y.year(), y.grid(), fill_value))
        .collect();

    let latest = yearly.first()?;
    let oldest = yearly.last()?;
    let means: Vec<f64> = yearly.iter().map(|y| y.mean).collect();

    let change = latest.mean - oldest.mean;
    let trend = if yearly.len() < 2 || change.abs() <= STABLE_BAND * oldest.mean.abs() {
        Trend::Stable
    } else if change > 0.0 {
        Trend::Improving
    } else {
        Trend::Declining
    };

    Some(TemporalStatistics {
        mean: means.iter().sum::<f64>() / means.len() as f64,
        min: means.iter().copied().fold(f64::INFINITY, f64::min),
        max: means.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        trend,
        years_analyzed: yearly.len(),
        yearly,
    })
}
