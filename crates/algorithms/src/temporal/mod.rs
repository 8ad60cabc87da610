//! Multi-year stack processing
//!
//! - **preprocess**: background / outlier removal and the pixel matrix
//! - **statistics**: percentiles and per-year index summaries

mod preprocess;
mod statistics;

pub use preprocess::{
    preprocess, ExcludedPixel, ExclusionKind, ExclusionSet, OutlierMode, Preprocess,
    PreprocessParams, PreprocessedStack, TukeyFence,
};
pub use statistics::{
    nan_percentile, percentile_sorted, temporal_statistics, TemporalStatistics, Trend,
    YearStatistics,
};
