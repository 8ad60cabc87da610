//! # fieldprod Algorithms
//!
//! Productivity zoning for agricultural fields from multi-year satellite
//! vegetation indices.
//!
//! ## Stages
//!
//! - **acquisition**: lowest-cloud scene per growing season, index stack
//! - **imagery**: NDVI, reflectance scaling, QA cloud masking
//! - **temporal**: background and Tukey outlier removal, stack statistics
//! - **classification**: affinity propagation, threshold, productivity classes
//! - **pipeline**: the stages wired together behind one configuration

pub mod acquisition;
pub mod classification;
pub mod imagery;
pub(crate) mod maybe_rayon;
pub mod pipeline;
pub mod temporal;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::acquisition::{
        acquire_years, find_best_image, growth_season_date, AcquisitionConfig,
        AcquisitionReport, ImageMatch, SearchParams,
    };
    pub use crate::classification::{
        affinity_propagation, classify, AffinityClusterer, AffinityParams, Classification,
        ClassificationSummary, ClassifyParams, ClusterEngine, ClusterOutcome,
        InMemoryLabelCache, MemoizedClusterer, StandardScaler, NO_CLASS,
    };
    pub use crate::imagery::{apply_scale_offset, ndvi, qa_cloud_mask};
    pub use crate::pipeline::{
        analyze_field, analyze_stack, AnalysisConfig, AnalysisReport, FieldAnalysis,
    };
    pub use crate::temporal::{
        preprocess, temporal_statistics, ExclusionKind, OutlierMode, PreprocessParams,
        PreprocessedStack,
    };
    pub use fieldprod_core::prelude::*;
}
