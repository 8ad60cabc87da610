//! End-to-end field analysis
//!
//! Acquisition -> preprocessing -> clustering -> classification, driven by
//! one [`AnalysisConfig`]. Each stage is also usable on its own; this module
//! only wires them together and collects a serializable report.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use fieldprod_core::{Error, FieldBoundary, ImageSource, Raster, RasterStack, Result, YearMeta};

use crate::acquisition::{acquire_years, AcquisitionConfig, AcquisitionReport, SkippedYear};
use crate::classification::{
    classify, cluster_class_map, cluster_profiles, high_low_map, rule_based_zoning,
    AffinityClusterer, AffinityParams, ClassificationSummary, ClassifyParams, ClusterEngine,
    ClusterProfile, DirectoryLabelCache, InMemoryLabelCache, MemoizedClusterer,
};
use crate::temporal::{
    preprocess, temporal_statistics, ExclusionKind, PreprocessParams, TemporalStatistics,
    TukeyFence,
};

/// Clustering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub damping: f64,
    pub preference: f64,
    pub max_iterations: usize,
    pub convergence_iter: usize,
    pub tolerance: f64,
    /// Persist outcomes as JSON files here; in-memory cache when unset
    pub cache_dir: Option<PathBuf>,
    /// In-memory cache size; 0 disables memoization
    pub cache_capacity: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        let ap = AffinityParams::default();
        Self {
            damping: ap.damping,
            preference: ap.preference,
            max_iterations: ap.max_iterations,
            convergence_iter: ap.convergence_iter,
            tolerance: ap.tolerance,
            cache_dir: None,
            cache_capacity: 16,
        }
    }
}

impl ClusteringConfig {
    pub fn affinity_params(&self) -> AffinityParams {
        AffinityParams {
            damping: self.damping,
            preference: self.preference,
            max_iterations: self.max_iterations,
            convergence_iter: self.convergence_iter,
            tolerance: self.tolerance,
        }
    }

    /// The engine this configuration describes, wrapped in the configured
    /// cache.
    pub fn build_engine(&self) -> Result<Box<dyn ClusterEngine>> {
        let params = self.affinity_params();
        params.validate()?;
        let engine = AffinityClusterer::new(params);

        Ok(match (&self.cache_dir, self.cache_capacity) {
            (Some(dir), _) => Box::new(MemoizedClusterer::new(engine, DirectoryLabelCache::new(dir)?)),
            (None, 0) => Box::new(engine),
            (None, capacity) => Box::new(MemoizedClusterer::new(
                engine,
                InMemoryLabelCache::new(capacity),
            )),
        })
    }
}

/// Every tunable of an analysis. All sections and fields are optional in
/// the TOML form.
///
/// ```toml
/// [acquisition]
/// years = 5
/// max_cloud_cover = 20.0
///
/// [preprocess]
/// outlier_mode = "both"
///
/// [clustering]
/// preference = -10.0
/// cache_dir = "/var/cache/fieldprod"
///
/// [classification]
/// include_excluded = false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub acquisition: AcquisitionConfig,
    pub preprocess: PreprocessParams,
    pub clustering: ClusteringConfig,
    pub classification: ClassifyParams,
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Other(format!("Invalid configuration: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Other(e.to_string()))
    }
}

/// Excluded pixel counts by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionCounts {
    pub background: usize,
    pub outliers: usize,
    pub missing: usize,
}

/// Serializable outcome of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Stack order, most recent first
    pub years: Vec<YearMeta>,
    pub skipped_years: Vec<SkippedYear>,
    pub warnings: Vec<String>,
    pub grid_shape: (usize, usize),
    pub fence: TukeyFence,
    pub exclusions: ExclusionCounts,
    pub clustering_iterations: usize,
    pub summary: ClassificationSummary,
    /// Ranked by mean, lowest first
    pub clusters: Vec<ClusterProfile>,
    /// Same classification without clustering, against the rounded mean of
    /// pixel means
    pub baseline: ClassificationSummary,
    pub statistics: Option<TemporalStatistics>,
}

/// Maps plus report
#[derive(Debug, Clone)]
pub struct FieldAnalysis {
    /// Classes 1..=N+1, 0 = unclassified
    pub class_map: Raster<u8>,
    /// Per cluster: 1 = cluster mean below threshold, 2 = at or above,
    /// 0 = unclassified
    pub high_low_map: Raster<u8>,
    /// Each pixel carries its cluster's class
    pub cluster_class_map: Raster<u8>,
    pub baseline_class_map: Raster<u8>,
    pub baseline_high_low_map: Raster<u8>,
    pub report: AnalysisReport,
}

/// Run preprocessing, clustering and classification on a ready stack, plus
/// the rule-based baseline over the same pixels.
pub fn analyze_stack<E>(stack: &RasterStack, engine: &E, config: &AnalysisConfig) -> Result<FieldAnalysis>
where
    E: ClusterEngine + ?Sized,
{
    let pre = preprocess(stack, &config.preprocess)?;
    let outcome = engine.cluster(&pre.pixel_matrix)?;

    let mut warnings = Vec::new();
    if !outcome.converged {
        let msg = format!(
            "Clustering degraded: stopped at the {}-iteration cap without converging",
            outcome.iterations
        );
        warn!("{msg}");
        warnings.push(msg);
    }

    let classification = classify(&pre, &outcome, &config.classification)?;
    let high_low = high_low_map(&pre, &outcome, &config.classification)?;
    let clusters = cluster_profiles(&pre, &outcome)?;
    let cluster_classes = cluster_class_map(&pre, &outcome, &clusters, &config.classification)?;
    let baseline = rule_based_zoning(&pre, &config.classification)?;
    let statistics = temporal_statistics(stack, Some(config.acquisition.fill_value));

    let report = AnalysisReport {
        years: stack.metadata(),
        skipped_years: Vec::new(),
        warnings,
        grid_shape: pre.grid_shape,
        fence: pre.fence,
        exclusions: ExclusionCounts {
            background: pre.exclusions.count(ExclusionKind::Background),
            outliers: pre.exclusions.count(ExclusionKind::StatisticalOutlier),
            missing: pre.exclusions.count(ExclusionKind::Missing),
        },
        clustering_iterations: outcome.iterations,
        summary: classification.summary,
        clusters,
        baseline: baseline.classification.summary,
        statistics,
    };

    Ok(FieldAnalysis {
        class_map: classification.map,
        high_low_map: high_low,
        cluster_class_map: cluster_classes,
        baseline_class_map: baseline.classification.map,
        baseline_high_low_map: baseline.high_low_map,
        report,
    })
}

/// Acquire a stack from `source` and analyse it.
pub fn analyze_field<S, E>(
    source: &S,
    field: &FieldBoundary,
    engine: &E,
    config: &AnalysisConfig,
    base_date: NaiveDate,
) -> Result<(AcquisitionReport, FieldAnalysis)>
where
    S: ImageSource + ?Sized,
    E: ClusterEngine + ?Sized,
{
    let acquisition = acquire_years(source, field, &config.acquisition, base_date)?;
    let mut analysis = analyze_stack(&acquisition.stack, engine, config)?;

    analysis.report.skipped_years = acquisition.skipped.clone();
    let mut warnings = acquisition.warnings.clone();
    warnings.append(&mut analysis.report.warnings);
    analysis.report.warnings = warnings;

    info!(
        "Field analysed over {} years: score {}",
        acquisition.stack.len(),
        analysis.report.summary.profitability_score
    );
    Ok((acquisition, analysis))
}
