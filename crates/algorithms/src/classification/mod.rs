//! Productivity clustering and classification
//!
//! - **scaler**: per-column z-score
//! - **affinity**: affinity propagation (exemplar clustering)
//! - **cluster**: the clustering engine and the cluster-mean threshold
//! - **memo**: cache-backed engine decorator
//! - **productivity**: years-above-threshold classes, map and score
//! - **zones**: per-cluster profiles and the rule-based baseline

mod affinity;
mod cluster;
mod memo;
mod productivity;
mod scaler;
mod zones;

pub use affinity::{affinity_propagation, similarity_matrix, AffinityParams, AffinityResult};
pub use cluster::{
    cluster_threshold, rank_by_mean, AffinityClusterer, Cluster, ClusterEngine, ClusterOutcome,
};
pub use memo::{
    cache_key, DirectoryLabelCache, InMemoryLabelCache, LabelCache, MemoizedClusterer,
};
pub use productivity::{
    class_weights, classify, high_low_map, pixel_class, pixel_high_low_map, profitability_score,
    ClassSummary, Classification, ClassificationSummary, Classify, ClassifyParams, NO_CLASS,
};
pub use scaler::StandardScaler;
pub use zones::{
    cluster_class_map, cluster_profiles, rule_based_threshold, rule_based_zoning, ClusterProfile,
    ClusterYear, RuleBasedZoning,
};
