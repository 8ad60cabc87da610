//! Imagery preprocessing for archive scenes
//!
//! - Normalized difference / NDVI from two reflectance bands
//! - Linear DN to reflectance scaling
//! - QA_PIXEL cloud and shadow masking

mod indices;
mod qa_mask;

pub use indices::{apply_scale_offset, ndvi, normalized_difference};
pub use qa_mask::{apply_mask, qa_cloud_mask, QA_CLOUD_BIT, QA_SHADOW_BIT};
