//! Error types for STAC access.

use thiserror::Error;

/// Errors produced while searching a catalog or fetching scene assets.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("asset signing failed: {0}")]
    Auth(String),

    #[error("malformed STAC response: {0}")]
    Stac(String),

    #[error("item {item} has no asset '{asset}'")]
    MissingAsset { item: String, asset: String },

    #[error("item {0} was not returned by a previous search")]
    UnknownItem(String),

    #[error("unsupported CRS EPSG:{0} (only WGS84 and UTM are handled)")]
    UnsupportedCrs(u32),

    #[error("field does not overlap asset {0}")]
    OutsideAsset(String),

    #[error("core error: {0}")]
    Core(#[from] fieldprod_core::Error),
}

/// Result alias for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;

impl From<CloudError> for fieldprod_core::Error {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Core(inner) => inner,
            other => fieldprod_core::Error::Source(other.to_string()),
        }
    }
}
