//! Error types for fieldprod

use chrono::NaiveDate;
use thiserror::Error;

/// Main error type for fieldprod operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Raster stack has no years")]
    EmptyStack,

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid field geometry: {0}")]
    InvalidGeometry(String),

    #[error(
        "No image within ±{max_search_days} days of {target_date} with <{max_cloud_cover}% cloud cover"
    )]
    ImageNotFound {
        target_date: NaiveDate,
        max_search_days: u32,
        max_cloud_cover: f64,
    },

    #[error("No imagery acquired for any of the {requested} requested years")]
    NoYearsAcquired { requested: usize },

    #[error("Only {acquired} years acquired, at least {required} required")]
    InsufficientYears { acquired: usize, required: usize },

    #[error("No valid pixels left after background and outlier removal")]
    NoValidPixels,

    #[error("Image source error: {0}")]
    Source(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for fieldprod operations
pub type Result<T> = std::result::Result<T, Error>;
