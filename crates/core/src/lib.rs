//! # fieldprod Core
//!
//! Core types, traits and I/O for the fieldprod productivity-zoning workspace.
//!
//! This crate provides:
//! - `Raster<T>`: Generic raster grid type
//! - `RasterYear` / `RasterStack`: one index grid per acquisition year, aligned
//! - `FieldBoundary`: the polygon ring a field analysis is run over
//! - `ImageSource`: the seam between the pipeline and a satellite archive
//! - Algorithm traits for consistent API
//! - GeoTIFF I/O

pub mod error;
pub mod geometry;
pub mod io;
pub mod raster;
pub mod source;

pub use error::{Error, Result};
pub use geometry::{BBox, FieldBoundary};
pub use raster::{GeoTransform, Raster, RasterElement, RasterStack, RasterYear, YearMeta};
pub use source::{DateRange, FetchedScene, ImageSource, SceneInfo};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::geometry::{BBox, FieldBoundary};
    pub use crate::raster::{GeoTransform, Raster, RasterElement, RasterStack, RasterYear, YearMeta};
    pub use crate::source::{DateRange, FetchedScene, ImageSource, SceneInfo};
    pub use crate::Algorithm;
}

/// Core trait for the pipeline stages.
///
/// Stages are pure functions that transform input data according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
