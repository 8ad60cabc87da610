//! Multi-year index stacks

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::Raster;

/// Acquisition metadata for one year of the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearMeta {
    pub year: i32,
    /// Seasonal date the search was centred on
    pub target_date: Option<NaiveDate>,
    /// Date of the scene actually used
    pub actual_date: Option<NaiveDate>,
    /// Scene cloud cover in percent
    pub cloud_cover: Option<f64>,
    pub scene_id: Option<String>,
}

impl YearMeta {
    /// Metadata for a grid that did not come out of an archive search
    /// (e.g. a local GeoTIFF).
    pub fn local(year: i32) -> Self {
        Self {
            year,
            target_date: None,
            actual_date: None,
            cloud_cover: None,
            scene_id: None,
        }
    }

    pub fn acquired(
        year: i32,
        target_date: NaiveDate,
        actual_date: NaiveDate,
        cloud_cover: f64,
        scene_id: impl Into<String>,
    ) -> Self {
        Self {
            year,
            target_date: Some(target_date),
            actual_date: Some(actual_date),
            cloud_cover: Some(cloud_cover),
            scene_id: Some(scene_id.into()),
        }
    }

    /// Absolute days between target and actual scene date
    pub fn date_difference(&self) -> Option<i64> {
        match (self.target_date, self.actual_date) {
            (Some(t), Some(a)) => Some((a - t).num_days().abs()),
            _ => None,
        }
    }
}

/// One year's index grid. Immutable once acquired.
#[derive(Debug, Clone)]
pub struct RasterYear {
    meta: YearMeta,
    grid: Raster<f64>,
}

impl RasterYear {
    pub fn new(meta: YearMeta, grid: Raster<f64>) -> Self {
        Self { meta, grid }
    }

    pub fn meta(&self) -> &YearMeta {
        &self.meta
    }

    pub fn grid(&self) -> &Raster<f64> {
        &self.grid
    }

    pub fn year(&self) -> i32 {
        self.meta.year
    }
}

/// Ordered list of yearly grids sharing one shape.
///
/// Years are kept **most-recent-first**: index 0 is the latest acquisition
/// and is the year background detection runs on.
#[derive(Debug, Clone)]
pub struct RasterStack {
    years: Vec<RasterYear>,
}

impl RasterStack {
    /// Build a stack, rejecting empty input and shape mismatches.
    pub fn new(years: Vec<RasterYear>) -> Result<Self> {
        let first = years.first().ok_or(Error::EmptyStack)?;
        let (er, ec) = first.grid.shape();
        for y in &years[1..] {
            let (ar, ac) = y.grid.shape();
            if (ar, ac) != (er, ec) {
                return Err(Error::SizeMismatch { er, ec, ar, ac });
            }
        }
        Ok(Self { years })
    }

    /// Build a stack from grids that may differ by a row or column at the
    /// edge, cropping every grid to the common top-left window.
    pub fn cropped_to_common(years: Vec<RasterYear>) -> Result<Self> {
        if years.is_empty() {
            return Err(Error::EmptyStack);
        }
        let rows = years.iter().map(|y| y.grid.rows()).min().unwrap_or(0);
        let cols = years.iter().map(|y| y.grid.cols()).min().unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let cropped = years
            .into_iter()
            .map(|y| {
                if y.grid.shape() == (rows, cols) {
                    Ok(y)
                } else {
                    let grid = y.grid.window(0, 0, rows, cols)?;
                    Ok(RasterYear::new(y.meta, grid))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(cropped)
    }

    /// Number of years (N)
    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// Shared grid shape (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.years[0].grid.shape()
    }

    /// Cells per grid
    pub fn cell_count(&self) -> usize {
        let (rows, cols) = self.shape();
        rows * cols
    }

    pub fn years(&self) -> &[RasterYear] {
        &self.years
    }

    pub fn grid(&self, year_idx: usize) -> Option<&Raster<f64>> {
        self.years.get(year_idx).map(|y| &y.grid)
    }

    /// The most recent year
    pub fn latest(&self) -> &RasterYear {
        &self.years[0]
    }

    /// N-length value vector of the cell at a row-major flat index,
    /// in stack order.
    pub fn pixel_vector(&self, flat: usize) -> Vec<f64> {
        let cols = self.shape().1;
        let (row, col) = (flat / cols, flat % cols);
        self.years
            .iter()
            .map(|y| y.grid.data()[(row, col)])
            .collect()
    }

    pub fn metadata(&self) -> Vec<YearMeta> {
        self.years.iter().map(|y| y.meta.clone()).collect()
    }
}
