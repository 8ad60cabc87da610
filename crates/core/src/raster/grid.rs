//! Main Raster type

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::{s, Array2, ArrayView2};

/// A georeferenced 2D raster grid.
///
/// Cells are stored row-major; [`Raster::flat_index`] and
/// [`Raster::position`] convert between `(row, col)` and the flat index the
/// rest of the pipeline uses to address pixels.
///
/// # Example
///
/// ```ignore
/// use fieldprod_core::Raster;
///
/// let mut raster: Raster<f64> = Raster::new(4, 4);
/// raster.set(1, 2, 0.42)?;
/// assert_eq!(raster.get_flat(raster.flat_index(1, 2))?, 0.42);
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
    transform: GeoTransform,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            nodata: None,
        }
    }

    /// Same georeferencing, new data type, zero-filled
    pub fn with_same_meta<U: RasterElement>(&self) -> Raster<U> {
        Raster {
            data: Array2::zeros(self.data.dim()),
            transform: self.transform,
            nodata: None,
        }
    }

    // Dimensions

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major flat index of (row, col)
    pub fn flat_index(&self, row: usize, col: usize) -> usize {
        row * self.cols() + col
    }

    /// (row, col) of a row-major flat index
    pub fn position(&self, flat: usize) -> (usize, usize) {
        (flat / self.cols(), flat % self.cols())
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Get value at a row-major flat index
    pub fn get_flat(&self, flat: usize) -> Result<T> {
        if self.cols() == 0 {
            return Err(Error::IndexOutOfBounds {
                row: 0,
                col: flat,
                rows: self.rows(),
                cols: 0,
            });
        }
        let (row, col) = self.position(flat);
        self.get(row, col)
    }

    /// Get value at (row, col) without bounds checking
    ///
    /// # Safety
    /// Caller must ensure row < self.rows() and col < self.cols()
    pub unsafe fn get_unchecked(&self, row: usize, col: usize) -> T {
        unsafe { *self.data.uget((row, col)) }
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        if row >= self.rows() || col >= self.cols() {
            return Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        self.data[(row, col)] = value;
        Ok(())
    }

    /// Iterate cell values in row-major order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    /// Copy out a `rows` x `cols` window starting at (row0, col0).
    pub fn window(&self, row0: usize, col0: usize, rows: usize, cols: usize) -> Result<Self> {
        if row0 + rows > self.rows() || col0 + cols > self.cols() {
            return Err(Error::IndexOutOfBounds {
                row: row0 + rows,
                col: col0 + cols,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        Ok(Self {
            data: self
                .data
                .slice(s![row0..row0 + rows, col0..col0 + cols])
                .to_owned(),
            transform: self.transform.shifted(row0, col0),
            nodata: self.nodata,
        })
    }

    // Metadata

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Ground area of one cell in map units squared
    pub fn pixel_area(&self) -> f64 {
        self.transform.pixel_area()
    }

    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Min, max, mean and valid count over cells that are not no-data
    pub fn statistics(&self) -> RasterStatistics<T> {
        let mut min: Option<T> = None;
        let mut max: Option<T> = None;
        let mut sum = 0.0_f64;
        let mut count = 0usize;

        for &value in self.data.iter().filter(|v| !self.is_nodata(**v)) {
            if min.map_or(true, |m| value < m) {
                min = Some(value);
            }
            if max.map_or(true, |m| value > m) {
                max = Some(value);
            }
            if let Some(v) = value.to_f64() {
                sum += v;
                count += 1;
            }
        }

        RasterStatistics {
            min,
            max,
            mean: (count > 0).then(|| sum / count as f64),
            valid_count: count,
            nodata_count: self.len() - count,
        }
    }
}

/// Basic statistics for a raster
#[derive(Debug, Clone)]
pub struct RasterStatistics<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f64> = Raster::new(10, 20);
        assert_eq!(raster.rows(), 10);
        assert_eq!(raster.cols(), 20);
        assert_eq!(raster.shape(), (10, 20));
    }

    #[test]
    fn test_flat_index_roundtrip() {
        let raster: Raster<u8> = Raster::new(3, 5);
        assert_eq!(raster.flat_index(2, 4), 14);
        assert_eq!(raster.position(14), (2, 4));
        assert_eq!(raster.position(5), (1, 0));
    }

    #[test]
    fn test_get_flat_is_row_major() {
        let raster = Raster::from_vec((0..6).map(f64::from).collect(), 2, 3).unwrap();
        assert_eq!(raster.get_flat(4).unwrap(), 4.0);
        assert_eq!(raster.get(1, 1).unwrap(), 4.0);
        assert!(raster.get_flat(6).is_err());
    }

    #[test]
    fn test_window() {
        let raster = Raster::from_vec((0..16).map(f64::from).collect(), 4, 4).unwrap();
        let w = raster.window(1, 1, 2, 3).unwrap();
        assert_eq!(w.shape(), (2, 3));
        assert_eq!(w.get(0, 0).unwrap(), 5.0);
        assert_eq!(w.get(1, 2).unwrap(), 11.0);
        assert!(raster.window(3, 3, 2, 2).is_err());
    }

    #[test]
    fn test_raster_statistics_skip_nan() {
        let mut raster: Raster<f64> = Raster::filled(2, 2, 0.5);
        raster.set(0, 0, f64::NAN).unwrap();
        raster.set(1, 1, 0.9).unwrap();

        let stats = raster.statistics();
        assert_eq!(stats.min, Some(0.5));
        assert_eq!(stats.max, Some(0.9));
        assert_eq!(stats.valid_count, 3);
        assert_eq!(stats.nodata_count, 1);
    }
}
