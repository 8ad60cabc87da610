//! Affine geotransformation for rasters

use serde::{Deserialize, Serialize};

use crate::geometry::BBox;

/// North-up affine transform mapping pixel (col, row) to map (x, y).
///
/// ```text
/// x = origin_x + col * pixel_width
/// y = origin_y + row * pixel_height
/// ```
///
/// `pixel_height` is negative for north-up rasters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Map coordinates of the pixel center
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional pixel coordinates (col, row) of a map point
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        if self.pixel_width.abs() < 1e-12 || self.pixel_height.abs() < 1e-12 {
            return (f64::NAN, f64::NAN);
        }
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    /// Ground area of one cell in map units squared
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }

    /// Pixel window `(row0, col0, rows, cols)` covering `bbox`, clamped to a
    /// raster of `width` x `height`. `None` when the bbox misses the raster.
    pub fn window_for_bbox(
        &self,
        bbox: &BBox,
        width: usize,
        height: usize,
    ) -> Option<(usize, usize, usize, usize)> {
        let (c0, r0) = self.geo_to_pixel(bbox.min_x, bbox.max_y);
        let (c1, r1) = self.geo_to_pixel(bbox.max_x, bbox.min_y);
        if !(c0.is_finite() && c1.is_finite() && r0.is_finite() && r1.is_finite()) {
            return None;
        }

        let col_start = c0.min(c1).floor().max(0.0) as usize;
        let row_start = r0.min(r1).floor().max(0.0) as usize;
        let col_end = (c0.max(c1).ceil().max(0.0) as usize).min(width);
        let row_end = (r0.max(r1).ceil().max(0.0) as usize).min(height);

        if col_start >= col_end || row_start >= row_end {
            return None;
        }
        Some((row_start, col_start, row_end - row_start, col_end - col_start))
    }

    /// Transform for a sub-window starting at (row0, col0)
    pub fn shifted(&self, row0: usize, col0: usize) -> Self {
        Self {
            origin_x: self.origin_x + col0 as f64 * self.pixel_width,
            origin_y: self.origin_y + row0 as f64 * self.pixel_height,
            ..*self
        }
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_to_geo_roundtrip() {
        let gt = GeoTransform::new(100.0, 200.0, 10.0, -10.0);

        let (x, y) = gt.pixel_to_geo(5, 10);
        let (col, row) = gt.geo_to_pixel(x, y);

        assert_relative_eq!(col, 5.5, epsilon = 1e-10);
        assert_relative_eq!(row, 10.5, epsilon = 1e-10);
    }

    #[test]
    fn test_window_for_bbox() {
        // 30 m Landsat-like grid
        let gt = GeoTransform::new(500_000.0, 1_800_000.0, 30.0, -30.0);
        let bbox = BBox::new(500_300.0, 1_799_400.0, 500_600.0, 1_799_700.0);
        let (row0, col0, rows, cols) = gt.window_for_bbox(&bbox, 1000, 1000).unwrap();

        assert_eq!((row0, col0), (10, 10));
        assert_eq!((rows, cols), (10, 10));
        assert_relative_eq!(gt.pixel_area(), 900.0);
    }

    #[test]
    fn test_window_outside() {
        let gt = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let bbox = BBox::new(200.0, 200.0, 300.0, 300.0);
        assert!(gt.window_for_bbox(&bbox, 100, 100).is_none());
    }
}
