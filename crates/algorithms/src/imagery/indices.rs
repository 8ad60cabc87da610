//! Normalized-difference vegetation indices
//!
//! All indices operate on single-band rasters (one band per raster) that
//! share a shape. Cells where either band is no-data, or where the bands
//! sum to zero, come out as NaN.

use crate::maybe_rayon::*;
use fieldprod_core::raster::Raster;
use fieldprod_core::{Error, Result};
use ndarray::Array2;

/// Compute the normalized difference between two bands:
///
/// `(band_a - band_b) / (band_a + band_b)`
///
/// Result is in the range [-1, 1].
pub fn normalized_difference(band_a: &Raster<f64>, band_b: &Raster<f64>) -> Result<Raster<f64>> {
    check_dimensions(band_a, band_b)?;

    let (rows, cols) = band_a.shape();
    let nodata_a = band_a.nodata();
    let nodata_b = band_b.nodata();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let a = unsafe { band_a.get_unchecked(row, col) };
                let b = unsafe { band_b.get_unchecked(row, col) };

                if is_nodata_f64(a, nodata_a) || is_nodata_f64(b, nodata_b) {
                    continue;
                }

                let sum = a + b;
                if sum.abs() < 1e-10 {
                    continue;
                }
                *out = (a - b) / sum;
            }
            row_data
        })
        .collect();

    build_output(band_a, rows, cols, data)
}

/// Normalized Difference Vegetation Index
///
/// `NDVI = (NIR - Red) / (NIR + Red)`
///
/// Values range from -1 to 1:
/// - Dense vegetation: 0.6 to 0.9
/// - Sparse vegetation: 0.2 to 0.5
/// - Bare soil: 0.1 to 0.2
/// - Water/clouds: -1.0 to 0.0
pub fn ndvi(nir: &Raster<f64>, red: &Raster<f64>) -> Result<Raster<f64>> {
    normalized_difference(nir, red)
}

/// Convert raw digital numbers to reflectance: `dn * scale + offset`.
///
/// Landsat Collection 2 Level-2 surface reflectance publishes
/// `scale = 2.75e-5`, `offset = -0.2`. Zero DN is the archive's fill and
/// becomes NaN.
pub fn apply_scale_offset(band: &Raster<f64>, scale: f64, offset: f64) -> Raster<f64> {
    let nodata = band.nodata();
    let mut out = band.clone();
    out.data_mut().mapv_inplace(|dn| {
        if is_nodata_f64(dn, nodata) || dn == 0.0 {
            f64::NAN
        } else {
            dn * scale + offset
        }
    });
    out.set_nodata(Some(f64::NAN));
    out
}

fn is_nodata_f64(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) => (value - nd).abs() < f64::EPSILON,
        None => false,
    }
}

fn check_dimensions(a: &Raster<f64>, b: &Raster<f64>) -> Result<()> {
    let (er, ec) = a.shape();
    let (ar, ac) = b.shape();
    if (er, ec) != (ar, ac) {
        return Err(Error::SizeMismatch { er, ec, ar, ac });
    }
    Ok(())
}

fn build_output(template: &Raster<f64>, rows: usize, cols: usize, data: Vec<f64>) -> Result<Raster<f64>> {
    let mut output = template.with_same_meta::<f64>();
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fieldprod_core::GeoTransform;

    fn band(values: Vec<f64>) -> Raster<f64> {
        let mut r = Raster::from_vec(values, 2, 2).unwrap();
        r.set_transform(GeoTransform::new(0.0, 60.0, 30.0, -30.0));
        r
    }

    #[test]
    fn test_ndvi_values() {
        let nir = band(vec![0.5, 0.4, 0.3, 0.0]);
        let red = band(vec![0.1, 0.4, 0.1, 0.0]);
        let result = ndvi(&nir, &red).unwrap();

        assert_relative_eq!(result.get(0, 0).unwrap(), 0.4 / 0.6, epsilon = 1e-12);
        assert_relative_eq!(result.get(0, 1).unwrap(), 0.0);
        assert_relative_eq!(result.get(1, 0).unwrap(), 0.5, epsilon = 1e-12);
        assert!(result.get(1, 1).unwrap().is_nan(), "zero sum should be NaN");
        assert_eq!(result.transform(), nir.transform());
    }

    #[test]
    fn test_nodata_propagates() {
        let mut nir = band(vec![0.5, 0.5, 0.5, 0.5]);
        nir.set_nodata(Some(-9999.0));
        nir.set(0, 1, -9999.0).unwrap();
        let red = band(vec![0.1, 0.1, f64::NAN, 0.1]);

        let result = normalized_difference(&nir, &red).unwrap();
        assert!(result.get(0, 1).unwrap().is_nan());
        assert!(result.get(1, 0).unwrap().is_nan());
        assert!(result.get(0, 0).unwrap().is_finite());
    }

    #[test]
    fn test_dimension_mismatch() {
        let a: Raster<f64> = Raster::new(2, 2);
        let b: Raster<f64> = Raster::new(2, 3);
        assert!(matches!(
            normalized_difference(&a, &b),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_scale_offset() {
        let dn = band(vec![0.0, 10000.0, 20000.0, 7273.0]);
        let refl = apply_scale_offset(&dn, 2.75e-5, -0.2);
        assert!(refl.get(0, 0).unwrap().is_nan(), "zero DN is fill");
        assert_relative_eq!(refl.get(0, 1).unwrap(), 0.075, epsilon = 1e-12);
        assert_relative_eq!(refl.get(1, 0).unwrap(), 0.35, epsilon = 1e-12);
    }
}
