//! Quality-band masking
//!
//! Landsat Collection 2 carries a `QA_PIXEL` bit field per pixel. Bit 3 flags
//! cloud and bit 4 cloud shadow; a pixel is usable only when both are clear.

use fieldprod_core::raster::Raster;
use fieldprod_core::{Error, Result};

/// QA_PIXEL cloud bit
pub const QA_CLOUD_BIT: u32 = 3;
/// QA_PIXEL cloud-shadow bit
pub const QA_SHADOW_BIT: u32 = 4;

/// Usable-pixel mask from a QA_PIXEL band: 1 = clear, 0 = cloud/shadow or
/// no-data.
pub fn qa_cloud_mask(qa: &Raster<f64>) -> Raster<u8> {
    let flags = (1u32 << QA_CLOUD_BIT) | (1u32 << QA_SHADOW_BIT);
    let nodata = qa.nodata();

    let mut mask = qa.with_same_meta::<u8>();
    mask.data_mut().zip_mut_with(qa.data(), |m, &v| {
        let usable = v.is_finite() && nodata.map_or(true, |nd| v != nd) && v >= 0.0;
        *m = u8::from(usable && (v as u32) & flags == 0);
    });
    mask
}

/// Set every cell where `mask == 0` to `fill`.
pub fn apply_mask(grid: &mut Raster<f64>, mask: &Raster<u8>, fill: f64) -> Result<()> {
    let (er, ec) = grid.shape();
    let (ar, ac) = mask.shape();
    if (er, ec) != (ar, ac) {
        return Err(Error::SizeMismatch { er, ec, ar, ac });
    }
    grid.data_mut().zip_mut_with(mask.data(), |v, &m| {
        if m == 0 {
            *v = fill;
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qa_bits() {
        // clear (land), cloud, shadow, 0b1010 (dilated + cloud)
        let qa = Raster::from_vec(vec![21824.0, 22280.0, 23888.0, 10.0], 2, 2).unwrap();
        let mask = qa_cloud_mask(&qa);
        assert_eq!(mask.get(0, 0).unwrap(), 1);
        assert_eq!(mask.get(0, 1).unwrap(), 0, "bit 3 set");
        assert_eq!(mask.get(1, 0).unwrap(), 0, "bit 4 set");
        assert_eq!(mask.get(1, 1).unwrap(), 0);
    }

    #[test]
    fn test_qa_nodata_is_masked() {
        let mut qa = Raster::from_vec(vec![1.0, 21824.0], 1, 2).unwrap();
        qa.set_nodata(Some(1.0));
        let mask = qa_cloud_mask(&qa);
        assert_eq!(mask.get(0, 0).unwrap(), 0);
        assert_eq!(mask.get(0, 1).unwrap(), 1);
    }

    #[test]
    fn test_apply_mask() {
        let mut grid = Raster::filled(2, 2, 0.6);
        let mask = Raster::from_vec(vec![1u8, 0, 1, 0], 2, 2).unwrap();
        apply_mask(&mut grid, &mask, f64::NAN).unwrap();
        assert_eq!(grid.get(0, 0).unwrap(), 0.6);
        assert!(grid.get(0, 1).unwrap().is_nan());
        assert!(grid.get(1, 1).unwrap().is_nan());

        apply_mask(&mut grid, &mask, -1.0).unwrap();
        assert_eq!(grid.get(1, 1).unwrap(), -1.0);
    }
}
