//! Class map to RGBA and PNG.

use std::io::Cursor;

use image::{ImageFormat, RgbaImage};

use fieldprod_core::{Error, Raster, Result};

use crate::palette::Palette;

/// Row-major RGBA buffer, `rows * cols * 4` bytes. Class 0 is transparent.
pub fn classes_to_rgba(map: &Raster<u8>, palette: &Palette) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(map.len() * 4);
    for &class in map.iter() {
        match palette.class_color(class) {
            Some(c) => rgba.extend_from_slice(&[c.r, c.g, c.b, 255]),
            None => rgba.extend_from_slice(&[0, 0, 0, 0]),
        }
    }
    rgba
}

/// PNG bytes of the class map, one image pixel per cell.
pub fn render_png(map: &Raster<u8>, palette: &Palette) -> Result<Vec<u8>> {
    let (rows, cols) = map.shape();
    let (width, height) = (
        u32::try_from(cols).map_err(|_| Error::InvalidDimensions { width: cols, height: rows })?,
        u32::try_from(rows).map_err(|_| Error::InvalidDimensions { width: cols, height: rows })?,
    );
    let img = RgbaImage::from_raw(width, height, classes_to_rgba(map, palette))
        .ok_or(Error::InvalidDimensions { width: cols, height: rows })?;

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::Other(format!("PNG encoding failed: {e}")))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_map() -> Raster<u8> {
        Raster::from_vec(vec![0, 1, 6, 7], 2, 2).unwrap()
    }

    #[test]
    fn test_rgba_layout() {
        let rgba = classes_to_rgba(&class_map(), &Palette::default());
        assert_eq!(rgba.len(), 16);
        assert_eq!(&rgba[0..4], &[0, 0, 0, 0], "unclassified is transparent");
        assert_eq!(&rgba[4..8], &[0xC1, 0x29, 0x2E, 255]);
        assert_eq!(&rgba[8..12], &[0x89, 0xFC, 0x00, 255]);
        assert_eq!(&rgba[12..16], &rgba[8..12], "class 7 reuses the last colour");
    }

    #[test]
    fn test_png_decodes_back() {
        let png = render_png(&class_map(), &Palette::default()).unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let img = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .unwrap()
            .to_rgba8();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(0, 1).0, [0x89, 0xFC, 0x00, 255]);
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_deterministic() {
        let a = render_png(&class_map(), &Palette::default()).unwrap();
        let b = render_png(&class_map(), &Palette::default()).unwrap();
        assert_eq!(a, b);
    }
}
