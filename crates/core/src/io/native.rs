//! Native GeoTIFF reading/writing on top of the `tiff` crate.
//!
//! Only the georeferencing the pipeline needs is handled: the
//! ModelPixelScale + ModelTiepoint pair, which every Landsat/Sentinel COG
//! and every local yearly index export carries.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{Gray32Float, Gray8};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

// Named variants: the decoder never reports these codes as `Tag::Unknown`
const MODEL_PIXEL_SCALE: Tag = Tag::ModelPixelScaleTag;
const MODEL_TIEPOINT: Tag = Tag::ModelTiepointTag;
const GEO_KEY_DIRECTORY: Tag = Tag::GeoKeyDirectoryTag;
const GDAL_NODATA: Tag = Tag::GdalNodata;

fn tiff_err(context: &str) -> impl Fn(tiff::TiffError) -> Error + '_ {
    move |e| Error::Other(format!("{context}: {e}"))
}

/// Read the first band of a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(BufReader::new(file))
}

/// Read the first band of an in-memory GeoTIFF into a Raster
pub fn read_geotiff_from_buffer<T: RasterElement>(data: &[u8]) -> Result<Raster<T>> {
    decode_geotiff(Cursor::new(data))
}

fn cast_all<S: Copy + num_traits::NumCast, T: RasterElement>(buf: Vec<S>) -> Vec<T> {
    buf.into_iter()
        .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    // Whole scenes are decoded in one go; lift the default buffer cap
    let mut decoder = Decoder::new(reader)
        .map_err(tiff_err("TIFF decode error"))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder
        .dimensions()
        .map_err(tiff_err("Cannot read dimensions"))?;
    let (rows, cols) = (height as usize, width as usize);

    let data: Vec<T> = match decoder
        .read_image()
        .map_err(tiff_err("Cannot read image data"))?
    {
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ))
        }
    };

    // Multi-sample images: keep the first sample of each pixel
    let data = if data.len() == rows * cols {
        data
    } else if rows * cols > 0 && data.len() % (rows * cols) == 0 {
        let samples = data.len() / (rows * cols);
        data.into_iter().step_by(samples).collect()
    } else {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    };

    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    if let Ok(nodata) = decoder.get_tag_ascii_string(GDAL_NODATA) {
        if let Ok(v) = nodata.trim_end_matches('\0').trim().parse::<f64>() {
            raster.set_nodata(Some(T::from_f64(v)));
        }
    }

    Ok(raster)
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(MODEL_PIXEL_SCALE).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(MODEL_TIEPOINT).ok()?;

    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    Some(GeoTransform::new(
        tiepoint[3] - tiepoint[0] * scale[0],
        tiepoint[4] + tiepoint[1] * scale[1],
        scale[0],
        -scale[1],
    ))
}

/// Write a Raster to a GeoTIFF file.
///
/// Float rasters are written as 32-bit float, integer rasters (class maps)
/// as 8-bit gray.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_geotiff(raster, file)
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T: RasterElement>(raster: &Raster<T>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

macro_rules! write_image {
    ($encoder:expr, $color:ty, $raster:expr, $data:expr) => {{
        let (rows, cols) = $raster.shape();
        let mut image = $encoder
            .new_image::<$color>(cols as u32, rows as u32)
            .map_err(tiff_err("Cannot create TIFF image"))?;

        let gt = $raster.transform();
        let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
        image
            .encoder()
            .write_tag(MODEL_PIXEL_SCALE, &scale[..])
            .map_err(tiff_err("Cannot write scale tag"))?;
        let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
        image
            .encoder()
            .write_tag(MODEL_TIEPOINT, &tiepoint[..])
            .map_err(tiff_err("Cannot write tiepoint tag"))?;
        // Version 1.1.0, GTModelType = projected, GTRasterType = pixel-is-area
        let geokeys: [u16; 12] = [1, 1, 0, 2, 1024, 0, 1, 1, 1025, 0, 1, 1];
        image
            .encoder()
            .write_tag(GEO_KEY_DIRECTORY, &geokeys[..])
            .map_err(tiff_err("Cannot write geokey tag"))?;
        if let Some(nd) = $raster.nodata().and_then(|v| v.to_f64()) {
            image
                .encoder()
                .write_tag(GDAL_NODATA, format!("{nd}").as_str())
                .map_err(tiff_err("Cannot write nodata tag"))?;
        }

        image
            .write_data(&$data)
            .map_err(tiff_err("Cannot write image data"))?;
    }};
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;

    if T::is_float() {
        let data: Vec<f32> = raster
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
            .collect();
        write_image!(encoder, Gray32Float, raster, data);
    } else {
        let data: Vec<u8> = raster
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(0u8))
            .collect();
        write_image!(encoder, Gray8, raster, data);
    }
    Ok(())
}
