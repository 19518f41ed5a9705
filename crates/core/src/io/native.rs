//! Native GeoTIFF reading/writing built on the `tiff` crate.
//!
//! Handles single-band imagery with the GeoTIFF tags the change-detection
//! pipeline needs: ModelPixelScale (33550), ModelTiepoint (33922), the
//! GeoKeyDirectory (34735) for the CRS, and GDAL_NODATA (42113).

use crate::crs::{parse_utm_epsg, CRS};
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Grid, GridElement};
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::compression::{Compression, Deflate, Lzw, Uncompressed};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

// GeoKey ids inside the directory
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

/// Compression scheme for written GeoTIFFs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TiffCompression {
    Uncompressed,
    #[default]
    Lzw,
    Deflate,
}

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    pub compression: TiffCompression,
}

/// Read a GeoTIFF file into a Grid
pub fn read_geotiff<T, P>(path: P) -> Result<Grid<T>>
where
    T: GridElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(file)
}

/// Read a GeoTIFF from an in-memory buffer into a Grid
///
/// Same as `read_geotiff` but operates on a byte slice instead of a file path.
pub fn read_geotiff_from_buffer<T>(data: &[u8]) -> Result<Grid<T>>
where
    T: GridElement,
{
    let cursor = Cursor::new(data);
    decode_geotiff(cursor)
}

/// Internal: decode a GeoTIFF from any `Read + Seek` source
fn decode_geotiff<T, R>(reader: R) -> Result<Grid<T>>
where
    T: GridElement,
    R: std::io::Read + std::io::Seek,
{
    let mut decoder =
        Decoder::new(reader).map_err(|e| Error::Format(format!("TIFF decode error: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Format(format!("cannot read dimensions: {}", e)))?;

    let rows = height as usize;
    let cols = width as usize;

    let result = decoder
        .read_image()
        .map_err(|e| Error::Format(format!("cannot read image data: {}", e)))?;

    let data: Vec<T> = match result {
        DecodingResult::F32(buf) => buf
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
            .collect(),
        DecodingResult::F64(buf) => buf
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
            .collect(),
        DecodingResult::U8(buf) => buf
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
            .collect(),
        DecodingResult::U16(buf) => buf
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
            .collect(),
        DecodingResult::U32(buf) => buf
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
            .collect(),
        DecodingResult::I8(buf) => buf
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
            .collect(),
        DecodingResult::I16(buf) => buf
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
            .collect(),
        DecodingResult::I32(buf) => buf
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
            .collect(),
        _ => {
            return Err(Error::Format("unsupported TIFF pixel format".to_string()));
        }
    };

    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut grid = Grid::from_vec(data, rows, cols)?;

    if let Ok(transform) = read_geotransform(&mut decoder) {
        grid.set_transform(transform);
    }
    if let Some(crs) = read_crs(&mut decoder) {
        grid.set_crs(Some(crs));
    }
    if let Some(nodata) = read_nodata(&mut decoder) {
        // Values the cell type cannot hold (e.g. NaN for u8) are skipped
        if let Some(nd) = num_traits::cast(nodata) {
            grid.set_nodata(Some(nd));
        } else if nodata.is_nan() && T::is_float() {
            grid.set_nodata(Some(T::default_nodata()));
        }
    }

    Ok(grid)
}

/// Attempt to read a GeoTransform from ModelPixelScale + ModelTiepoint
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| Error::Format("no pixel scale tag".into()))?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| Error::Format("no tiepoint tag".into()))?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z]
        // scale: [ScaleX, ScaleY, ScaleZ]
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        let pixel_width = scale[0];
        let pixel_height = -scale[1]; // Negative for north-up

        return Ok(GeoTransform::new(origin_x, origin_y, pixel_width, pixel_height));
    }

    Err(Error::Format("cannot determine geotransform".into()))
}

/// Extract the CRS from the GeoKeyDirectory, if present.
///
/// Directory layout: `[version, revision, minor, count, key entries...]`,
/// each entry `[key_id, tag_location, count, value_or_index]`. Only the
/// inline EPSG keys (ProjectedCSType, GeographicType) are consulted.
fn read_crs<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let dir = decoder
        .get_tag_u32_vec(Tag::GeoKeyDirectoryTag)
        .ok()?;
    if dir.len() < 4 {
        return None;
    }

    let num_keys = dir[3] as usize;
    for i in 0..num_keys {
        let base = 4 + i * 4;
        if base + 4 > dir.len() {
            break;
        }
        let key_id = dir[base] as u16;
        let location = dir[base + 1];
        let value_or_index = dir[base + 3];

        if location != 0 {
            continue; // value lives in another tag
        }
        match key_id {
            PROJECTED_CS_TYPE | GEOGRAPHIC_TYPE if value_or_index > 0 && value_or_index < 32767 => {
                return Some(CRS::from_epsg(value_or_index));
            }
            _ => {}
        }
    }

    None
}

/// Extract nodata from the GDAL_NODATA tag (ASCII)
fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let s = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()?;
    s.trim_end_matches('\0').trim().parse::<f64>().ok()
}

/// Write a Grid to a GeoTIFF file
///
/// Pixel values are stored as 32-bit float; the geotransform, CRS and
/// nodata sentinel are written alongside as GeoTIFF tags.
pub fn write_geotiff<T, P>(grid: &Grid<T>, path: P, options: Option<GeoTiffOptions>) -> Result<()>
where
    T: GridElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_geotiff(grid, file, &options.unwrap_or_default())
}

/// Write a Grid to an in-memory GeoTIFF buffer
///
/// Same as `write_geotiff` but returns a `Vec<u8>` instead of writing to a file.
pub fn write_geotiff_to_buffer<T>(grid: &Grid<T>, options: Option<GeoTiffOptions>) -> Result<Vec<u8>>
where
    T: GridElement,
{
    let mut buf = Vec::new();
    encode_geotiff(grid, Cursor::new(&mut buf), &options.unwrap_or_default())?;
    Ok(buf)
}

/// Internal: encode a Grid as GeoTIFF into any `Write + Seek` sink
fn encode_geotiff<T, W>(grid: &Grid<T>, writer: W, options: &GeoTiffOptions) -> Result<()>
where
    T: GridElement,
    W: std::io::Write + std::io::Seek,
{
    // Scale + tiepoint tags cannot express rotation terms
    if !grid.transform().is_north_up() {
        return Err(Error::InvalidParameter {
            name: "transform",
            value: format!("{:?}", grid.transform()),
            reason: "rotated grids cannot be encoded as GeoTIFF scale/tiepoint tags".into(),
        });
    }

    let mut encoder =
        TiffEncoder::new(writer).map_err(|e| Error::Format(format!("TIFF encoder error: {}", e)))?;

    match options.compression {
        TiffCompression::Uncompressed => encode_image(&mut encoder, grid, Uncompressed::default()),
        TiffCompression::Lzw => encode_image(&mut encoder, grid, Lzw::default()),
        TiffCompression::Deflate => encode_image(&mut encoder, grid, Deflate::default()),
    }
}

fn encode_image<T, W, D>(encoder: &mut TiffEncoder<W>, grid: &Grid<T>, compression: D) -> Result<()>
where
    T: GridElement,
    W: std::io::Write + std::io::Seek,
    D: Compression,
{
    let (rows, cols) = grid.shape();

    // Convert data to f32
    let data: Vec<f32> = grid
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
        .collect();

    let mut image = encoder
        .new_image_with_compression::<Gray32Float, _>(cols as u32, rows as u32, compression)
        .map_err(|e| Error::Format(format!("cannot create TIFF image: {}", e)))?;

    let gt = grid.transform();

    // ModelPixelScaleTag
    let scale = vec![gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), scale.as_slice())
        .map_err(|e| Error::Format(format!("cannot write scale tag: {}", e)))?;

    // ModelTiepointTag
    let tiepoint = vec![0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_TIEPOINT), tiepoint.as_slice())
        .map_err(|e| Error::Format(format!("cannot write tiepoint tag: {}", e)))?;

    // GeoKeyDirectoryTag
    let geokeys = geokey_directory(grid.crs());
    image
        .encoder()
        .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), geokeys.as_slice())
        .map_err(|e| Error::Format(format!("cannot write geokey tag: {}", e)))?;

    // GDAL_NODATA (ASCII)
    if let Some(nodata) = grid.nodata().and_then(|nd| nd.to_f64()) {
        let text = if nodata.is_nan() {
            "nan".to_string()
        } else {
            format!("{}", nodata)
        };
        image
            .encoder()
            .write_tag(Tag::Unknown(GDAL_NODATA), text.as_str())
            .map_err(|e| Error::Format(format!("cannot write nodata tag: {}", e)))?;
    }

    image
        .write_data(&data)
        .map_err(|e| Error::Format(format!("cannot write image data: {}", e)))?;

    Ok(())
}

/// Build a GeoKeyDirectory advertising the grid's CRS.
///
/// Always includes GTRasterTypeGeoKey = RasterPixelIsArea. Geographic
/// systems get GeographicTypeGeoKey, projected ones ProjectedCSTypeGeoKey.
/// A CRS without an EPSG code (or one too wide for a SHORT) degrades to
/// the bare model/raster-type directory.
fn geokey_directory(crs: Option<&CRS>) -> Vec<u16> {
    let mut keys: Vec<[u16; 4]> = vec![[GT_RASTER_TYPE, 0, 1, 1]];

    match crs.and_then(|c| c.epsg()) {
        Some(4326) => {
            keys.push([GT_MODEL_TYPE, 0, 1, 2]); // geographic
            keys.push([GEOGRAPHIC_TYPE, 0, 1, 4326]);
        }
        Some(epsg) if parse_utm_epsg(epsg).is_some() => {
            keys.push([GT_MODEL_TYPE, 0, 1, 1]); // projected
            keys.push([PROJECTED_CS_TYPE, 0, 1, epsg as u16]);
        }
        Some(epsg) if u16::try_from(epsg).is_ok() => {
            keys.push([GT_MODEL_TYPE, 0, 1, 1]);
            keys.push([PROJECTED_CS_TYPE, 0, 1, epsg as u16]);
        }
        _ => {
            keys.push([GT_MODEL_TYPE, 0, 1, 1]);
        }
    }

    // Entries must be sorted by key id
    keys.sort_by_key(|k| k[0]);

    let mut dir: Vec<u16> = vec![1, 1, 0, keys.len() as u16];
    for key in keys {
        dir.extend_from_slice(&key);
    }
    dir
}
