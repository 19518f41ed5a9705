//! Clipping and point sampling
//!
//! Both operations relate a grid to vector inputs: `clip` cuts a grid
//! down to a geometry, `sample_at_points` reads the grid under point
//! coordinates. Vector inputs carrying a different CRS are reprojected
//! (copied) into the grid's CRS first.

use geo::{BoundingRect, Contains};
use geo_types::{Geometry, Point};
use verdelta_core::crs::{reproject_geometry, CRS};
use verdelta_core::raster::Grid;
use verdelta_core::{Error, Result};

use crate::align::vector_transform;

/// Crop and mask a grid to a geometry.
///
/// The output grid covers the pixel window under the geometry's bounding
/// box, clamped to the input extent, with its own derived transform.
/// Cells whose centers fall outside the geometry are nodata (NaN), as
/// are cells that were nodata in the input.
///
/// # Errors
/// [`Error::EmptyIntersection`] when the geometry's bounding box does not
/// overlap the grid at all; [`Error::Alignment`] for an unsupported CRS
/// pair or a degenerate grid transform.
pub fn clip(
    raster: &Grid<f64>,
    geometry: &Geometry<f64>,
    geometry_crs: Option<&CRS>,
) -> Result<Grid<f64>> {
    let transform = vector_transform(geometry_crs, raster.crs())?;
    let geometry = reproject_geometry(geometry, &transform);
    if !raster.transform().is_invertible() {
        return Err(Error::Alignment("raster transform is degenerate".into()));
    }

    let rect = geometry.bounding_rect().ok_or(Error::EmptyIntersection)?;
    let (rows, cols) = raster.shape();

    let corners = [
        (rect.min().x, rect.min().y),
        (rect.min().x, rect.max().y),
        (rect.max().x, rect.min().y),
        (rect.max().x, rect.max().y),
    ];
    let mut min_c = f64::INFINITY;
    let mut max_c = f64::NEG_INFINITY;
    let mut min_r = f64::INFINITY;
    let mut max_r = f64::NEG_INFINITY;
    for (x, y) in corners {
        let Some((c, r)) = raster.geo_to_pixel(x, y) else {
            return Err(Error::Alignment("raster transform is degenerate".into()));
        };
        min_c = min_c.min(c);
        max_c = max_c.max(c);
        min_r = min_r.min(r);
        max_r = max_r.max(r);
    }

    if max_c <= 0.0 || max_r <= 0.0 || min_c >= cols as f64 || min_r >= rows as f64 {
        return Err(Error::EmptyIntersection);
    }

    let c0 = min_c.floor().max(0.0) as usize;
    let r0 = min_r.floor().max(0.0) as usize;
    let c1 = (max_c.ceil() as usize).min(cols) - 1;
    let r1 = (max_r.ceil() as usize).min(rows) - 1;

    let out_rows = r1 - r0 + 1;
    let out_cols = c1 - c0 + 1;
    let nodata = raster.nodata();

    let mut output = raster.with_same_meta::<f64>(out_rows, out_cols);
    output.set_transform(raster.transform().window(c0, r0));
    output.set_nodata(Some(f64::NAN));

    for row in 0..out_rows {
        for col in 0..out_cols {
            let (src_row, src_col) = (r0 + row, c0 + col);
            let (x, y) = raster.pixel_to_geo(src_col, src_row);

            let value = if !geometry.contains(&Point::new(x, y)) {
                f64::NAN
            } else {
                let v = unsafe { raster.get_unchecked(src_row, src_col) };
                if crate::algebra::is_nodata_f64(v, nodata) {
                    f64::NAN
                } else {
                    v
                }
            };
            unsafe { output.set_unchecked(row, col, value) };
        }
    }

    tracing::debug!(
        window = ?(r0, c0, out_rows, out_cols),
        "clipped grid to geometry"
    );
    Ok(output)
}

/// Read the nearest-cell value under each point, in input order.
///
/// Points outside the grid extent, and points over nodata cells, yield
/// the grid's nodata sentinel (NaN when none is set), so callers can zip
/// the result with their input.
pub fn sample_at_points(
    raster: &Grid<f64>,
    points: &[(f64, f64)],
    points_crs: Option<&CRS>,
) -> Result<Vec<f64>> {
    let transform = vector_transform(points_crs, raster.crs())?;
    if !raster.transform().is_invertible() {
        return Err(Error::Alignment("raster transform is degenerate".into()));
    }

    let (rows, cols) = raster.shape();
    let sentinel = raster.nodata().unwrap_or(f64::NAN);

    let values = points
        .iter()
        .map(|&(x, y)| {
            let (gx, gy) = transform.apply(x, y);
            let Some((fc, fr)) = raster.geo_to_pixel(gx, gy) else {
                return sentinel;
            };
            let col = fc.floor();
            let row = fr.floor();
            if col < 0.0 || row < 0.0 || col >= cols as f64 || row >= rows as f64 {
                return sentinel;
            }
            let v = unsafe { raster.get_unchecked(row as usize, col as usize) };
            if raster.is_nodata(v) {
                sentinel
            } else {
                v
            }
        })
        .collect();

    Ok(values)
}
