//! Grid alignment and resampling
//!
//! Elementwise operations between two grids are only meaningful when both
//! share the same pixel geometry. [`ensure_aligned`] is the mandatory
//! precondition check; [`align`] resamples a grid onto a reference grid
//! when they disagree.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use verdelta_core::crs::{CoordTransform, CRS};
use verdelta_core::raster::Grid;
use verdelta_core::{Error, Result};

use crate::algebra::build_output;

/// Interpolation method used when resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// Distance-weighted average of the four surrounding cells.
    /// For continuous data such as spectral indices.
    Bilinear,
    /// Value of the closest cell. For categorical/class data.
    Nearest,
}

/// Whether two grids share the same shape, transform and CRS
pub fn grids_aligned(a: &Grid<f64>, b: &Grid<f64>) -> bool {
    if a.shape() != b.shape() || a.transform() != b.transform() {
        return false;
    }
    match (a.crs(), b.crs()) {
        (Some(ca), Some(cb)) => ca.is_equivalent(cb),
        (None, None) => true,
        _ => false,
    }
}

/// Require that two grids are aligned, describing the first mismatch
/// found otherwise.
pub fn ensure_aligned(a: &Grid<f64>, b: &Grid<f64>) -> Result<()> {
    if a.shape() != b.shape() {
        let ((ar, ac), (br, bc)) = (a.shape(), b.shape());
        return Err(Error::Alignment(format!(
            "shapes differ: {}x{} vs {}x{}",
            ar, ac, br, bc
        )));
    }
    if a.transform() != b.transform() {
        return Err(Error::Alignment("transforms differ".into()));
    }
    match (a.crs(), b.crs()) {
        (Some(ca), Some(cb)) if !ca.is_equivalent(cb) => Err(Error::Alignment(format!(
            "coordinate systems differ: {} vs {}",
            ca, cb
        ))),
        (Some(_), None) | (None, Some(_)) => {
            Err(Error::Alignment("only one grid carries a CRS".into()))
        }
        _ => Ok(()),
    }
}

/// Transform from a reference grid's CRS into another grid's CRS.
///
/// Both grids carrying a CRS resolves through [`CoordTransform::between`];
/// neither carrying one is taken as the same unspecified system. A single
/// missing CRS makes resampling ill-defined and is an alignment error.
fn grid_transform(reference: Option<&CRS>, other: Option<&CRS>) -> Result<CoordTransform> {
    match (reference, other) {
        (Some(r), Some(o)) => CoordTransform::between(r, o),
        (None, None) => Ok(CoordTransform::Identity),
        (Some(_), None) => Err(Error::Alignment(
            "grid to resample has no CRS but the reference grid does".into(),
        )),
        (None, Some(_)) => Err(Error::Alignment(
            "reference grid has no CRS but the grid to resample does".into(),
        )),
    }
}

/// Transform for vector data into a grid's CRS.
///
/// Unlike grid-to-grid alignment, vector data with an unknown CRS is
/// assumed to already be in grid coordinates.
pub(crate) fn vector_transform(
    vector_crs: Option<&CRS>,
    grid_crs: Option<&CRS>,
) -> Result<CoordTransform> {
    match (vector_crs, grid_crs) {
        (Some(v), Some(g)) => CoordTransform::between(v, g),
        _ => Ok(CoordTransform::Identity),
    }
}

/// Resample `other` onto `reference`'s pixel grid and CRS.
///
/// Already-aligned input is returned unchanged (cloned). Otherwise every
/// output cell center is projected into `other`'s pixel space and
/// interpolated with the requested method. Cells falling outside `other`,
/// or whose source neighbourhood is entirely nodata, come out as NaN.
///
/// # Errors
/// [`Error::Alignment`] when exactly one grid carries a CRS, when the CRS
/// pair is unsupported, or when `other`'s transform cannot be inverted.
pub fn align(reference: &Grid<f64>, other: &Grid<f64>, method: Resampling) -> Result<Grid<f64>> {
    if grids_aligned(reference, other) {
        return Ok(other.clone());
    }

    let transform = grid_transform(reference.crs(), other.crs())?;
    if !other.transform().is_invertible() {
        return Err(Error::Alignment(
            "grid to resample has a degenerate transform".into(),
        ));
    }

    tracing::debug!(
        from = ?other.shape(),
        to = ?reference.shape(),
        ?method,
        "resampling grid"
    );

    let (rows, cols) = reference.shape();
    let (src_rows, src_cols) = other.shape();
    let nodata = other.nodata();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let (x, y) = reference.pixel_to_geo(col, row);
                let (sx, sy) = transform.apply(x, y);
                let Some((fc, fr)) = other.geo_to_pixel(sx, sy) else {
                    continue;
                };

                *out = match method {
                    Resampling::Nearest => {
                        sample_nearest(other, fc, fr, src_rows, src_cols, nodata)
                    }
                    Resampling::Bilinear => {
                        sample_bilinear(other, fc, fr, src_rows, src_cols, nodata)
                    }
                };
            }
            row_data
        })
        .collect();

    let mut output = build_output(reference, rows, cols, data)?;
    output.set_crs(reference.crs().cloned());
    Ok(output)
}

fn sample_nearest(
    src: &Grid<f64>,
    fc: f64,
    fr: f64,
    rows: usize,
    cols: usize,
    nodata: Option<f64>,
) -> f64 {
    let col = fc.floor();
    let row = fr.floor();
    if col < 0.0 || row < 0.0 || col >= cols as f64 || row >= rows as f64 {
        return f64::NAN;
    }

    let v = unsafe { src.get_unchecked(row as usize, col as usize) };
    if crate::algebra::is_nodata_f64(v, nodata) {
        f64::NAN
    } else {
        v
    }
}

fn sample_bilinear(
    src: &Grid<f64>,
    fc: f64,
    fr: f64,
    rows: usize,
    cols: usize,
    nodata: Option<f64>,
) -> f64 {
    // Fractional pixel coordinates are measured from the grid corner;
    // cell centers sit at +0.5.
    let gc = fc - 0.5;
    let gr = fr - 0.5;
    let c0 = gc.floor();
    let r0 = gr.floor();
    let dx = gc - c0;
    let dy = gr - r0;

    let mut sum = 0.0;
    let mut weight = 0.0;

    for (roff, coff, w) in [
        (0.0, 0.0, (1.0 - dx) * (1.0 - dy)),
        (0.0, 1.0, dx * (1.0 - dy)),
        (1.0, 0.0, (1.0 - dx) * dy),
        (1.0, 1.0, dx * dy),
    ] {
        let r = r0 + roff;
        let c = c0 + coff;
        if r < 0.0 || c < 0.0 || r >= rows as f64 || c >= cols as f64 || w == 0.0 {
            continue;
        }
        let v = unsafe { src.get_unchecked(r as usize, c as usize) };
        if crate::algebra::is_nodata_f64(v, nodata) {
            continue;
        }
        sum += v * w;
        weight += w;
    }

    // Renormalize over the valid neighbours so edge and nodata-adjacent
    // cells keep sensible values.
    if weight > 0.0 {
        sum / weight
    } else {
        f64::NAN
    }
}
