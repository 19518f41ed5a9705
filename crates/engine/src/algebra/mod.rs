//! Normalized-difference index algebra
//!
//! Indices operate on single-band grids (one band per grid) and produce
//! f64 grids with NaN for nodata. Arbitrary band formulas go through
//! [`grid_calc`].

mod expr;

pub use expr::grid_calc;

use ndarray::Array2;
use rayon::prelude::*;
use verdelta_core::raster::Grid;
use verdelta_core::{Error, Result};

/// Compute the normalized difference between two bands:
///
/// `(band_a - band_b) / (band_a + band_b)`
///
/// The result is clamped to [-1, 1]. Pixels where the denominator is
/// exactly zero are defined as 0.0; pixels where either band is nodata
/// are NaN.
///
/// # Arguments
/// * `band_a` - Numerator positive band
/// * `band_b` - Numerator negative band
pub fn normalized_difference(band_a: &Grid<f64>, band_b: &Grid<f64>) -> Result<Grid<f64>> {
    check_dimensions(band_a, band_b)?;

    let (rows, cols) = band_a.shape();
    let nodata_a = band_a.nodata();
    let nodata_b = band_b.nodata();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for col in 0..cols {
                let a = unsafe { band_a.get_unchecked(row, col) };
                let b = unsafe { band_b.get_unchecked(row, col) };

                if is_nodata_f64(a, nodata_a) || is_nodata_f64(b, nodata_b) {
                    continue;
                }

                let sum = a + b;
                row_data[col] = if sum == 0.0 {
                    0.0
                } else {
                    ((a - b) / sum).clamp(-1.0, 1.0)
                };
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
///
/// # Arguments
/// * `nir` - Near-infrared band
/// * `red` - Red band
pub fn ndvi(nir: &Grid<f64>, red: &Grid<f64>) -> Result<Grid<f64>> {
    normalized_difference(nir, red)
}

// ---------------------------------------------------------------------------
// Helpers shared by the pixel-loop modules
// ---------------------------------------------------------------------------

pub(crate) fn is_nodata_f64(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) => (value - nd).abs() < f64::EPSILON,
        None => false,
    }
}

pub(crate) fn check_dimensions(a: &Grid<f64>, b: &Grid<f64>) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(Error::SizeMismatch {
            er: a.rows(),
            ec: a.cols(),
            ar: b.rows(),
            ac: b.cols(),
        });
    }
    Ok(())
}

pub(crate) fn build_output(
    template: &Grid<f64>,
    rows: usize,
    cols: usize,
    data: Vec<f64>,
) -> Result<Grid<f64>> {
    let mut output = template.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
