//! Temporal differencing and threshold classification
//!
//! `difference` turns two aligned index grids into a change grid;
//! `classify` turns any grid into a binary mask; `detect_loss` and
//! `detect_gain` chain the two with vectorization into the named
//! vegetation-change policies.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use verdelta_core::raster::Grid;
use verdelta_core::vector::FeatureCollection;
use verdelta_core::{Error, Result};

use crate::algebra::{build_output, is_nodata_f64};
use crate::align::ensure_aligned;
use crate::vectorize::{filter_min_region, vectorize, Connectivity};

/// Mask value for cells matching the predicate
pub const MASK_FOREGROUND: u8 = 1;
/// Mask value for cells failing the predicate
pub const MASK_BACKGROUND: u8 = 0;
/// Mask value for nodata cells
pub const MASK_NODATA: u8 = 255;

/// Default loss-detection threshold on an index difference
pub const DEFAULT_LOSS_THRESHOLD: f64 = -0.2;
/// Default gain-detection threshold on an index difference
pub const DEFAULT_GAIN_THRESHOLD: f64 = 0.2;
/// Default minimum region size for change polygons, in pixels
pub const DEFAULT_MIN_REGION_PIXELS: u64 = 10;

/// Compute the change grid `t2 − t1`.
///
/// Inputs must already be aligned (same shape, transform and CRS);
/// mismatched grids are an [`Error::Alignment`], never a silent
/// misalignment. Nodata in either input propagates as NaN.
///
/// Anti-symmetric by construction: `difference(t2, t1)` equals the
/// negation of `difference(t1, t2)` on every valid cell.
pub fn difference(t1: &Grid<f64>, t2: &Grid<f64>) -> Result<Grid<f64>> {
    ensure_aligned(t1, t2)?;

    let (rows, cols) = t1.shape();
    let nodata_1 = t1.nodata();
    let nodata_2 = t2.nodata();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let a = unsafe { t1.get_unchecked(row, col) };
                let b = unsafe { t2.get_unchecked(row, col) };

                if is_nodata_f64(a, nodata_1) || is_nodata_f64(b, nodata_2) {
                    continue;
                }
                *out = b - a;
            }
            row_data
        })
        .collect();

    build_output(t1, rows, cols, data)
}

/// Comparison predicate for threshold classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Greater,
    Less,
    Equal,
}

impl CompareOp {
    fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Greater => value > threshold,
            Self::Less => value < threshold,
            Self::Equal => value == threshold,
        }
    }
}

impl FromStr for CompareOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "greater" => Ok(Self::Greater),
            "less" => Ok(Self::Less),
            "equal" => Ok(Self::Equal),
            other => Err(Error::InvalidOperator(other.to_string())),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Greater => "greater",
            Self::Less => "less",
            Self::Equal => "equal",
        })
    }
}

/// Produce a binary mask: 1 where `op(cell, threshold)` holds, 0 where it
/// does not, [`MASK_NODATA`] where the input cell is nodata.
pub fn classify(grid: &Grid<f64>, threshold: f64, op: CompareOp) -> Result<Grid<u8>> {
    let (rows, cols) = grid.shape();
    let nodata = grid.nodata();

    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![MASK_NODATA; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let v = unsafe { grid.get_unchecked(row, col) };
                if is_nodata_f64(v, nodata) {
                    continue;
                }
                *out = if op.holds(v, threshold) {
                    MASK_FOREGROUND
                } else {
                    MASK_BACKGROUND
                };
            }
            row_data
        })
        .collect();

    let mut mask = grid.with_same_meta::<u8>(rows, cols);
    mask.set_nodata(Some(MASK_NODATA));
    *mask.data_mut() = ndarray::Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| Error::Other(e.to_string()))?;
    Ok(mask)
}

/// Parameters for vegetation-loss detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossParams {
    /// Index decrease below which a cell counts as loss
    pub threshold: f64,
    /// Regions smaller than this many pixels are dropped
    pub min_region_pixels: u64,
    pub connectivity: Connectivity,
}

impl Default for LossParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOSS_THRESHOLD,
            min_region_pixels: DEFAULT_MIN_REGION_PIXELS,
            connectivity: Connectivity::Four,
        }
    }
}

/// Parameters for vegetation-gain detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GainParams {
    /// Index increase above which a cell counts as gain
    pub threshold: f64,
    /// Regions smaller than this many pixels are dropped
    pub min_region_pixels: u64,
    pub connectivity: Connectivity,
}

impl Default for GainParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_GAIN_THRESHOLD,
            min_region_pixels: DEFAULT_MIN_REGION_PIXELS,
            connectivity: Connectivity::Four,
        }
    }
}

/// Vectorized regions where the index dropped below the loss threshold
pub fn detect_loss(diff: &Grid<f64>, params: &LossParams) -> Result<FeatureCollection> {
    let mask = classify(diff, params.threshold, CompareOp::Less)?;
    let regions = vectorize(&mask, params.connectivity)?;
    let regions = filter_min_region(regions, params.min_region_pixels);
    tracing::info!(regions = regions.len(), threshold = params.threshold, "loss detection");
    Ok(regions)
}

/// Vectorized regions where the index rose above the gain threshold
pub fn detect_gain(diff: &Grid<f64>, params: &GainParams) -> Result<FeatureCollection> {
    let mask = classify(diff, params.threshold, CompareOp::Greater)?;
    let regions = vectorize(&mask, params.connectivity)?;
    let regions = filter_min_region(regions, params.min_region_pixels);
    tracing::info!(regions = regions.len(), threshold = params.threshold, "gain detection");
    Ok(regions)
}
