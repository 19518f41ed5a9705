//! Georeferenced grid type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, GridElement};
use ndarray::Array2;

/// A georeferenced single-band grid.
///
/// `Grid<T>` stores cell values of type `T` in row-major order together
/// with an affine transform, an optional CRS and an optional nodata
/// sentinel. Operations never mutate their inputs; they build new grids.
#[derive(Debug, Clone)]
pub struct Grid<T: GridElement> {
    /// Cell values, indexed as (row, col)
    data: Array2<T>,
    /// Affine georeferencing
    transform: GeoTransform,
    /// Coordinate reference system
    crs: Option<CRS>,
    /// Nodata sentinel
    nodata: Option<T>,
}

impl<T: GridElement> Grid<T> {
    /// Create a grid filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::with_data(Array2::zeros((rows, cols)))
    }

    /// Create a grid filled with a value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::with_data(Array2::from_elem((rows, cols), value))
    }

    /// Create a grid from row-major cell values
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::with_data(array))
    }

    fn with_data(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Create a zeroed grid of a different cell type carrying this
    /// grid's transform and CRS
    pub fn with_same_meta<U: GridElement>(&self, rows: usize, cols: usize) -> Grid<U> {
        Grid {
            data: Array2::zeros((rows, cols)),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the grid has no cells
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn out_of_bounds(&self, row: usize, col: usize) -> Error {
        Error::IndexOutOfBounds {
            row,
            col,
            rows: self.rows(),
            cols: self.cols(),
        }
    }

    /// Value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or_else(|| self.out_of_bounds(row, col))
    }

    /// Value at (row, col) without bounds checking
    ///
    /// # Safety
    /// Caller must ensure row < self.rows() and col < self.cols()
    pub unsafe fn get_unchecked(&self, row: usize, col: usize) -> T {
        unsafe { *self.data.uget((row, col)) }
    }

    /// Set the value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(self.out_of_bounds(row, col)),
        }
    }

    /// Set the value at (row, col) without bounds checking
    ///
    /// # Safety
    /// Caller must ensure row < self.rows() and col < self.cols()
    pub unsafe fn set_unchecked(&mut self, row: usize, col: usize, value: T) {
        unsafe { *self.data.uget_mut((row, col)) = value }
    }

    /// Reference to the underlying array
    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    /// Mutable reference to the underlying array
    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    /// The geotransform
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Replace the geotransform
    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    /// The CRS, if known
    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Replace the CRS
    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    /// The nodata sentinel, if set
    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    /// Replace the nodata sentinel
    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Geographic coordinates of the pixel center
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.transform.pixel_to_geo(col, row)
    }

    /// Fractional pixel coordinates under a geographic point, or `None`
    /// for a degenerate transform
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        self.transform.geo_to_pixel(x, y)
    }

    /// Whether a value is nodata for this grid.
    ///
    /// NaN counts as nodata for float grids regardless of the sentinel.
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Basic summary statistics over valid cells
    pub fn statistics(&self) -> GridStatistics<T> {
        let mut min = None;
        let mut max = None;
        let mut sum: f64 = 0.0;
        let mut count: usize = 0;

        for &value in self.data.iter() {
            if self.is_nodata(value) {
                continue;
            }

            min = Some(match min {
                Some(m) if value >= m => m,
                _ => value,
            });
            max = Some(match max {
                Some(m) if value <= m => m,
                _ => value,
            });

            if let Some(v) = value.to_f64() {
                sum += v;
                count += 1;
            }
        }

        let mean = if count > 0 {
            Some(sum / count as f64)
        } else {
            None
        };

        GridStatistics {
            min,
            max,
            mean,
            valid_count: count,
            nodata_count: self.len() - count,
        }
    }
}

/// Summary statistics for a grid
#[derive(Debug, Clone)]
pub struct GridStatistics<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}
