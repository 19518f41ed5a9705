//! Affine georeferencing for grids

use serde::{Deserialize, Serialize};

/// Affine transformation between pixel and geographic coordinates.
///
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// North-up grids have zero rotation terms and negative `pixel_height`
/// (row index grows southward).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Cell size in X direction
    pub pixel_width: f64,
    /// Cell size in Y direction, negative for north-up grids
    pub pixel_height: f64,
    /// Row rotation term (usually 0)
    pub row_rotation: f64,
    /// Column rotation term (usually 0)
    pub col_rotation: f64,
}

impl GeoTransform {
    /// North-up transform with no rotation
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Geographic coordinates of the pixel center
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Geographic coordinates of the pixel's upper-left corner
    pub fn pixel_to_geo_corner(&self, col: usize, row: usize) -> (f64, f64) {
        self.apply(col as f64, row as f64)
    }

    /// Forward transform of fractional pixel coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Inverse transform: geographic coordinates to fractional pixel
    /// coordinates.
    ///
    /// Returns `None` when the transform is degenerate (zero determinant).
    /// Integer indices are obtained with `.floor()`.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !self.is_invertible() {
            return None;
        }

        let det = self.determinant();
        let dx = x - self.origin_x;
        let dy = y - self.origin_y;

        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;

        Some((col, row))
    }

    /// Whether the transform can be inverted
    pub fn is_invertible(&self) -> bool {
        self.determinant().abs() >= 1e-10
    }

    fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation
    }

    /// Whether this is a north-up grid with no rotation
    pub fn is_north_up(&self) -> bool {
        self.row_rotation.abs() < 1e-10
            && self.col_rotation.abs() < 1e-10
            && self.pixel_height < 0.0
    }

    /// Transform for a sub-window whose upper-left pixel is
    /// `(col_off, row_off)` in this grid. Cell sizes and rotation terms
    /// are unchanged.
    pub fn window(&self, col_off: usize, row_off: usize) -> Self {
        let (origin_x, origin_y) = self.pixel_to_geo_corner(col_off, row_off);
        Self {
            origin_x,
            origin_y,
            ..*self
        }
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pixel_geo_roundtrip() {
        let gt = GeoTransform::new(100.0, 200.0, 10.0, -10.0);

        let (x, y) = gt.pixel_to_geo(5, 10);
        let (col, row) = gt.geo_to_pixel(x, y).unwrap();

        assert_relative_eq!(col, 5.5, epsilon = 1e-10);
        assert_relative_eq!(row, 10.5, epsilon = 1e-10);
    }

    #[test]
    fn degenerate_transform_is_not_invertible() {
        let gt = GeoTransform::new(0.0, 0.0, 0.0, 0.0);
        assert!(!gt.is_invertible());
        assert!(gt.geo_to_pixel(1.0, 1.0).is_none());
    }

    #[test]
    fn window_shifts_origin() {
        let gt = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let win = gt.window(3, 5);

        assert_relative_eq!(win.origin_x, 3.0, epsilon = 1e-10);
        assert_relative_eq!(win.origin_y, 95.0, epsilon = 1e-10);
        assert_relative_eq!(win.pixel_width, 1.0);
        assert_relative_eq!(win.pixel_height, -1.0);
    }
}
