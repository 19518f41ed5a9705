//! # Verdelta Core
//!
//! Core types and I/O for the verdelta raster change-detection engine.
//!
//! This crate provides:
//! - `Grid<T>`: georeferenced single-band raster grid
//! - `GeoTransform`: affine transformation for georeferencing
//! - `CRS`: coordinate reference system handling, with pure-Rust
//!   WGS84 ↔ UTM reprojection
//! - `Feature` / `FeatureCollection`: vector zones and derived polygons
//! - Native GeoTIFF reading and writing

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{GeoTransform, Grid, GridElement};
pub use vector::{AttributeValue, Feature, FeatureCollection};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Grid, GridElement};
    pub use crate::vector::{AttributeValue, Feature, FeatureCollection};
}
