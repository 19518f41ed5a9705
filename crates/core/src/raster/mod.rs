//! Raster grid data structures

mod element;
mod geotransform;
mod grid;

pub use element::GridElement;
pub use geotransform::GeoTransform;
pub use grid::{Grid, GridStatistics};
