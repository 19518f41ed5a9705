//! Request-level operations
//!
//! The typed entry points a serving layer calls into: each request names
//! its grids through [`GridSource`], is resolved once, and runs the
//! pipeline stages with no state kept between calls.

use std::path::PathBuf;

use geo::Intersects;
use verdelta_core::crs::reproject_geometry;
use verdelta_core::io::read_geotiff;
use verdelta_core::raster::Grid;
use verdelta_core::vector::FeatureCollection;
use verdelta_core::Result;

use crate::align::{align, vector_transform, Resampling};
use crate::change::{classify, difference, CompareOp};
use crate::vectorize::{filter_min_region, vectorize, Connectivity};
use crate::zonal::{attach_zone_stats, zone_summaries, ZonalStatistic, DEFAULT_STATISTICS};

/// A grid input: either a file to read or an already-loaded grid.
///
/// Every public operation resolves its sources exactly once at entry, so
/// the pipeline stages only ever see concrete [`Grid`]s.
#[derive(Debug, Clone)]
pub enum GridSource {
    Path(PathBuf),
    Memory(Grid<f64>),
}

impl GridSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    fn resolve(self) -> Result<Grid<f64>> {
        match self {
            Self::Path(path) => {
                tracing::debug!(path = %path.display(), "reading grid");
                read_geotiff(&path)
            }
            Self::Memory(grid) => Ok(grid),
        }
    }
}

impl From<Grid<f64>> for GridSource {
    fn from(grid: Grid<f64>) -> Self {
        Self::Memory(grid)
    }
}

/// Zonal statistics over a value grid
#[derive(Debug, Clone)]
pub struct ZonalStatsRequest {
    pub raster: GridSource,
    pub zones: FeatureCollection,
    /// Statistics to attach; empty means the default set
    /// (mean, min, max, std, count)
    pub stats: Vec<ZonalStatistic>,
    pub categorical: bool,
}

/// Run a zonal-statistics request.
///
/// Returns the request's zones enriched with one `zonal_<stat>` property
/// per requested statistic, plus a `zonal_histogram` map in categorical
/// mode. Zones that fail individually come back with `Null` statistics;
/// only whole-request problems (unreadable raster, unsupported CRS pair)
/// are errors.
pub fn run_zonal_stats(request: ZonalStatsRequest) -> Result<FeatureCollection> {
    let raster = request.raster.resolve()?;
    let stats: &[ZonalStatistic] = if request.stats.is_empty() {
        &DEFAULT_STATISTICS
    } else {
        &request.stats
    };

    tracing::info!(
        zones = request.zones.len(),
        ?stats,
        categorical = request.categorical,
        "zonal statistics"
    );

    let summaries = zone_summaries(&raster, &request.zones, request.categorical)?;
    Ok(attach_zone_stats(
        &request.zones,
        &summaries,
        stats,
        request.categorical,
    ))
}

/// Change detection between two time-stamped index grids
#[derive(Debug, Clone)]
pub struct ChangeDetectionRequest {
    /// Earlier grid; its geometry is the reference the later grid is
    /// aligned onto
    pub grid_t1: GridSource,
    pub grid_t2: GridSource,
    pub threshold: f64,
    pub comparison: CompareOp,
    /// Keep only change polygons intersecting these zones
    pub mask_zones: Option<FeatureCollection>,
    /// Change regions smaller than this many pixels are dropped
    pub min_region_pixels: u64,
}

/// Run a change-detection request.
///
/// The later grid is aligned onto the earlier one (bilinear), the
/// difference `t2 − t1` is thresholded with the requested comparison,
/// and the resulting mask is vectorized. Regions below
/// `min_region_pixels` are dropped; when mask zones are given, only
/// polygons spatially intersecting at least one of them are kept.
pub fn run_change_detection(request: ChangeDetectionRequest) -> Result<FeatureCollection> {
    let t1 = request.grid_t1.resolve()?;
    let t2 = request.grid_t2.resolve()?;

    let t2 = align(&t1, &t2, Resampling::Bilinear)?;
    let diff = difference(&t1, &t2)?;
    let mask = classify(&diff, request.threshold, request.comparison)?;

    let regions = vectorize(&mask, Connectivity::Four)?;
    let regions = filter_min_region(regions, request.min_region_pixels);

    let regions = match &request.mask_zones {
        Some(zones) => filter_by_zones(regions, zones)?,
        None => regions,
    };

    tracing::info!(
        threshold = request.threshold,
        comparison = %request.comparison,
        regions = regions.len(),
        "change detection"
    );
    Ok(regions)
}

/// Keep features that spatially intersect at least one zone, with zones
/// reprojected into the feature collection's CRS when they differ
fn filter_by_zones(
    mut features: FeatureCollection,
    zones: &FeatureCollection,
) -> Result<FeatureCollection> {
    let transform = vector_transform(zones.crs.as_ref(), features.crs.as_ref())?;
    let zone_geometries: Vec<_> = zones
        .iter()
        .filter_map(|z| z.geometry.as_ref())
        .map(|g| reproject_geometry(g, &transform))
        .collect();

    features.features.retain(|feature| {
        feature
            .geometry
            .as_ref()
            .is_some_and(|g| zone_geometries.iter().any(|z| g.intersects(z)))
    });
    Ok(features)
}
