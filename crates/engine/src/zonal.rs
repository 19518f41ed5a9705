//! Per-zone statistics over a value grid
//!
//! Zones are vector polygons; a zone's statistics cover the grid cells
//! whose centers fall inside its geometry, nodata excluded. A zone that
//! covers no valid cells is a normal outcome reported as missing values,
//! and a malformed zone degrades to a missing row without aborting the
//! rest of the batch.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use geo::{BoundingRect, Contains};
use geo_types::{Geometry, Point};
use serde::{Deserialize, Serialize};
use verdelta_core::crs::reproject_geometry;
use verdelta_core::raster::Grid;
use verdelta_core::vector::{AttributeValue, Feature, FeatureCollection};
use verdelta_core::{Error, Result};

use crate::align::vector_transform;

/// Statistics a zonal request can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZonalStatistic {
    Mean,
    Min,
    Max,
    #[serde(rename = "std")]
    StdDev,
    Sum,
    Count,
}

/// The default statistic set when a request names none
pub const DEFAULT_STATISTICS: [ZonalStatistic; 5] = [
    ZonalStatistic::Mean,
    ZonalStatistic::Min,
    ZonalStatistic::Max,
    ZonalStatistic::StdDev,
    ZonalStatistic::Count,
];

impl FromStr for ZonalStatistic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Self::Mean),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "std" => Ok(Self::StdDev),
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            other => Err(Error::InvalidParameter {
                name: "statistic",
                value: other.to_string(),
                reason: "expected one of mean, min, max, std, sum, count".into(),
            }),
        }
    }
}

impl fmt::Display for ZonalStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::StdDev => "std",
            Self::Sum => "sum",
            Self::Count => "count",
        })
    }
}

/// Statistics for one zone. `None` means missing: either the zone covers
/// no valid cells or its geometry could not be evaluated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneSummary {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub std_dev: Option<f64>,
    pub sum: Option<f64>,
    pub count: Option<u64>,
    /// Class-code histogram, present only in categorical mode
    pub histogram: Option<BTreeMap<i64, u64>>,
}

impl ZoneSummary {
    fn missing() -> Self {
        Self::default()
    }

    /// The value for one statistic, as an attribute
    fn attribute(&self, stat: ZonalStatistic) -> AttributeValue {
        let float = |v: Option<f64>| v.map_or(AttributeValue::Null, AttributeValue::Float);
        match stat {
            ZonalStatistic::Mean => float(self.mean),
            ZonalStatistic::Min => float(self.min),
            ZonalStatistic::Max => float(self.max),
            ZonalStatistic::StdDev => float(self.std_dev),
            ZonalStatistic::Sum => float(self.sum),
            ZonalStatistic::Count => self
                .count
                .map_or(AttributeValue::Null, |n| AttributeValue::Int(n as i64)),
        }
    }
}

/// Compute a [`ZoneSummary`] for every zone in the collection.
///
/// Zone geometries are reprojected (copied) into the raster's CRS when
/// the collection carries a different one; a collection without a CRS is
/// assumed to already be in raster coordinates. All summary fields are
/// computed in one pass per zone over the zone's pixel window; the
/// requesting layer picks which to expose.
///
/// In categorical mode each summary also carries a histogram of cell
/// values rounded to the nearest integer.
pub fn zone_summaries(
    raster: &Grid<f64>,
    zones: &FeatureCollection,
    categorical: bool,
) -> Result<Vec<ZoneSummary>> {
    let transform = vector_transform(zones.crs.as_ref(), raster.crs())?;
    if !raster.transform().is_invertible() {
        return Err(Error::Alignment("raster transform is degenerate".into()));
    }

    let summaries = zones
        .iter()
        .enumerate()
        .map(|(index, zone)| match summarize_zone(raster, zone, &transform, categorical) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(zone = index, error = %e, "zone skipped, reporting missing values");
                ZoneSummary::missing()
            }
        })
        .collect();

    Ok(summaries)
}

fn summarize_zone(
    raster: &Grid<f64>,
    zone: &Feature,
    transform: &verdelta_core::crs::CoordTransform,
    categorical: bool,
) -> Result<ZoneSummary> {
    let geometry = zone
        .geometry
        .as_ref()
        .ok_or_else(|| Error::Other("zone has no geometry".into()))?;
    let geometry = reproject_geometry(geometry, transform);

    let rect = match geometry.bounding_rect() {
        Some(rect) => rect,
        None => return Err(Error::Other("zone geometry is empty".into())),
    };

    let Some(window) = pixel_window(raster, rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    else {
        // No overlap with the raster extent: a valid zero-coverage zone
        return Ok(summary_from(&Accumulator::new(categorical), categorical));
    };

    let (r0, r1, c0, c1) = window;
    let nodata = raster.nodata();
    let mut acc = Accumulator::new(categorical);

    for row in r0..=r1 {
        for col in c0..=c1 {
            let (x, y) = raster.pixel_to_geo(col, row);
            if !geometry.contains(&Point::new(x, y)) {
                continue;
            }
            let v = unsafe { raster.get_unchecked(row, col) };
            if crate::algebra::is_nodata_f64(v, nodata) {
                continue;
            }
            acc.push(v);
        }
    }

    Ok(summary_from(&acc, categorical))
}

/// Clamped inclusive pixel window covering a bounding box, or `None`
/// when the box misses the raster entirely
fn pixel_window(
    raster: &Grid<f64>,
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
) -> Option<(usize, usize, usize, usize)> {
    let (rows, cols) = raster.shape();
    let corners = [
        raster.geo_to_pixel(min_x, min_y)?,
        raster.geo_to_pixel(min_x, max_y)?,
        raster.geo_to_pixel(max_x, min_y)?,
        raster.geo_to_pixel(max_x, max_y)?,
    ];

    let mut min_c = f64::INFINITY;
    let mut max_c = f64::NEG_INFINITY;
    let mut min_r = f64::INFINITY;
    let mut max_r = f64::NEG_INFINITY;
    for (c, r) in corners {
        min_c = min_c.min(c);
        max_c = max_c.max(c);
        min_r = min_r.min(r);
        max_r = max_r.max(r);
    }

    if max_c <= 0.0 || max_r <= 0.0 || min_c >= cols as f64 || min_r >= rows as f64 {
        return None;
    }

    let c0 = min_c.floor().max(0.0) as usize;
    let r0 = min_r.floor().max(0.0) as usize;
    let c1 = (max_c.ceil() as usize).min(cols).saturating_sub(1);
    let r1 = (max_r.ceil() as usize).min(rows).saturating_sub(1);
    Some((r0, r1, c0, c1))
}

struct Accumulator {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
    histogram: Option<BTreeMap<i64, u64>>,
}

impl Accumulator {
    fn new(categorical: bool) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            histogram: categorical.then(BTreeMap::new),
        }
    }

    fn push(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        if let Some(hist) = self.histogram.as_mut() {
            *hist.entry(v.round() as i64).or_insert(0) += 1;
        }
    }
}

fn summary_from(acc: &Accumulator, categorical: bool) -> ZoneSummary {
    if acc.count == 0 {
        return ZoneSummary {
            histogram: categorical.then(BTreeMap::new),
            ..ZoneSummary::missing()
        };
    }

    let n = acc.count as f64;
    let mean = acc.sum / n;
    // Population standard deviation, clamped against rounding
    let variance = (acc.sum_sq / n - mean * mean).max(0.0);

    ZoneSummary {
        mean: Some(mean),
        min: Some(acc.min),
        max: Some(acc.max),
        std_dev: Some(variance.sqrt()),
        sum: Some(acc.sum),
        count: Some(acc.count),
        histogram: acc.histogram.clone(),
    }
}

/// Enrich a zone collection with its computed statistics.
///
/// Each requested statistic becomes a `zonal_<name>` property on the
/// matching zone (`Null` when missing); categorical mode adds a nested
/// `zonal_histogram` map of class code to cell count.
pub fn attach_zone_stats(
    zones: &FeatureCollection,
    summaries: &[ZoneSummary],
    stats: &[ZonalStatistic],
    categorical: bool,
) -> FeatureCollection {
    let mut enriched = FeatureCollection {
        features: Vec::with_capacity(zones.len()),
        crs: zones.crs.clone(),
    };

    for (zone, summary) in zones.iter().zip(summaries) {
        let mut feature = zone.clone();
        for &stat in stats {
            feature.set_property(format!("zonal_{}", stat), summary.attribute(stat));
        }
        if categorical {
            let map = summary
                .histogram
                .as_ref()
                .map(|hist| {
                    hist.iter()
                        .map(|(&class, &n)| (class.to_string(), AttributeValue::Int(n as i64)))
                        .collect::<BTreeMap<_, _>>()
                })
                .unwrap_or_default();
            feature.set_property("zonal_histogram", AttributeValue::Map(map));
        }
        enriched.push(feature);
    }

    enriched
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdelta_core::GeoTransform;

    fn raster_4x4(fill: f64) -> Grid<f64> {
        let mut g = Grid::filled(4, 4, fill);
        g.set_transform(GeoTransform::new(0.0, 4.0, 1.0, -1.0));
        g
    }

    fn zone(coords: &[(f64, f64)]) -> Feature {
        let ring: Vec<_> = coords.iter().map(|&(x, y)| geo_types::Coord { x, y }).collect();
        Feature::new(Geometry::Polygon(geo_types::Polygon::new(
            geo_types::LineString(ring),
            vec![],
        )))
    }

    fn quadrants() -> FeatureCollection {
        let mut zones = FeatureCollection::new();
        for (x0, y0) in [(0.0, 2.0), (2.0, 2.0), (0.0, 0.0), (2.0, 0.0)] {
            zones.push(zone(&[
                (x0, y0),
                (x0 + 2.0, y0),
                (x0 + 2.0, y0 + 2.0),
                (x0, y0 + 2.0),
                (x0, y0),
            ]));
        }
        zones
    }

    #[test]
    fn quadrant_zones_over_constant_raster() {
        let raster = raster_4x4(0.5);
        let summaries = zone_summaries(&raster, &quadrants(), false).unwrap();

        assert_eq!(summaries.len(), 4);
        for summary in &summaries {
            assert_eq!(summary.count, Some(4));
            assert!((summary.mean.unwrap() - 0.5).abs() < 1e-12);
            assert!((summary.sum.unwrap() - 2.0).abs() < 1e-12);
            assert!(summary.std_dev.unwrap().abs() < 1e-12);
            assert_eq!(summary.min, summary.max);
        }
    }

    #[test]
    fn nodata_cells_are_excluded() {
        let mut raster = raster_4x4(2.0);
        raster.set_nodata(Some(-9999.0));
        raster.set(0, 0, -9999.0).unwrap();
        raster.set(1, 1, f64::NAN).unwrap();

        let mut zones = FeatureCollection::new();
        zones.push(zone(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]));

        let summaries = zone_summaries(&raster, &zones, false).unwrap();
        assert_eq!(summaries[0].count, Some(14));
        assert!((summaries[0].mean.unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn non_overlapping_zone_reports_missing_values() {
        let raster = raster_4x4(1.0);

        let mut zones = FeatureCollection::new();
        zones.push(zone(&[(100.0, 100.0), (110.0, 100.0), (110.0, 110.0), (100.0, 110.0), (100.0, 100.0)]));
        zones.push(zone(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]));

        let summaries = zone_summaries(&raster, &zones, false).unwrap();
        assert_eq!(summaries[0], ZoneSummary::missing());
        // The bad zone does not affect its neighbour
        assert_eq!(summaries[1].count, Some(16));
    }

    #[test]
    fn geometryless_zone_degrades_to_missing_row() {
        let raster = raster_4x4(1.0);

        let mut zones = FeatureCollection::new();
        zones.push(Feature::empty());
        zones.push(zone(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]));

        let summaries = zone_summaries(&raster, &zones, false).unwrap();
        assert_eq!(summaries[0], ZoneSummary::missing());
        assert_eq!(summaries[1].count, Some(16));
    }

    #[test]
    fn categorical_histogram_counts_classes() {
        let mut raster = raster_4x4(1.0);
        raster.set(0, 0, 3.0).unwrap();
        raster.set(0, 1, 3.0).unwrap();
        raster.set(1, 0, 2.0).unwrap();

        let mut zones = FeatureCollection::new();
        zones.push(zone(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]));

        let summaries = zone_summaries(&raster, &zones, true).unwrap();
        let hist = summaries[0].histogram.as_ref().unwrap();
        assert_eq!(hist.get(&1), Some(&13));
        assert_eq!(hist.get(&2), Some(&1));
        assert_eq!(hist.get(&3), Some(&2));
    }

    #[test]
    fn statistic_name_parsing() {
        assert_eq!("mean".parse::<ZonalStatistic>().unwrap(), ZonalStatistic::Mean);
        assert_eq!("std".parse::<ZonalStatistic>().unwrap(), ZonalStatistic::StdDev);
        assert!(matches!(
            "median".parse::<ZonalStatistic>(),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn attach_enriches_zone_properties() {
        let raster = raster_4x4(0.5);
        let zones = quadrants();
        let summaries = zone_summaries(&raster, &zones, true).unwrap();

        let stats = [ZonalStatistic::Mean, ZonalStatistic::Count];
        let enriched = attach_zone_stats(&zones, &summaries, &stats, true);

        assert_eq!(enriched.len(), 4);
        let first = &enriched.features[0];
        assert_eq!(
            first.get_property("zonal_mean").and_then(AttributeValue::as_f64),
            Some(0.5)
        );
        assert_eq!(
            first.get_property("zonal_count"),
            Some(&AttributeValue::Int(4))
        );
        match first.get_property("zonal_histogram") {
            Some(AttributeValue::Map(map)) => {
                // 0.5 rounds to 1 under round-half-away-from-zero
                assert_eq!(map.get("1"), Some(&AttributeValue::Int(4)));
            }
            other => panic!("expected a histogram map, got {:?}", other),
        }
    }

    #[test]
    fn attach_reports_missing_as_null() {
        let raster = raster_4x4(1.0);
        let mut zones = FeatureCollection::new();
        zones.push(zone(&[(50.0, 50.0), (60.0, 50.0), (60.0, 60.0), (50.0, 60.0), (50.0, 50.0)]));

        let summaries = zone_summaries(&raster, &zones, false).unwrap();
        let stats = [ZonalStatistic::Mean];
        let enriched = attach_zone_stats(&zones, &summaries, &stats, false);

        assert_eq!(
            enriched.features[0].get_property("zonal_mean"),
            Some(&AttributeValue::Null)
        );
    }

    #[test]
    fn partially_overlapping_zone_counts_covered_cells() {
        let raster = raster_4x4(1.0);
        // Covers the left half plus a margin hanging off the raster
        let mut zones = FeatureCollection::new();
        zones.push(zone(&[(-5.0, 0.0), (2.0, 0.0), (2.0, 4.0), (-5.0, 4.0), (-5.0, 0.0)]));

        let summaries = zone_summaries(&raster, &zones, false).unwrap();
        assert_eq!(summaries[0].count, Some(8));
    }
}
