//! Pure-Rust WGS84 ↔ UTM reprojection (Snyder 1987, USGS formulas).
//!
//! Covers EPSG 326xx (UTM North) and 327xx (UTM South), the systems
//! Sentinel-2 and Landsat products ship in. No libproj binding, so the
//! crate stays free of C dependencies. Any other CRS pair is rejected
//! with [`Error::Alignment`] rather than silently passed through.

use crate::crs::CRS;
use crate::error::{Error, Result};
use geo_types::{Coord, Geometry, LineString, Polygon};

// WGS84 ellipsoid constants

const A: f64 = 6_378_137.0; // semi-major axis (m)
const F: f64 = 1.0 / 298.257_223_563; // flattening
const E2: f64 = 2.0 * F - F * F; // eccentricity squared
const E_PRIME2: f64 = E2 / (1.0 - E2); // second eccentricity squared
const K0: f64 = 0.9996; // UTM scale factor
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Parse an EPSG code into UTM zone info: `Some((zone, is_north))`.
///
/// - EPSG 326xx → zone xx, northern hemisphere
/// - EPSG 327xx → zone xx, southern hemisphere
pub fn parse_utm_epsg(epsg: u32) -> Option<(u32, bool)> {
    if (32601..=32660).contains(&epsg) {
        Some((epsg - 32600, true))
    } else if (32701..=32760).contains(&epsg) {
        Some((epsg - 32700, false))
    } else {
        None
    }
}

/// A resolved coordinate transformation between two CRS.
///
/// Resolved once per operation with [`CoordTransform::between`]; applying
/// it is then infallible, so per-pixel and per-vertex loops stay free of
/// error plumbing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoordTransform {
    Identity,
    Wgs84ToUtm {
        zone: u32,
        north: bool,
    },
    UtmToWgs84 {
        zone: u32,
        north: bool,
    },
    /// Chained through WGS84
    UtmToUtm {
        from_zone: u32,
        from_north: bool,
        to_zone: u32,
        to_north: bool,
    },
}

impl CoordTransform {
    /// Resolve the transformation from `from` to `to`.
    ///
    /// Equivalent systems resolve to `Identity`. Unsupported pairs are an
    /// alignment error naming both systems.
    pub fn between(from: &CRS, to: &CRS) -> Result<Self> {
        if from.is_equivalent(to) {
            return Ok(Self::Identity);
        }

        let unsupported = || {
            Error::Alignment(format!(
                "unsupported reprojection from {} to {}",
                from, to
            ))
        };

        let (from_epsg, to_epsg) = match (from.epsg(), to.epsg()) {
            (Some(f), Some(t)) => (f, t),
            _ => return Err(unsupported()),
        };

        match (from_epsg, to_epsg) {
            (4326, t) => {
                let (zone, north) = parse_utm_epsg(t).ok_or_else(unsupported)?;
                Ok(Self::Wgs84ToUtm { zone, north })
            }
            (f, 4326) => {
                let (zone, north) = parse_utm_epsg(f).ok_or_else(unsupported)?;
                Ok(Self::UtmToWgs84 { zone, north })
            }
            (f, t) => {
                let (from_zone, from_north) = parse_utm_epsg(f).ok_or_else(unsupported)?;
                let (to_zone, to_north) = parse_utm_epsg(t).ok_or_else(unsupported)?;
                Ok(Self::UtmToUtm {
                    from_zone,
                    from_north,
                    to_zone,
                    to_north,
                })
            }
        }
    }

    /// Whether this transform leaves coordinates unchanged
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Transform a single coordinate pair
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Self::Identity => (x, y),
            Self::Wgs84ToUtm { zone, north } => wgs84_to_utm(x, y, zone, north),
            Self::UtmToWgs84 { zone, north } => utm_to_wgs84(x, y, zone, north),
            Self::UtmToUtm {
                from_zone,
                from_north,
                to_zone,
                to_north,
            } => {
                let (lon, lat) = utm_to_wgs84(x, y, from_zone, from_north);
                wgs84_to_utm(lon, lat, to_zone, to_north)
            }
        }
    }
}

/// Apply a resolved transform to every vertex of a geometry.
///
/// The input is never mutated; a transformed copy is returned.
pub fn reproject_geometry(geometry: &Geometry<f64>, transform: &CoordTransform) -> Geometry<f64> {
    if transform.is_identity() {
        return geometry.clone();
    }

    let map = |c: Coord<f64>| -> Coord<f64> {
        let (x, y) = transform.apply(c.x, c.y);
        Coord { x, y }
    };

    let map_ring = |ls: &LineString<f64>| LineString::from_iter(ls.coords().map(|c| map(*c)));

    let map_polygon = |p: &Polygon<f64>| {
        Polygon::new(
            map_ring(p.exterior()),
            p.interiors().iter().map(map_ring).collect(),
        )
    };

    match geometry {
        Geometry::Point(p) => {
            let (x, y) = transform.apply(p.x(), p.y());
            Geometry::Point(geo_types::Point::new(x, y))
        }
        Geometry::MultiPoint(mp) => Geometry::MultiPoint(
            mp.iter()
                .map(|p| {
                    let (x, y) = transform.apply(p.x(), p.y());
                    geo_types::Point::new(x, y)
                })
                .collect(),
        ),
        Geometry::Line(l) => Geometry::Line(geo_types::Line::new(map(l.start), map(l.end))),
        Geometry::LineString(ls) => Geometry::LineString(map_ring(ls)),
        Geometry::MultiLineString(mls) => {
            Geometry::MultiLineString(geo_types::MultiLineString(mls.iter().map(map_ring).collect()))
        }
        Geometry::Polygon(p) => Geometry::Polygon(map_polygon(p)),
        Geometry::MultiPolygon(mp) => {
            Geometry::MultiPolygon(geo_types::MultiPolygon(mp.iter().map(map_polygon).collect()))
        }
        Geometry::Rect(r) => Geometry::Polygon(map_polygon(&r.to_polygon())),
        Geometry::Triangle(t) => Geometry::Polygon(map_polygon(&t.to_polygon())),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(
            geo_types::GeometryCollection(
                gc.iter().map(|g| reproject_geometry(g, transform)).collect(),
            ),
        ),
    }
}

// Core projection (Snyder 1987, USGS Prof. Paper 1395, pp. 61-64)

/// Convert WGS84 (longitude, latitude) in degrees to UTM
/// (easting, northing) in metres for the given zone and hemisphere.
fn wgs84_to_utm(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a_coeff = cos_lat * (lon - lon0);

    // Meridional arc length M (Snyder eq. 3-21)
    let m = meridional_arc(lat);

    let a2 = a_coeff * a_coeff;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    // Easting (Snyder eq. 8-9)
    let easting = K0 * n
        * (a_coeff
            + (1.0 - t + c) * a2 * a_coeff / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
        + FALSE_EASTING;

    // Northing (Snyder eq. 8-10)
    let northing = K0
        * (m
            + n * tan_lat
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    let northing = if north {
        northing
    } else {
        northing + FALSE_NORTHING_SOUTH
    };

    (easting, northing)
}

/// Convert UTM (easting, northing) in metres to WGS84
/// (longitude, latitude) in degrees (Snyder eqs. 8-17 to 8-25).
fn utm_to_wgs84(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let x = easting - FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };

    // Footprint latitude from the meridional arc (Snyder eq. 7-19)
    let m = y / K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * E2 * E2 / 64.0 - 5.0 * E2 * E2 * E2 / 256.0));

    let sqrt_1me2 = (1.0 - E2).sqrt();
    let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_2 * e1_2;

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = E_PRIME2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let n1 = A / (1.0 - E2 * sin_phi1 * sin_phi1).sqrt();
    let r1 = A * (1.0 - E2) / (1.0 - E2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = x / (n1 * K0);

    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d2 * d2;
    let d5 = d4 * d;
    let d6 = d4 * d2;

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * E_PRIME2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                * d5
                / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Central meridian of a UTM zone, in radians
fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

/// Meridional arc from equator to latitude `lat` (radians).
/// Snyder eq. 3-21.
fn meridional_arc(lat: f64) -> f64 {
    let e2 = E2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    A * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::polygon;

    fn assert_close(a: f64, b: f64, tol: f64, msg: &str) {
        let diff = (a - b).abs();
        assert!(
            diff < tol,
            "{msg}: expected {b}, got {a}, diff {diff} exceeds tolerance {tol}"
        );
    }

    #[test]
    fn parse_utm_codes() {
        assert_eq!(parse_utm_epsg(32630), Some((30, true)));
        assert_eq!(parse_utm_epsg(32601), Some((1, true)));
        assert_eq!(parse_utm_epsg(32760), Some((60, false)));
        assert_eq!(parse_utm_epsg(4326), None);
        assert_eq!(parse_utm_epsg(32600), None); // zone 0 invalid
        assert_eq!(parse_utm_epsg(32661), None); // zone 61 invalid
    }

    // Reference values from pyproj (PROJ 9.x):
    //   Transformer.from_crs(4326, 32630, always_xy=True)
    //     .transform(-3.7037, 40.4168) → (440298.94, 4474257.31)
    #[test]
    fn madrid_forward() {
        let (e, n) = wgs84_to_utm(-3.7037, 40.4168, 30, true);
        assert_close(e, 440_298.94, 1.0, "easting");
        assert_close(n, 4_474_257.31, 1.0, "northing");
    }

    #[test]
    fn madrid_inverse() {
        let (lon, lat) = utm_to_wgs84(440_298.94, 4_474_257.31, 30, true);
        assert_close(lon, -3.7037, 1e-4, "longitude");
        assert_close(lat, 40.4168, 1e-4, "latitude");
    }

    // Buenos Aires: (-58.3816, -34.6037) ↔ UTM 21S (373317.50, 6170036.17)
    #[test]
    fn buenos_aires_inverse() {
        let (lon, lat) = utm_to_wgs84(373_317.50, 6_170_036.17, 21, false);
        assert_close(lon, -58.3816, 1e-4, "longitude");
        assert_close(lat, -34.6037, 1e-4, "latitude");
    }

    #[test]
    fn forward_inverse_roundtrip() {
        for &(lon, lat, zone, north) in &[
            (-3.7037, 40.4168, 30u32, true),
            (-58.3816, -34.6037, 21, false),
            (2.0, 0.1, 31, true),
        ] {
            let (e, n) = wgs84_to_utm(lon, lat, zone, north);
            let (lon2, lat2) = utm_to_wgs84(e, n, zone, north);
            assert_close(lon2, lon, 1e-6, "roundtrip longitude");
            assert_close(lat2, lat, 1e-6, "roundtrip latitude");
        }
    }

    #[test]
    fn between_identity_and_errors() {
        let wgs = CRS::wgs84();
        assert_eq!(
            CoordTransform::between(&wgs, &CRS::from_epsg(4326)).unwrap(),
            CoordTransform::Identity
        );

        // Web Mercator is not supported
        assert!(CoordTransform::between(&wgs, &CRS::from_epsg(3857)).is_err());
        assert!(CoordTransform::between(&CRS::from_wkt("LOCAL_CS[\"x\"]"), &wgs).is_err());
    }

    #[test]
    fn between_utm_pairs() {
        let wgs = CRS::wgs84();
        let utm30 = CRS::utm(30, true);

        let fwd = CoordTransform::between(&wgs, &utm30).unwrap();
        let (e, n) = fwd.apply(-3.7037, 40.4168);
        assert_close(e, 440_298.94, 1.0, "easting");
        assert_close(n, 4_474_257.31, 1.0, "northing");

        let inv = CoordTransform::between(&utm30, &wgs).unwrap();
        let (lon, lat) = inv.apply(e, n);
        assert_close(lon, -3.7037, 1e-5, "longitude");
        assert_close(lat, 40.4168, 1e-5, "latitude");
    }

    #[test]
    fn cross_zone_matches_direct_projection() {
        // A point in zone 31 projected via zone 30 coordinates
        let (lon, lat) = (0.5, 42.0);
        let in_zone30 = wgs84_to_utm(lon, lat, 30, true);

        let chained = CoordTransform::UtmToUtm {
            from_zone: 30,
            from_north: true,
            to_zone: 31,
            to_north: true,
        };
        let (ce, cn) = chained.apply(in_zone30.0, in_zone30.1);

        let (de, dn) = wgs84_to_utm(lon, lat, 31, true);
        assert_close(ce, de, 0.01, "chained easting");
        assert_close(cn, dn, 0.01, "chained northing");
    }

    #[test]
    fn polygon_reprojects_per_vertex() {
        let poly = polygon![
            (x: -3.75, y: 40.40),
            (x: -3.70, y: 40.40),
            (x: -3.70, y: 40.45),
            (x: -3.75, y: 40.45),
            (x: -3.75, y: 40.40),
        ];

        let t = CoordTransform::between(&CRS::wgs84(), &CRS::utm(30, true)).unwrap();
        let projected = reproject_geometry(&Geometry::Polygon(poly.clone()), &t);

        let Geometry::Polygon(p) = projected else {
            panic!("expected a polygon back");
        };
        // All vertices now in metres
        for c in p.exterior().coords() {
            assert!(c.x > 100_000.0, "easting in metres, got {}", c.x);
            assert!(c.y > 4_000_000.0, "northing in metres, got {}", c.y);
        }

        // Back again matches the original vertices
        let back = reproject_geometry(
            &Geometry::Polygon(p),
            &CoordTransform::between(&CRS::utm(30, true), &CRS::wgs84()).unwrap(),
        );
        let Geometry::Polygon(b) = back else {
            panic!("expected a polygon back");
        };
        for (orig, round) in poly.exterior().coords().zip(b.exterior().coords()) {
            assert_close(round.x, orig.x, 1e-6, "roundtrip x");
            assert_close(round.y, orig.y, 1e-6, "roundtrip y");
        }
    }
}
