//! End-to-end pipeline tests on in-memory grids: index computation,
//! differencing, classification, vectorization and zonal aggregation
//! chained the way a serving layer would drive them.

use std::collections::HashMap;

use approx::assert_relative_eq;
use geo::Area;
use geo_types::{Coord, Geometry, LineString, Polygon};
use verdelta_core::io::write_geotiff;
use verdelta_engine::prelude::*;

fn make_grid(rows: usize, cols: usize, values: &[f64]) -> Grid<f64> {
    let mut g = Grid::from_vec(values.to_vec(), rows, cols).unwrap();
    g.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
    g
}

fn constant_grid(rows: usize, cols: usize, value: f64) -> Grid<f64> {
    make_grid(rows, cols, &vec![value; rows * cols])
}

fn square_zone(x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
    Feature::new(Geometry::Polygon(Polygon::new(
        LineString(vec![
            Coord { x: x0, y: y0 },
            Coord { x: x1, y: y0 },
            Coord { x: x1, y: y1 },
            Coord { x: x0, y: y1 },
            Coord { x: x0, y: y0 },
        ]),
        vec![],
    )))
}

// ---------------------------------------------------------------------------
// Index algebra
// ---------------------------------------------------------------------------

#[test]
fn ndvi_from_known_red_nir_bands() {
    let red = make_grid(
        3,
        3,
        &[100.0, 150.0, 200.0, 120.0, 160.0, 210.0, 130.0, 170.0, 220.0],
    );
    let nir = make_grid(
        3,
        3,
        &[200.0, 250.0, 300.0, 220.0, 260.0, 310.0, 230.0, 270.0, 320.0],
    );

    let index = ndvi(&nir, &red).unwrap();

    let expected = [
        [0.333, 0.250, 0.200],
        [0.294, 0.238, 0.192],
        [0.278, 0.227, 0.185],
    ];
    for (row, row_expected) in expected.iter().enumerate() {
        for (col, &e) in row_expected.iter().enumerate() {
            let v = index.get(row, col).unwrap();
            assert!(
                (v - e).abs() < 5e-4,
                "({row},{col}): expected {e}, got {v}"
            );
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}

#[test]
fn index_values_stay_clamped_for_extreme_inputs() {
    let a = make_grid(2, 2, &[1.0, -0.5, 1000.0, 0.0]);
    let b = make_grid(2, 2, &[-0.9, 0.3, -999.0, 0.0]);

    let index = normalized_difference(&a, &b).unwrap();
    for row in 0..2 {
        for col in 0..2 {
            let v = index.get(row, col).unwrap();
            assert!((-1.0..=1.0).contains(&v), "({row},{col}) out of range: {v}");
        }
    }
    // Zero denominator convention
    assert_eq!(index.get(1, 1).unwrap(), 0.0);
}

#[test]
fn generic_formula_matches_builtin_index() {
    let nir = constant_grid(3, 3, 0.8);
    let red = constant_grid(3, 3, 0.2);

    let mut grids = HashMap::new();
    grids.insert("NIR", &nir);
    grids.insert("Red", &red);
    let from_formula = grid_calc("(NIR - Red) / (NIR + Red)", &grids).unwrap();
    let builtin = ndvi(&nir, &red).unwrap();

    for row in 0..3 {
        for col in 0..3 {
            let a = from_formula.get(row, col).unwrap();
            let b = builtin.get(row, col).unwrap();
            assert!((a - b).abs() < 1e-12);
        }
    }
}

// ---------------------------------------------------------------------------
// Differencing and classification
// ---------------------------------------------------------------------------

#[test]
fn difference_is_antisymmetric_over_varied_data() {
    let values_1: Vec<f64> = (0..16).map(|i| (i as f64) * 0.05 - 0.3).collect();
    let values_2: Vec<f64> = (0..16).map(|i| 0.6 - (i as f64) * 0.04).collect();
    let mut t1 = make_grid(4, 4, &values_1);
    t1.set(2, 1, f64::NAN).unwrap();
    let t2 = make_grid(4, 4, &values_2);

    let fwd = difference(&t1, &t2).unwrap();
    let rev = difference(&t2, &t1).unwrap();

    for row in 0..4 {
        for col in 0..4 {
            let f = fwd.get(row, col).unwrap();
            let r = rev.get(row, col).unwrap();
            if (row, col) == (2, 1) {
                assert!(f.is_nan() && r.is_nan());
            } else {
                assert!((f + r).abs() < 1e-12, "({row},{col}): {f} vs {r}");
            }
        }
    }
}

#[test]
fn mismatched_grids_must_not_difference_silently() {
    let t1 = constant_grid(4, 4, 0.5);
    let t2 = constant_grid(5, 4, 0.5);
    assert!(matches!(difference(&t1, &t2), Err(Error::Alignment(_))));

    let mut shifted = constant_grid(4, 4, 0.5);
    shifted.set_transform(GeoTransform::new(100.0, 4.0, 1.0, -1.0));
    assert!(matches!(
        difference(&t1, &shifted),
        Err(Error::Alignment(_))
    ));
}

#[test]
fn loss_scenario_full_extent_polygon() {
    // t1 = 0.5 everywhere, t2 = 0.2 everywhere: difference −0.3 is below
    // the −0.2 loss threshold on every cell
    let t1 = constant_grid(4, 4, 0.5);
    let t2 = constant_grid(4, 4, 0.2);

    let diff = difference(&t1, &t2).unwrap();
    let mask = classify(&diff, -0.2, CompareOp::Less).unwrap();
    for row in 0..4 {
        for col in 0..4 {
            assert_eq!(mask.get(row, col).unwrap(), MASK_FOREGROUND);
        }
    }

    let regions = vectorize(&mask, Connectivity::Four).unwrap();
    assert_eq!(regions.len(), 1);

    let Some(Geometry::Polygon(poly)) = regions.features[0].geometry.as_ref() else {
        panic!("expected a polygon");
    };
    assert!((poly.unsigned_area() - 16.0).abs() < 1e-10);
    assert_eq!(
        regions.features[0].get_property("pixel_count"),
        Some(&AttributeValue::Int(16))
    );
}

// ---------------------------------------------------------------------------
// Vectorization properties
// ---------------------------------------------------------------------------

#[test]
fn all_nodata_grid_vectorizes_to_empty_collection() {
    let mut diff = constant_grid(4, 4, f64::NAN);
    diff.set_nodata(Some(f64::NAN));

    let mask = classify(&diff, -0.2, CompareOp::Less).unwrap();
    let regions = vectorize(&mask, Connectivity::Four).unwrap();
    assert!(regions.is_empty());
}

#[test]
fn vectorize_twice_yields_identical_collections() {
    let values: Vec<f64> = (0..25)
        .map(|i| if i % 7 == 0 { -0.5 } else { 0.1 })
        .collect();
    let diff = make_grid(5, 5, &values);
    let mask = classify(&diff, -0.2, CompareOp::Less).unwrap();

    let a = vectorize(&mask, Connectivity::Four).unwrap();
    let b = vectorize(&mask, Connectivity::Four).unwrap();

    assert_eq!(a.len(), b.len());
    for (fa, fb) in a.features.iter().zip(b.features.iter()) {
        assert_eq!(format!("{:?}", fa.geometry), format!("{:?}", fb.geometry));
        assert_eq!(
            fa.get_property("pixel_count"),
            fb.get_property("pixel_count")
        );
    }
}

// ---------------------------------------------------------------------------
// Zonal aggregation
// ---------------------------------------------------------------------------

#[test]
fn quadrant_zone_means_over_constant_raster() {
    let raster = constant_grid(4, 4, 0.5);

    let mut zones = FeatureCollection::new();
    zones.push(square_zone(0.0, 2.0, 2.0, 4.0));
    zones.push(square_zone(2.0, 2.0, 4.0, 4.0));
    zones.push(square_zone(0.0, 0.0, 2.0, 2.0));
    zones.push(square_zone(2.0, 0.0, 4.0, 2.0));

    let enriched = run_zonal_stats(ZonalStatsRequest {
        raster: raster.into(),
        zones,
        stats: vec![ZonalStatistic::Mean, ZonalStatistic::Count],
        categorical: false,
    })
    .unwrap();

    assert_eq!(enriched.len(), 4);
    for feature in enriched.iter() {
        assert_eq!(
            feature
                .get_property("zonal_mean")
                .and_then(AttributeValue::as_f64),
            Some(0.5)
        );
        assert_eq!(
            feature.get_property("zonal_count"),
            Some(&AttributeValue::Int(4))
        );
    }
}

#[test]
fn zone_without_coverage_does_not_poison_the_batch() {
    let raster = constant_grid(4, 4, 1.0);

    let mut zones = FeatureCollection::new();
    zones.push(square_zone(0.0, 0.0, 4.0, 4.0));
    zones.push(square_zone(500.0, 500.0, 510.0, 510.0));
    zones.push(Feature::empty());

    let summaries = zone_summaries(&raster, &zones, false).unwrap();
    assert_eq!(summaries.len(), 3);
    assert_eq!(summaries[0].count, Some(16));
    assert_eq!(summaries[1].count, None);
    assert_eq!(summaries[1].mean, None);
    assert_eq!(summaries[2].count, None);
}

// ---------------------------------------------------------------------------
// Full change-detection requests
// ---------------------------------------------------------------------------

#[test]
fn change_request_with_gain_comparison() {
    let t1 = constant_grid(4, 4, 0.2);
    let t2 = constant_grid(4, 4, 0.6);

    let regions = run_change_detection(ChangeDetectionRequest {
        grid_t1: t1.into(),
        grid_t2: t2.into(),
        threshold: 0.2,
        comparison: CompareOp::Greater,
        mask_zones: None,
        min_region_pixels: 1,
    })
    .unwrap();

    assert_eq!(regions.len(), 1);
}

#[test]
fn change_request_with_no_change_returns_empty() {
    let t1 = constant_grid(4, 4, 0.5);
    let t2 = constant_grid(4, 4, 0.5);

    let regions = run_change_detection(ChangeDetectionRequest {
        grid_t1: t1.into(),
        grid_t2: t2.into(),
        threshold: -0.2,
        comparison: CompareOp::Less,
        mask_zones: None,
        min_region_pixels: 1,
    })
    .unwrap();

    assert!(regions.is_empty());
}

#[test]
fn clip_then_aggregate_matches_direct_zonal_result() {
    let values: Vec<f64> = (0..16).map(|i| i as f64).collect();
    let raster = make_grid(4, 4, &values);
    let zone = square_zone(0.0, 2.0, 2.0, 4.0);

    let clipped = clip(
        &raster,
        zone.geometry.as_ref().unwrap(),
        None,
    )
    .unwrap();
    let clipped_stats = clipped.statistics();

    let mut zones = FeatureCollection::new();
    zones.push(zone);
    let summaries = zone_summaries(&raster, &zones, false).unwrap();

    assert_eq!(clipped_stats.valid_count as u64, summaries[0].count.unwrap());
    let mean = summaries[0].mean.unwrap();
    assert!((clipped_stats.mean.unwrap() - mean).abs() < 1e-12);
}

#[test]
fn path_sourced_raster_reads_back_through_geotiff() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.tif");
    write_geotiff(&constant_grid(4, 4, 0.5), &path, None).unwrap();

    let mut zones = FeatureCollection::new();
    zones.push(square_zone(0.0, 0.0, 4.0, 4.0));

    let enriched = run_zonal_stats(ZonalStatsRequest {
        raster: GridSource::path(&path),
        zones,
        stats: vec![ZonalStatistic::Mean, ZonalStatistic::Count],
        categorical: false,
    })
    .unwrap();

    let mean = enriched.features[0]
        .get_property("zonal_mean")
        .and_then(AttributeValue::as_f64)
        .unwrap();
    assert_relative_eq!(mean, 0.5, epsilon = 1e-6);
    assert_eq!(
        enriched.features[0].get_property("zonal_count"),
        Some(&AttributeValue::Int(16))
    );
}

#[test]
fn point_samples_follow_input_order() {
    let values: Vec<f64> = (0..16).map(|i| i as f64).collect();
    let raster = make_grid(4, 4, &values);

    let points = [(3.5, 0.5), (0.5, 3.5), (99.0, 99.0)];
    let sampled = sample_at_points(&raster, &points, None).unwrap();

    assert_eq!(sampled[0], 15.0);
    assert_eq!(sampled[1], 0.0);
    assert!(sampled[2].is_nan());
}
