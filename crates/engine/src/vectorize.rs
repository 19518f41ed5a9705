//! Mask vectorization
//!
//! Converts connected regions of equal mask value into polygon features.
//! Region boundaries are traced along pixel edges, so output polygons
//! reproduce the raster footprint exactly, holes included.

use std::collections::{BTreeMap, VecDeque};

use geo::orient::{Direction, Orient};
use geo_types::{Coord, Geometry, LineString, MultiPolygon, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use verdelta_core::raster::{GeoTransform, Grid};
use verdelta_core::vector::{AttributeValue, Feature, FeatureCollection};
use verdelta_core::Result;

use crate::change::MASK_BACKGROUND;

/// Pixel connectivity for region growing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// Edge neighbours only
    #[default]
    Four,
    /// Edge and corner neighbours
    Eight,
}

impl Connectivity {
    fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            Self::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
            Self::Eight => &[
                (-1, 0),
                (1, 0),
                (0, -1),
                (0, 1),
                (-1, -1),
                (-1, 1),
                (1, -1),
                (1, 1),
            ],
        }
    }
}

/// Vectorize a mask into one polygon feature per connected region.
///
/// Background cells (value 0) and nodata cells are excluded; every other
/// value is treated as a class code and grouped into maximal connected
/// regions of equal value. Each feature carries `value` and `pixel_count`
/// attributes. Features appear in raster scan order of each region's
/// first-encountered pixel, so output order is deterministic.
///
/// A mask with no foreground cells yields an empty collection carrying
/// the mask's CRS.
pub fn vectorize(mask: &Grid<u8>, connectivity: Connectivity) -> Result<FeatureCollection> {
    let (rows, cols) = mask.shape();
    let offsets = connectivity.offsets();

    // 0 = unlabeled; labels are assigned in scan order
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut next_label = 0u32;

    let mut collection = FeatureCollection {
        features: Vec::new(),
        crs: mask.crs().cloned(),
    };

    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

    for row in 0..rows {
        for col in 0..cols {
            if labels[(row, col)] != 0 {
                continue;
            }
            let value = unsafe { mask.get_unchecked(row, col) };
            if value == MASK_BACKGROUND || mask.is_nodata(value) {
                continue;
            }

            next_label += 1;
            let label = next_label;
            labels[(row, col)] = label;
            queue.push_back((row, col));

            let mut region = Vec::new();
            while let Some((r, c)) = queue.pop_front() {
                region.push((r, c));
                for &(dr, dc) in offsets {
                    let nr = r as isize + dr;
                    let nc = c as isize + dc;
                    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    if labels[(nr, nc)] != 0 {
                        continue;
                    }
                    if unsafe { mask.get_unchecked(nr, nc) } != value {
                        continue;
                    }
                    labels[(nr, nc)] = label;
                    queue.push_back((nr, nc));
                }
            }

            let rings = boundary_rings(&labels, label, &region);
            let geometry = assemble_geometry(mask.transform(), rings);

            let mut feature = Feature::new(geometry);
            feature.set_property("value", AttributeValue::Int(value as i64));
            feature.set_property("pixel_count", AttributeValue::Int(region.len() as i64));
            collection.push(feature);
        }
    }

    tracing::debug!(regions = collection.len(), "vectorized mask");
    Ok(collection)
}

/// Drop features whose `pixel_count` falls below `min_pixels`
pub fn filter_min_region(mut collection: FeatureCollection, min_pixels: u64) -> FeatureCollection {
    if min_pixels <= 1 {
        return collection;
    }
    collection.features.retain(|f| {
        f.get_property("pixel_count")
            .and_then(AttributeValue::as_i64)
            .is_some_and(|n| n >= min_pixels as i64)
    });
    collection
}

/// A closed boundary ring in pixel-corner coordinates `(col, row)`,
/// with its shoelace area (positive = exterior, negative = hole)
struct PixelRing {
    corners: Vec<(i64, i64)>,
    area: f64,
}

/// Trace the boundary rings of one labeled region.
///
/// Every pixel edge with a non-region cell on the other side becomes a
/// directed edge keeping the region on its right; chaining the edges
/// yields closed rings. In row-down corner coordinates exterior rings
/// close with positive shoelace area and cavity rings with negative.
fn boundary_rings(labels: &Array2<u32>, label: u32, region: &[(usize, usize)]) -> Vec<PixelRing> {
    let (rows, cols) = labels.dim();
    let in_region = |r: i64, c: i64| -> bool {
        r >= 0
            && c >= 0
            && (r as usize) < rows
            && (c as usize) < cols
            && labels[(r as usize, c as usize)] == label
    };

    // Directed edges keyed by start corner; values sorted for determinism
    let mut edges: BTreeMap<(i64, i64), Vec<(i64, i64)>> = BTreeMap::new();
    for &(r, c) in region {
        let (r, c) = (r as i64, c as i64);
        if !in_region(r - 1, c) {
            edges.entry((c, r)).or_default().push((c + 1, r));
        }
        if !in_region(r, c + 1) {
            edges.entry((c + 1, r)).or_default().push((c + 1, r + 1));
        }
        if !in_region(r + 1, c) {
            edges.entry((c + 1, r + 1)).or_default().push((c, r + 1));
        }
        if !in_region(r, c - 1) {
            edges.entry((c, r + 1)).or_default().push((c, r));
        }
    }
    for targets in edges.values_mut() {
        targets.sort_unstable();
    }

    let mut rings = Vec::new();
    while let Some((&start, _)) = edges.iter().next() {
        let Some(first) = take_edge(&mut edges, start, None) else {
            break;
        };
        let mut corners = vec![start, first];
        let mut prev = start;
        let mut current = first;

        while current != start {
            let incoming = (current.0 - prev.0, current.1 - prev.1);
            let Some(next) = take_edge(&mut edges, current, Some(incoming)) else {
                // Boundary edges of a labeled region always chain into
                // closed rings; an open chain means corrupted labels.
                debug_assert!(false, "open boundary chain at {:?}", current);
                break;
            };
            corners.push(next);
            prev = current;
            current = next;
        }

        let area = shoelace(&corners);
        rings.push(PixelRing { corners, area });
    }

    rings
}

/// Remove and return one outgoing edge at `corner`.
///
/// With an incoming direction, prefers the sharpest right turn (then
/// straight, left, reverse) so rings pinched at a shared corner never
/// cross into each other. Without one, takes the smallest target.
fn take_edge(
    edges: &mut BTreeMap<(i64, i64), Vec<(i64, i64)>>,
    corner: (i64, i64),
    incoming: Option<(i64, i64)>,
) -> Option<(i64, i64)> {
    let targets = edges.get_mut(&corner)?;

    let index = match incoming {
        Some((dx, dy)) => {
            // Right turn first, in row-down screen coordinates
            let preference = [(-dy, dx), (dx, dy), (dy, -dx), (-dx, -dy)];
            preference.iter().find_map(|&(px, py)| {
                let want = (corner.0 + px, corner.1 + py);
                targets.iter().position(|&t| t == want)
            })?
        }
        None => 0,
    };

    let target = targets.remove(index);
    if targets.is_empty() {
        edges.remove(&corner);
    }
    Some(target)
}

/// Twice-signed shoelace area over a closed ring, halved
fn shoelace(corners: &[(i64, i64)]) -> f64 {
    let mut sum = 0i64;
    for pair in corners.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        sum += x0 * y1 - x1 * y0;
    }
    sum as f64 / 2.0
}

/// Ray-cast point-in-ring test in pixel-corner coordinates
fn point_in_ring(point: (f64, f64), ring: &[(i64, i64)]) -> bool {
    let (px, py) = point;
    let mut inside = false;
    for pair in ring.windows(2) {
        let (x0, y0) = (pair[0].0 as f64, pair[0].1 as f64);
        let (x1, y1) = (pair[1].0 as f64, pair[1].1 as f64);
        if (y0 > py) != (y1 > py) {
            let x_cross = x0 + (py - y0) / (y1 - y0) * (x1 - x0);
            if px < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// A point strictly inside the cavity a hole ring encloses: the first
/// edge's midpoint stepped half a pixel to its left (the non-region side)
fn cavity_point(ring: &[(i64, i64)]) -> (f64, f64) {
    let (x0, y0) = ring[0];
    let (x1, y1) = ring[1];
    let (dx, dy) = ((x1 - x0) as f64, (y1 - y0) as f64);
    let mid = ((x0 + x1) as f64 / 2.0, (y0 + y1) as f64 / 2.0);
    (mid.0 + dy / 2.0, mid.1 - dx / 2.0)
}

/// Build the region geometry from its traced rings, in geographic
/// coordinates with normalized winding
fn assemble_geometry(transform: &GeoTransform, rings: Vec<PixelRing>) -> Geometry<f64> {
    let to_line_string = |corners: &[(i64, i64)]| -> LineString<f64> {
        LineString::from_iter(corners.iter().map(|&(c, r)| {
            let (x, y) = transform.apply(c as f64, r as f64);
            Coord { x, y }
        }))
    };

    let (exteriors, holes): (Vec<PixelRing>, Vec<PixelRing>) =
        rings.into_iter().partition(|ring| ring.area > 0.0);

    if exteriors.len() == 1 {
        let shell = to_line_string(&exteriors[0].corners);
        let interiors = holes.iter().map(|h| to_line_string(&h.corners)).collect();
        return Geometry::Polygon(Polygon::new(shell, interiors).orient(Direction::Default));
    }

    // A corner-connected region (8-connectivity) can close more than one
    // exterior ring; holes attach to the smallest exterior containing them.
    let mut parts: Vec<(f64, LineString<f64>, Vec<LineString<f64>>)> = exteriors
        .iter()
        .map(|e| (e.area, to_line_string(&e.corners), Vec::new()))
        .collect();

    for hole in &holes {
        let point = cavity_point(&hole.corners);
        let parent = exteriors
            .iter()
            .enumerate()
            .filter(|(_, e)| point_in_ring(point, &e.corners))
            .min_by(|(_, a), (_, b)| a.area.total_cmp(&b.area))
            .map(|(i, _)| i)
            .unwrap_or(0);
        parts[parent].2.push(to_line_string(&hole.corners));
    }

    let polygons = parts
        .into_iter()
        .map(|(_, shell, interiors)| Polygon::new(shell, interiors))
        .collect();
    Geometry::MultiPolygon(MultiPolygon(polygons).orient(Direction::Default))
}
