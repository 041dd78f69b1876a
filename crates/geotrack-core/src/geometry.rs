//! # Geometry Engine
//!
//! Pure containment and distance functions for geofence zones.
//!
//! ## Distance Model
//!
//! Circular zones use the haversine great-circle distance on a spherical
//! earth (mean radius 6 371 008.8 m). Against the WGS84 ellipsoid the error
//! stays below 0.5% at any latitude, well inside the 1% budget for zone
//! radii between 10 m and 5 km.
//!
//! ## Polygon Model
//!
//! Polygon zones are projected onto a local tangent plane (equirectangular
//! projection centred on the vertex centroid) and tested with ray casting.
//! The projection is only accurate for sites spanning a few kilometres;
//! [`MAX_POLYGON_SPAN_M`] bounds the accepted extent.
//!
//! ## Boundary Rule
//!
//! A point within [`BOUNDARY_TOLERANCE_M`] of a zone boundary is inside.
//! Agents standing at a gate are never flagged.

use crate::coordinate::Coordinate;
use crate::geofence::ZoneShape;

/// Mean earth radius (IUGG) in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Points this close to a boundary are treated as on it.
pub const BOUNDARY_TOLERANCE_M: f64 = 1e-3;

/// Largest polygon extent accepted for the tangent-plane approximation.
pub const MAX_POLYGON_SPAN_M: f64 = 50_000.0;

/// Whether `point` lies inside `shape`. Boundary-inclusive.
pub fn contains(shape: &ZoneShape, point: &Coordinate) -> bool {
    match shape {
        ZoneShape::Circle { center, radius_m } => {
            haversine_distance_m(center, point) <= radius_m + BOUNDARY_TOLERANCE_M
        }
        ZoneShape::Polygon { vertices } => polygon_contains(vertices, point),
    }
}

/// Distance in meters from `point` to the nearest part of `shape`.
/// Zero when the point is inside. Informational only.
pub fn distance_outside_m(shape: &ZoneShape, point: &Coordinate) -> f64 {
    match shape {
        ZoneShape::Circle { center, radius_m } => {
            (haversine_distance_m(center, point) - radius_m).max(0.0)
        }
        ZoneShape::Polygon { vertices } => {
            if polygon_contains(vertices, point) {
                return 0.0;
            }
            let plane = LocalPlane::centered_on(vertices);
            let projected = plane.project_all(vertices);
            distance_to_boundary(&projected, plane.project(point))
        }
    }
}

/// Great-circle distance between two coordinates in meters (haversine).
pub fn haversine_distance_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude().to_radians();
    let lat2 = b.latitude().to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude() - a.longitude()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// The coordinate reached by travelling `distance_m` from `origin` along
/// the initial bearing `bearing_deg` (clockwise from north).
pub fn destination(origin: &Coordinate, bearing_deg: f64, distance_m: f64) -> Coordinate {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let lat1 = origin.latitude().to_radians();
    let lon1 = origin.longitude().to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    Coordinate::normalized(lat2.to_degrees(), lon2.to_degrees())
}

/// Signed area in square meters of a polygon on its local tangent plane.
pub(crate) fn polygon_area_m2(vertices: &[Coordinate]) -> f64 {
    let plane = LocalPlane::centered_on(vertices);
    let pts = plane.project_all(vertices);
    let n = pts.len();
    let mut twice_area = 0.0;
    for i in 0..n {
        let (x1, y1) = pts[i];
        let (x2, y2) = pts[(i + 1) % n];
        twice_area += x1 * y2 - x2 * y1;
    }
    twice_area / 2.0
}

/// First pair of non-adjacent edges that touch or cross, as indices of
/// their starting vertices. `None` for a simple ring.
pub(crate) fn crossing_edges(vertices: &[Coordinate]) -> Option<(usize, usize)> {
    let n = vertices.len();
    if n < 4 {
        return None;
    }
    let plane = LocalPlane::centered_on(vertices);
    let pts = plane.project_all(vertices);
    for i in 0..n {
        // Edges sharing a vertex with edge `i` are skipped, including the closing edge.
        let last = if i == 0 { n - 1 } else { n };
        for j in (i + 2)..last {
            if segments_intersect(pts[i], pts[(i + 1) % n], pts[j], pts[(j + 1) % n]) {
                return Some((i, j));
            }
        }
    }
    None
}

fn segments_intersect(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> bool {
    let (o1, o2) = (orientation(a, b, c), orientation(a, b, d));
    let (o3, o4) = (orientation(c, d, a), orientation(c, d, b));
    if o1 * o2 < 0 && o3 * o4 < 0 {
        return true;
    }
    (o1 == 0 && on_segment(a, b, c))
        || (o2 == 0 && on_segment(a, b, d))
        || (o3 == 0 && on_segment(c, d, a))
        || (o4 == 0 && on_segment(c, d, b))
}

/// Sign of the turn a -> b -> c; zero when collinear within a square millimetre.
fn orientation((ax, ay): (f64, f64), (bx, by): (f64, f64), (cx, cy): (f64, f64)) -> i8 {
    let cross = (bx - ax) * (cy - ay) - (by - ay) * (cx - ax);
    if cross.abs() < 1e-6 {
        0
    } else if cross > 0.0 {
        1
    } else {
        -1
    }
}

/// Whether collinear point `p` lies within the bounding box of segment a-b.
fn on_segment((ax, ay): (f64, f64), (bx, by): (f64, f64), (px, py): (f64, f64)) -> bool {
    px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}

fn polygon_contains(vertices: &[Coordinate], point: &Coordinate) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let plane = LocalPlane::centered_on(vertices);
    let pts = plane.project_all(vertices);
    let p = plane.project(point);

    if distance_to_boundary(&pts, p) <= BOUNDARY_TOLERANCE_M {
        return true;
    }
    ray_cast(&pts, p)
}

/// Even-odd rule. Casts a ray towards +x and counts edge crossings.
fn ray_cast(pts: &[(f64, f64)], (px, py): (f64, f64)) -> bool {
    let mut inside = false;
    let mut j = pts.len() - 1;
    for i in 0..pts.len() {
        let (xi, yi) = pts[i];
        let (xj, yj) = pts[j];
        if (yi > py) != (yj > py) {
            let x_cross = xi + (py - yi) * (xj - xi) / (yj - yi);
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn distance_to_boundary(pts: &[(f64, f64)], p: (f64, f64)) -> f64 {
    let n = pts.len();
    (0..n)
        .map(|i| segment_distance(p, pts[i], pts[(i + 1) % n]))
        .fold(f64::INFINITY, f64::min)
}

fn segment_distance((px, py): (f64, f64), (ax, ay): (f64, f64), (bx, by): (f64, f64)) -> f64 {
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

/// Wrap a longitude difference into `[-180, 180)`.
fn wrap_degrees(d: f64) -> f64 {
    (d + 180.0).rem_euclid(360.0) - 180.0
}

/// Equirectangular projection around a reference point, in meters.
struct LocalPlane {
    lat0: f64,
    lon0: f64,
    cos_lat0: f64,
}

impl LocalPlane {
    fn centered_on(vertices: &[Coordinate]) -> Self {
        let n = vertices.len().max(1) as f64;
        let first_lon = vertices.first().map(|v| v.longitude()).unwrap_or(0.0);
        let lat0 = vertices.iter().map(|v| v.latitude()).sum::<f64>() / n;
        // Offsets from the first vertex keep antimeridian-straddling sites contiguous.
        let lon_offset = vertices
            .iter()
            .map(|v| wrap_degrees(v.longitude() - first_lon))
            .sum::<f64>()
            / n;
        Self {
            lat0,
            lon0: first_lon + lon_offset,
            cos_lat0: lat0.to_radians().cos(),
        }
    }

    fn project(&self, c: &Coordinate) -> (f64, f64) {
        let x = wrap_degrees(c.longitude() - self.lon0).to_radians() * EARTH_RADIUS_M * self.cos_lat0;
        let y = (c.latitude() - self.lat0).to_radians() * EARTH_RADIUS_M;
        (x, y)
    }

    fn project_all(&self, vertices: &[Coordinate]) -> Vec<(f64, f64)> {
        vertices.iter().map(|v| self.project(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn circle(center: Coordinate, radius_m: f64) -> ZoneShape {
        ZoneShape::Circle { center, radius_m }
    }

    /// Roughly 100 m x 100 m square near Karachi.
    fn square() -> ZoneShape {
        ZoneShape::Polygon {
            vertices: vec![
                coord(24.8600, 67.0100),
                coord(24.8600, 67.0110),
                coord(24.8609, 67.0110),
                coord(24.8609, 67.0100),
            ],
        }
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let d = haversine_distance_m(&coord(0.0, 0.0), &coord(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn haversine_is_symmetric_and_zero_on_identity() {
        let a = coord(51.5, -0.12);
        let b = coord(48.85, 2.35);
        assert_eq!(haversine_distance_m(&a, &a), 0.0);
        let ab = haversine_distance_m(&a, &b);
        let ba = haversine_distance_m(&b, &a);
        assert!((ab - ba).abs() < 1e-6);
        // London to Paris is about 343 km.
        assert!((ab - 343_500.0).abs() < 2_000.0, "got {ab}");
    }

    #[test]
    fn destination_round_trips_through_haversine() {
        let origin = coord(24.86, 67.01);
        for bearing in [0.0, 45.0, 90.0, 180.0, 270.0, 359.0] {
            let p = destination(&origin, bearing, 60.0);
            let d = haversine_distance_m(&origin, &p);
            assert!((d - 60.0).abs() < 1e-6, "bearing {bearing}: {d}");
        }
    }

    #[test]
    fn circle_inside_outside_and_boundary() {
        let center = coord(24.86, 67.01);
        let zone = circle(center, 50.0);
        assert!(contains(&zone, &center));
        assert!(contains(&zone, &destination(&center, 10.0, 10.0)));
        assert!(contains(&zone, &destination(&center, 90.0, 50.0)));
        assert!(!contains(&zone, &destination(&center, 90.0, 60.0)));
    }

    #[test]
    fn circle_distance_outside() {
        let center = coord(24.86, 67.01);
        let zone = circle(center, 50.0);
        assert_eq!(distance_outside_m(&zone, &center), 0.0);
        let d = distance_outside_m(&zone, &destination(&center, 0.0, 60.0));
        assert!((d - 10.0).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn polygon_inside_and_outside() {
        let zone = square();
        assert!(contains(&zone, &coord(24.86045, 67.0105)));
        assert!(!contains(&zone, &coord(24.8620, 67.0105)));
        assert!(!contains(&zone, &coord(24.86045, 67.0120)));
    }

    #[test]
    fn polygon_edges_and_vertices_are_inside() {
        let zone = square();
        // Midpoint of the southern edge.
        assert!(contains(&zone, &coord(24.8600, 67.0105)));
        // A vertex.
        assert!(contains(&zone, &coord(24.8609, 67.0110)));
    }

    #[test]
    fn concave_polygon_notch_is_outside() {
        // L-shape: the upper-right quadrant is cut away.
        let zone = ZoneShape::Polygon {
            vertices: vec![
                coord(0.000, 0.000),
                coord(0.000, 0.002),
                coord(0.001, 0.002),
                coord(0.001, 0.001),
                coord(0.002, 0.001),
                coord(0.002, 0.000),
            ],
        };
        assert!(contains(&zone, &coord(0.0005, 0.0015)));
        assert!(contains(&zone, &coord(0.0015, 0.0005)));
        assert!(!contains(&zone, &coord(0.0015, 0.0015)));
    }

    #[test]
    fn polygon_distance_outside() {
        let zone = square();
        assert_eq!(distance_outside_m(&zone, &coord(24.86045, 67.0105)), 0.0);
        // 0.0001 degrees of latitude north of the northern edge is about 11.1 m.
        let d = distance_outside_m(&zone, &coord(24.8610, 67.0105));
        assert!((d - 11.12).abs() < 0.1, "got {d}");
    }

    #[test]
    fn polygon_straddling_antimeridian() {
        let zone = ZoneShape::Polygon {
            vertices: vec![
                coord(-0.001, 179.999),
                coord(-0.001, -179.999),
                coord(0.001, -179.999),
                coord(0.001, 179.999),
            ],
        };
        assert!(contains(&zone, &coord(0.0, 180.0)));
        assert!(contains(&zone, &coord(0.0, -179.9995)));
        assert!(!contains(&zone, &coord(0.0, 0.0)));
    }

    #[test]
    fn signed_area_of_square() {
        let ZoneShape::Polygon { vertices } = square() else {
            unreachable!()
        };
        let area = polygon_area_m2(&vertices).abs();
        // About 101 m x 100 m.
        assert!((area - 10_100.0).abs() < 300.0, "got {area}");
    }

    // ── Property tests ───────────────────────────────────────────────

    /// Convex hull (monotone chain) in degree space. The equirectangular
    /// projection is linear in degrees, so hull membership carries over.
    fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
        let mut pts = points.to_vec();
        pts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        pts.dedup();
        if pts.len() < 3 {
            return pts;
        }
        let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
            (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
        };
        let mut lower: Vec<(f64, f64)> = Vec::new();
        for &p in &pts {
            while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
                lower.pop();
            }
            lower.push(p);
        }
        let mut upper: Vec<(f64, f64)> = Vec::new();
        for &p in pts.iter().rev() {
            while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
                upper.pop();
            }
            upper.push(p);
        }
        lower.pop();
        upper.pop();
        lower.extend(upper);
        lower
    }

    /// Whether `p` lies outside the counter-clockwise hull by more than `margin` degrees.
    fn clearly_outside_hull(hull: &[(f64, f64)], p: (f64, f64), margin: f64) -> bool {
        if hull.len() < 3 {
            return true;
        }
        (0..hull.len()).any(|i| {
            let a = hull[i];
            let b = hull[(i + 1) % hull.len()];
            let len = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
            let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
            len > 0.0 && cross / len < -margin
        })
    }

    proptest! {
        /// Points strictly within the radius are contained.
        #[test]
        fn circle_contains_points_within_radius(
            lat in -80.0f64..80.0,
            lon in -179.0f64..179.0,
            radius in 10.0f64..5_000.0,
            bearing in 0.0f64..360.0,
            fraction in 0.0f64..0.99,
        ) {
            let center = coord(lat, lon);
            let zone = circle(center, radius);
            let p = destination(&center, bearing, radius * fraction);
            prop_assert!(contains(&zone, &p));
        }

        /// Points strictly beyond the radius are not contained.
        #[test]
        fn circle_excludes_points_beyond_radius(
            lat in -80.0f64..80.0,
            lon in -179.0f64..179.0,
            radius in 10.0f64..5_000.0,
            bearing in 0.0f64..360.0,
            fraction in 1.01f64..3.0,
        ) {
            let center = coord(lat, lon);
            let zone = circle(center, radius);
            let p = destination(&center, bearing, radius * fraction);
            prop_assert!(!contains(&zone, &p));
        }

        /// Points exactly on the circle are contained.
        #[test]
        fn circle_boundary_is_inclusive(
            lat in -80.0f64..80.0,
            lon in -179.0f64..179.0,
            radius in 10.0f64..5_000.0,
            bearing in 0.0f64..360.0,
        ) {
            let center = coord(lat, lon);
            let zone = circle(center, radius);
            let p = destination(&center, bearing, radius);
            prop_assert!(contains(&zone, &p));
        }

        /// A point outside the convex hull of a polygon is never contained.
        #[test]
        fn polygon_never_contains_points_outside_hull(
            base_lat in -60.0f64..60.0,
            base_lon in -170.0f64..170.0,
            offsets in prop::collection::vec((-0.01f64..0.01, -0.01f64..0.01), 3..9),
            probe in (-0.03f64..0.03, -0.03f64..0.03),
        ) {
            let vertices: Vec<Coordinate> = offsets
                .iter()
                .map(|(dlat, dlon)| coord(base_lat + dlat, base_lon + dlon))
                .collect();
            let hull = convex_hull(&offsets.iter().map(|(a, b)| (*b, *a)).collect::<Vec<_>>());
            prop_assume!(clearly_outside_hull(&hull, (probe.1, probe.0), 1e-6));

            let zone = ZoneShape::Polygon { vertices };
            let point = coord(base_lat + probe.0, base_lon + probe.1);
            prop_assert!(!contains(&zone, &point));
        }

        /// Containment is deterministic.
        #[test]
        fn containment_is_idempotent(
            lat in -60.0f64..60.0,
            lon in -170.0f64..170.0,
            dlat in -0.002f64..0.002,
            dlon in -0.002f64..0.002,
        ) {
            let zone = ZoneShape::Polygon {
                vertices: vec![
                    coord(lat, lon),
                    coord(lat, lon + 0.001),
                    coord(lat + 0.001, lon + 0.001),
                    coord(lat + 0.001, lon),
                ],
            };
            let p = coord(lat + dlat, lon + dlon);
            prop_assert_eq!(contains(&zone, &p), contains(&zone, &p));
        }
    }
}
