//! Spatial value type for gripper positioning.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An immutable position in the arm's workspace.
///
/// Carries both the Cartesian form (`x`, `y`, `z`, in millimetres) and the
/// polar form (`r`, `lng`, `lat`) of the same location. Both families are
/// populated at construction and stay consistent for the lifetime of the
/// value:
///
/// - `r` is the distance from the origin, `r >= 0`
/// - `lng` is the longitude in degrees, in `(-180, 180]`
/// - `lat` is the latitude in degrees, in `[0, 180]`, with `0` pointing
///   straight up along the z axis
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
    pub lng: f64,
    pub lat: f64,
}

impl Point {
    /// The workspace origin.
    pub const ORIGIN: Point = Point {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        r: 0.0,
        lng: 0.0,
        lat: 0.0,
    };

    /// Creates a point from Cartesian coordinates, deriving the polar form.
    ///
    /// The origin maps to all-zero polar components rather than dividing
    /// by a zero radius.
    pub fn from_cartesian(x: f64, y: f64, z: f64) -> Self {
        let r = (x * x + y * y + z * z).sqrt();
        if r == 0.0 {
            return Self::ORIGIN;
        }

        let lat = (z / r).clamp(-1.0, 1.0).acos().to_degrees();
        let mut lng = y.atan2(x).to_degrees();
        // atan2 yields [-180, 180]; fold the closed lower bound onto +180
        if lng <= -180.0 {
            lng += 360.0;
        }

        Self { x, y, z, r, lng, lat }
    }

    /// Creates a point from polar coordinates, deriving the Cartesian form.
    ///
    /// `lng` and `lat` are in degrees. The Cartesian coordinates are
    /// computed first and the stored polar components re-derived from
    /// them, so the invariant ranges hold even for denormalized input
    /// (e.g. a longitude of 270 comes back as -90).
    pub fn from_polar(r: f64, lng: f64, lat: f64) -> Self {
        let (lng, lat) = (lng.to_radians(), lat.to_radians());
        let x = r * lat.sin() * lng.cos();
        let y = r * lat.sin() * lng.sin();
        let z = r * lat.cos();
        Self::from_cartesian(x, y, z)
    }

    /// Returns the straight-line distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Returns the point a fraction `t` of the way from `self` to `target`.
    ///
    /// `t = 0` is `self`, `t = 1` is exactly `target`.
    pub fn lerp(&self, target: &Point, t: f64) -> Point {
        Point::from_cartesian(
            self.x + (target.x - self.x) * t,
            self.y + (target.y - self.y) * t,
            self.z + (target.z - self.z) * t,
        )
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_origin_has_zero_polar_components() {
        let p = Point::from_cartesian(0.0, 0.0, 0.0);
        assert_eq!(p, Point::ORIGIN);
    }

    #[test]
    fn test_cartesian_polar_roundtrip() {
        let p = Point::from_cartesian(30.0, -40.0, 120.0);
        let q = Point::from_polar(p.r, p.lng, p.lat);
        assert!((p.x - q.x).abs() < EPS);
        assert!((p.y - q.y).abs() < EPS);
        assert!((p.z - q.z).abs() < EPS);
    }

    #[test]
    fn test_longitude_range_is_half_open() {
        // Directly behind the origin: atan2 gives -180, we fold to +180
        let p = Point::from_cartesian(-10.0, 0.0, 0.0);
        assert!((p.lng - 180.0).abs() < EPS);

        let q = Point::from_cartesian(10.0, -10.0, 0.0);
        assert!((q.lng + 45.0).abs() < EPS);
    }

    #[test]
    fn test_latitude_poles() {
        let up = Point::from_cartesian(0.0, 0.0, 50.0);
        assert!(up.lat.abs() < EPS);

        let down = Point::from_cartesian(0.0, 0.0, -50.0);
        assert!((down.lat - 180.0).abs() < EPS);
    }

    #[test]
    fn test_from_polar_normalizes_longitude() {
        let p = Point::from_polar(100.0, 270.0, 90.0);
        assert!((p.lng + 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance() {
        let a = Point::from_cartesian(0.0, 0.0, 0.0);
        let b = Point::from_cartesian(3.0, 4.0, 0.0);
        assert!((a.distance(&b) - 5.0).abs() < EPS);
        assert!((b.distance(&a) - 5.0).abs() < EPS);
    }

    #[test]
    fn test_lerp_endpoints() {
        let a = Point::from_cartesian(0.0, 0.0, 0.0);
        let b = Point::from_cartesian(0.0, 170.0, 0.0);
        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
        let mid = a.lerp(&b, 0.5);
        assert!((mid.y - 85.0).abs() < EPS);
    }
}
