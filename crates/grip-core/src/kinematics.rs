//! Forward and inverse kinematics for the hip + two-link arm topology.
//!
//! The geometry is fixed: the hip rotates about the vertical axis, the
//! shoulder and elbow form a two-link planar arm in the vertical plane
//! through the hip, and a fixed-length wrist-to-hand offset extends along
//! that plane's radial direction.

use crate::error::GeometryError;
use crate::point::Point;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Unit the public kinematics API speaks in. Internal trigonometry is
/// always radians.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleUnit {
    #[default]
    Degrees,
    Radians,
}

/// One joint-angle triple in the kinematic (untrimmed) frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointAngles {
    pub hip: f64,
    pub shoulder: f64,
    pub elbow: f64,
}

/// Solver for the arm's fixed geometry.
///
/// Link lengths are in millimetres. Defaults match the stock arm:
/// 80 mm shoulder-to-elbow, 80 mm elbow-to-wrist, 60 mm wrist-to-hand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    shoulder_to_elbow: f64,
    elbow_to_wrist: f64,
    wrist_to_hand: f64,
    unit: AngleUnit,
}

impl Default for Kinematics {
    fn default() -> Self {
        Self::new(80.0, 80.0, 60.0, AngleUnit::Degrees)
    }
}

impl Kinematics {
    pub fn new(
        shoulder_to_elbow: f64,
        elbow_to_wrist: f64,
        wrist_to_hand: f64,
        unit: AngleUnit,
    ) -> Self {
        Self {
            shoulder_to_elbow,
            elbow_to_wrist,
            wrist_to_hand,
            unit,
        }
    }

    fn to_internal(&self, angle: f64) -> f64 {
        match self.unit {
            AngleUnit::Degrees => angle.to_radians(),
            AngleUnit::Radians => angle,
        }
    }

    fn from_internal(&self, angle: f64) -> f64 {
        match self.unit {
            AngleUnit::Degrees => angle.to_degrees(),
            AngleUnit::Radians => angle,
        }
    }

    /// Forward kinematics: gripper position for a joint-angle triple.
    ///
    /// The two planar links are summed as polar vectors, the wrist-to-hand
    /// offset is added along the resulting radius, and the combined planar
    /// radius is rotated by the hip angle. Hip zero aims along +y; the
    /// horizontal axes come back swapped from the rotation to match.
    pub fn to_cartesian(&self, hip: f64, shoulder: f64, elbow: f64) -> Point {
        let hip = self.to_internal(hip);
        let shoulder = self.to_internal(shoulder);
        let elbow = self.to_internal(elbow);

        let (u1, v1) = polar_to_planar(self.shoulder_to_elbow, shoulder);
        let (u2, v2) = polar_to_planar(self.elbow_to_wrist, elbow);

        let radius = u1 + u2 + self.wrist_to_hand;
        let height = v1 + v2;

        let (y, x) = polar_to_planar(radius, hip);
        Point::from_cartesian(x, y, height)
    }

    /// Inverse kinematics: the joint-angle triple that places the gripper
    /// at `(x, y, z)`.
    ///
    /// The hip comes from the polar angle in the horizontal plane; after
    /// subtracting the wrist-to-hand offset the remaining (radius, z) pair
    /// gives a combined reach and elevation, and the two link angles are
    /// solved with the law of cosines. Fails when the reach triangle is
    /// degenerate (target beyond the links' sum or inside their
    /// difference).
    pub fn from_cartesian(&self, x: f64, y: f64, z: f64) -> Result<JointAngles, GeometryError> {
        // Hip from the top-down view; axes swapped as in to_cartesian.
        let (planar_radius, hip) = planar_to_polar(y, x);

        let reach = planar_radius - self.wrist_to_hand;
        let (r1, elevation) = planar_to_polar(reach, z);

        let b = triangle_angle(self.elbow_to_wrist, self.shoulder_to_elbow, r1)?;
        let c = triangle_angle(r1, self.shoulder_to_elbow, self.elbow_to_wrist)?;

        let shoulder = elevation + b;
        let elbow = c + shoulder - PI;

        Ok(JointAngles {
            hip: self.from_internal(hip),
            shoulder: self.from_internal(shoulder),
            elbow: self.from_internal(elbow),
        })
    }
}

/// Rounding slack for the law-of-cosines argument. Fully stretched or
/// folded postures compute a cosine a few ulps past +/-1; genuine
/// unreachable targets overshoot by far more.
const COS_SLACK: f64 = 1e-9;

/// Angle opposite `leg2` in the triangle with sides `leg1`, `leg2` and
/// `opposite`, via the law of cosines. Degenerate zero-length legs yield
/// a zero angle rather than an error; a cosine outside [-1, 1] is an
/// unsolvable reach.
fn triangle_angle(leg1: f64, leg2: f64, opposite: f64) -> Result<f64, GeometryError> {
    if leg1 == 0.0 || leg2 == 0.0 {
        return Ok(0.0);
    }
    let cos = (opposite * opposite + leg1 * leg1 - leg2 * leg2) / (2.0 * leg1 * leg2);
    if !((-1.0 - COS_SLACK)..=(1.0 + COS_SLACK)).contains(&cos) {
        return Err(GeometryError::InvalidTriangle {
            leg1,
            leg2,
            opposite,
        });
    }
    Ok(cos.clamp(-1.0, 1.0).acos())
}

/// Planar Cartesian coordinates for a polar (radius, angle) pair.
fn polar_to_planar(r: f64, angle: f64) -> (f64, f64) {
    (r * angle.cos(), r * angle.sin())
}

/// Polar (radius, angle) pair for planar Cartesian coordinates.
/// The zero vector maps to (0, 0).
fn planar_to_polar(x: f64, y: f64) -> (f64, f64) {
    let r = x.hypot(y);
    if r == 0.0 {
        return (0.0, 0.0);
    }
    (r, y.atan2(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-5;

    fn assert_roundtrip(k: &Kinematics, hip: f64, shoulder: f64, elbow: f64) {
        let p = k.to_cartesian(hip, shoulder, elbow);
        let solved = k
            .from_cartesian(p.x, p.y, p.z)
            .unwrap_or_else(|e| panic!("({hip}, {shoulder}, {elbow}) failed to solve: {e}"));
        // Near inflection points several triples map to one position, so
        // compare by re-applying the forward map rather than by angle.
        let q = k.to_cartesian(solved.hip, solved.shoulder, solved.elbow);
        assert!(
            p.distance(&q) < TOLERANCE,
            "({hip}, {shoulder}, {elbow}): {p} re-solved to {q}"
        );
    }

    #[test]
    fn test_neutral_posture_position() {
        let k = Kinematics::default();
        // All joints at zero: both links and the hand offset lie flat
        // along the hip's zero bearing, which aims along +y.
        let p = k.to_cartesian(0.0, 0.0, 0.0);
        assert!((p.x - 0.0).abs() < TOLERANCE);
        assert!((p.y - 220.0).abs() < TOLERANCE);
        assert!((p.z - 0.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_hip_rotation_swings_the_plane() {
        let k = Kinematics::default();
        let p = k.to_cartesian(90.0, 0.0, 0.0);
        assert!((p.x - 220.0).abs() < TOLERANCE);
        assert!(p.y.abs() < TOLERANCE);
    }

    #[test]
    fn test_elbow_sweep_roundtrips() {
        let k = Kinematics::default();
        let mut elbow = -135.0;
        while elbow < 30.0 {
            assert_roundtrip(&k, 0.0, 82.0, elbow);
            elbow += 5.0;
        }
    }

    #[test]
    fn test_joint_grid_roundtrips() {
        let k = Kinematics::default();
        for hip in [-85.0, -30.0, 0.0, 45.0, 85.0] {
            for shoulder in [-15.0, 0.0, 40.0, 65.0] {
                for elbow in [-25.0, 0.0, 30.0, 84.0] {
                    assert_roundtrip(&k, hip, shoulder, elbow);
                }
            }
        }
    }

    #[test]
    fn test_unreachable_target_is_invalid_triangle() {
        let k = Kinematics::default();
        let err = k.from_cartesian(0.0, 1000.0, 0.0);
        assert!(matches!(err, Err(GeometryError::InvalidTriangle { .. })));
    }

    #[test]
    fn test_zero_length_leg_yields_zero_angle() {
        assert_eq!(triangle_angle(0.0, 80.0, 100.0), Ok(0.0));
        assert_eq!(triangle_angle(80.0, 0.0, 100.0), Ok(0.0));
    }

    #[test]
    fn test_radians_mode() {
        let deg = Kinematics::default();
        let rad = Kinematics::new(80.0, 80.0, 60.0, AngleUnit::Radians);
        let p = deg.to_cartesian(30.0, 45.0, -20.0);
        let q = rad.to_cartesian(
            30.0_f64.to_radians(),
            45.0_f64.to_radians(),
            -20.0_f64.to_radians(),
        );
        assert!(p.distance(&q) < TOLERANCE);
    }

    #[test]
    fn test_planar_to_polar_zero_vector() {
        assert_eq!(planar_to_polar(0.0, 0.0), (0.0, 0.0));
    }
}
