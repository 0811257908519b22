//! Per-servo calibration data.

use serde::{Deserialize, Serialize};

/// Calibration of one hobby servo: the pulse widths (milliseconds) that
/// produce its minimum, maximum and neutral positions, and the angles
/// (degrees) those positions correspond to.
///
/// The pulse mapping assumes `min_pulse < neutral_pulse < max_pulse` and
/// `min_angle < neutral_angle < max_angle`. These orderings are not
/// enforced at runtime; a calibration that violates them produces a
/// non-monotonic angle-to-pulse curve rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoCalibration {
    /// Pulse width producing the minimum angle, in ms.
    #[serde(default = "defaults::min_pulse")]
    pub min_pulse: f64,
    /// Pulse width producing the maximum angle, in ms.
    #[serde(default = "defaults::max_pulse")]
    pub max_pulse: f64,
    /// Pulse width producing the neutral angle, in ms.
    #[serde(default = "defaults::neutral_pulse")]
    pub neutral_pulse: f64,
    /// Angle reached at `min_pulse`, in degrees.
    #[serde(default = "defaults::min_angle")]
    pub min_angle: f64,
    /// Angle reached at `max_pulse`, in degrees.
    #[serde(default = "defaults::max_angle")]
    pub max_angle: f64,
    /// Angle reached at `neutral_pulse`, in degrees.
    #[serde(default = "defaults::neutral_angle")]
    pub neutral_angle: f64,
}

impl Default for ServoCalibration {
    /// Calibration for the SG90-class micro servos the stock arm ships
    /// with.
    fn default() -> Self {
        Self {
            min_pulse: defaults::min_pulse(),
            max_pulse: defaults::max_pulse(),
            neutral_pulse: defaults::neutral_pulse(),
            min_angle: defaults::min_angle(),
            max_angle: defaults::max_angle(),
            neutral_angle: defaults::neutral_angle(),
        }
    }
}

mod defaults {
    pub fn min_pulse() -> f64 {
        0.6
    }
    pub fn max_pulse() -> f64 {
        2.3
    }
    pub fn neutral_pulse() -> f64 {
        1.4
    }
    pub fn min_angle() -> f64 {
        -85.0
    }
    pub fn max_angle() -> f64 {
        85.0
    }
    pub fn neutral_angle() -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sg90() {
        let c = ServoCalibration::default();
        assert_eq!(c.min_pulse, 0.6);
        assert_eq!(c.max_pulse, 2.3);
        assert_eq!(c.neutral_pulse, 1.4);
        assert_eq!(c.min_angle, -85.0);
        assert_eq!(c.max_angle, 85.0);
        assert_eq!(c.neutral_angle, 0.0);
    }
}
