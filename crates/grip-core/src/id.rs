//! Arm identity derivation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for one arm.
///
/// Derived deterministically from the owning controller's bus address and
/// the four channel numbers the arm occupies, e.g. `0x40-15121314` for an
/// arm on controller `0x40` with hip 15, elbow 12, shoulder 13 and
/// gripper 14. Two arms on the same controller with the same channel set
/// would collide physically, so the registry rejects duplicate ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArmId(String);

impl ArmId {
    /// Derives the identity from a controller address and channel numbers.
    ///
    /// Channel order is hip, elbow, shoulder, gripper, each zero-padded
    /// to two digits.
    pub fn derive(address: u16, hip: u8, elbow: u8, shoulder: u8, gripper: u8) -> Self {
        Self(format!(
            "{address:#04x}-{hip:02}{elbow:02}{shoulder:02}{gripper:02}"
        ))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ArmId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ArmId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ArmId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_format() {
        let id = ArmId::derive(0x40, 15, 12, 13, 14);
        assert_eq!(id.as_str(), "0x40-15121314");
    }

    #[test]
    fn test_derive_pads_single_digit_channels() {
        let id = ArmId::derive(0x41, 0, 1, 2, 3);
        assert_eq!(id.as_str(), "0x41-00010203");
    }

    #[test]
    fn test_derive_is_deterministic() {
        assert_eq!(
            ArmId::derive(0x40, 15, 12, 13, 14),
            ArmId::derive(0x40, 15, 12, 13, 14)
        );
        assert_ne!(
            ArmId::derive(0x40, 15, 12, 13, 14),
            ArmId::derive(0x41, 15, 12, 13, 14)
        );
    }
}
