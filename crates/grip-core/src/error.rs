//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors raised by the kinematics solver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// The inverse-kinematics triangle cannot be solved: the requested
    /// reach is longer than the two links combined, or shorter than their
    /// difference, putting the law-of-cosines argument outside [-1, 1].
    #[error("sides {leg1}, {leg2} and {opposite} do not form a valid triangle")]
    InvalidTriangle {
        leg1: f64,
        leg2: f64,
        opposite: f64,
    },
}
