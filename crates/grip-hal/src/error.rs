//! Hardware-layer error types following panic-free policy.

use crate::bus::BusError;
use crate::controller::Channel;
use thiserror::Error;

/// Errors raised by the controller driver and servo encoders.
///
/// Range violations are rejected before any bus traffic is issued;
/// configuration errors are fatal at setup time.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// Commanded angle outside the servo's calibrated span.
    #[error("angle {angle} out of range, must be between {min} and {max}")]
    AngleOutOfRange { angle: f64, min: f64, max: f64 },

    /// Commanded pulse outside the servo's calibrated span.
    #[error("pulse {pulse} ms out of range, must be between {min} ms and {max} ms")]
    PulseOutOfRange { pulse: f64, min: f64, max: f64 },

    /// Channel number beyond the board's 16 outputs.
    #[error("channel {0} invalid, must be between 0 and 15")]
    InvalidChannel(u8),

    /// A servo is already registered on the channel.
    #[error("channel {0} already has a servo registered")]
    ChannelOccupied(Channel),

    /// No servo registered on the channel.
    #[error("no servo registered on channel {0}")]
    NoServo(Channel),

    /// All servos on one board share one PWM frequency.
    #[error("servo frequency {requested} Hz conflicts with previously registered {configured} Hz")]
    FrequencyMismatch { requested: u32, configured: u32 },

    /// PWM frequency the prescaler cannot express.
    #[error("PWM frequency {0} Hz outside the supported 24-1526 Hz range")]
    UnsupportedFrequency(u32),

    #[error(transparent)]
    Bus(#[from] BusError),
}
