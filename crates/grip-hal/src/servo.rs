//! Per-channel servo encoding: angle -> pulse -> tick.

use crate::controller::Channel;
use crate::error::HalError;
use grip_core::ServoCalibration;

/// Board-level timing shared by every servo on one controller: the PWM
/// signal frequency and the tick resolution of one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTiming {
    /// PWM signal frequency in Hz.
    pub frequency: u32,
    /// Counter steps per PWM period (the chip's bit depth, typically 4096).
    pub resolution: u16,
}

impl PulseTiming {
    /// Duration of one tick in microseconds.
    pub fn tick_micros(&self) -> f64 {
        1_000_000.0 / self.frequency as f64 / self.resolution as f64
    }
}

/// Last state committed to a servo.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ServoState {
    /// Commanded angle in degrees.
    pub angle: f64,
    /// Pulse width in milliseconds.
    pub pulse: f64,
    /// On-window length in ticks.
    pub ticks: u16,
}

/// Encoder for one servo channel.
///
/// Translates commanded angles through the calibration's piecewise-linear
/// pulse mapping into tick counts for the controller, and caches the last
/// committed `(angle, pulse, ticks)` triple.
#[derive(Debug, Clone)]
pub struct ServoEncoder {
    channel: Channel,
    calibration: ServoCalibration,
    timing: PulseTiming,
    state: ServoState,
    min_ticks: u16,
    max_ticks: u16,
    neutral_ticks: u16,
}

impl ServoEncoder {
    /// Creates an encoder and precomputes the boundary tick counts.
    pub fn new(
        channel: Channel,
        calibration: ServoCalibration,
        timing: PulseTiming,
    ) -> Result<Self, HalError> {
        let mut encoder = Self {
            channel,
            calibration,
            timing,
            state: ServoState::default(),
            min_ticks: 0,
            max_ticks: 0,
            neutral_ticks: 0,
        };
        encoder.min_ticks = encoder.pulse_to_ticks(calibration.min_pulse)?;
        encoder.max_ticks = encoder.pulse_to_ticks(calibration.max_pulse)?;
        encoder.neutral_ticks = encoder.pulse_to_ticks(calibration.neutral_pulse)?;
        Ok(encoder)
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn calibration(&self) -> &ServoCalibration {
        &self.calibration
    }

    /// Last committed state.
    pub fn state(&self) -> ServoState {
        self.state
    }

    /// Tick count at the minimum calibrated pulse.
    pub fn min_ticks(&self) -> u16 {
        self.min_ticks
    }

    /// Tick count at the maximum calibrated pulse.
    pub fn max_ticks(&self) -> u16 {
        self.max_ticks
    }

    /// Tick count at the neutral calibrated pulse.
    pub fn neutral_ticks(&self) -> u16 {
        self.neutral_ticks
    }

    /// Pulse width for an angle, interpolating linearly on either side of
    /// the neutral breakpoint.
    pub fn angle_to_pulse(&self, angle: f64) -> Result<f64, HalError> {
        let c = &self.calibration;
        if angle < c.min_angle || angle > c.max_angle {
            return Err(HalError::AngleOutOfRange {
                angle,
                min: c.min_angle,
                max: c.max_angle,
            });
        }

        let mut pulse = c.neutral_pulse;
        if angle > c.neutral_angle {
            pulse += (angle - c.neutral_angle) * (c.max_pulse - c.neutral_pulse)
                / (c.max_angle - c.neutral_angle);
        } else if angle < c.neutral_angle {
            pulse += (angle - c.neutral_angle) * (c.neutral_pulse - c.min_pulse)
                / (c.neutral_angle - c.min_angle);
        }
        Ok(pulse)
    }

    /// On-window tick count for a pulse width.
    pub fn pulse_to_ticks(&self, pulse: f64) -> Result<u16, HalError> {
        let c = &self.calibration;
        if pulse < c.min_pulse || pulse > c.max_pulse {
            return Err(HalError::PulseOutOfRange {
                pulse,
                min: c.min_pulse,
                max: c.max_pulse,
            });
        }
        Ok((pulse * 1000.0 / self.timing.tick_micros()).floor() as u16)
    }

    /// Full encoding of an angle: `(pulse, ticks)`.
    pub fn encode_angle(&self, angle: f64) -> Result<(f64, u16), HalError> {
        let pulse = self.angle_to_pulse(angle)?;
        let ticks = self.pulse_to_ticks(pulse)?;
        Ok((pulse, ticks))
    }

    /// Records a committed command. Called by the controller after the
    /// channel window has actually been written.
    pub fn record(&mut self, angle: f64, pulse: f64, ticks: u16) {
        self.state = ServoState { angle, pulse, ticks };
    }
}
