//! PCA9685-class 16-channel PWM controller driver.
//!
//! The driver owns the board-level oscillator/resolution/frequency
//! configuration and one [`ServoEncoder`] per occupied channel. Its job is
//! deriving correct tick values and validating channels and frequencies;
//! the byte transport itself is behind the [`RegisterBus`] seam.

use crate::bus::RegisterBus;
use crate::error::HalError;
use crate::servo::{PulseTiming, ServoEncoder, ServoState};
use grip_core::ServoCalibration;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Register map of the controller chip.
pub mod registers {
    pub const MODE1: u8 = 0x00;
    pub const MODE2: u8 = 0x01;
    pub const PRESCALE: u8 = 0xFE;
    pub const LED0_ON_L: u8 = 0x06;
    pub const LED0_ON_H: u8 = 0x07;
    pub const LED0_OFF_L: u8 = 0x08;
    pub const LED0_OFF_H: u8 = 0x09;
    pub const ALL_LED_ON_L: u8 = 0xFA;
    pub const ALL_LED_ON_H: u8 = 0xFB;
    pub const ALL_LED_OFF_L: u8 = 0xFC;
    pub const ALL_LED_OFF_H: u8 = 0xFD;
}

/// Mode and channel bits.
pub mod bits {
    pub const RESTART: u8 = 0x80;
    pub const SLEEP: u8 = 0x10;
    pub const ALLCALL: u8 = 0x01;
    pub const OUTDRV: u8 = 0x04;
    /// Bit 4 of LEDn_OFF_H: forces the channel fully low.
    pub const FULL_OFF: u8 = 0x10;
}

/// Number of PWM outputs on the board.
pub const CHANNEL_COUNT: u8 = 16;

/// Default board resolution (12-bit counter).
pub const DEFAULT_RESOLUTION: u16 = 4096;

/// Default oscillator frequency in Hz. Real chips drift; the configured
/// value can be replaced with a scope-calibrated one.
pub const DEFAULT_OSCILLATOR_HZ: u32 = 25_000_000;

/// Oscillator settle time after mode changes.
const OSCILLATOR_SETTLE: Duration = Duration::from_millis(5);

/// A validated PWM output channel, 0-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(u8);

impl Channel {
    pub fn new(channel: u8) -> Result<Self, HalError> {
        if channel >= CHANNEL_COUNT {
            return Err(HalError::InvalidChannel(channel));
        }
        Ok(Self(channel))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    fn index(&self) -> usize {
        self.0 as usize
    }

    /// First of the channel's four LEDn registers.
    fn base_register(&self) -> u8 {
        registers::LED0_ON_L + 4 * self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A controller shared between the arms wired to its channels.
pub type SharedController = Arc<Mutex<PwmController>>;

/// Driver for one PWM controller board.
pub struct PwmController {
    bus: Box<dyn RegisterBus>,
    address: u16,
    oscillator_hz: u32,
    resolution: u16,
    frequency: Option<u32>,
    servos: [Option<ServoEncoder>; 16],
}

impl PwmController {
    /// Initializes the board: all channels off, totem-pole outputs,
    /// all-call enabled, oscillator woken from sleep.
    pub fn new(
        mut bus: Box<dyn RegisterBus>,
        address: u16,
        oscillator_hz: u32,
        resolution: u16,
    ) -> Result<Self, HalError> {
        write_window(bus.as_mut(), registers::ALL_LED_ON_L, 0, 0)?;
        bus.write(registers::MODE2, bits::OUTDRV)?;
        bus.write(registers::MODE1, bits::ALLCALL)?;
        thread::sleep(OSCILLATOR_SETTLE);
        let mode1 = bus.read(registers::MODE1)?;
        bus.write(registers::MODE1, mode1 & !bits::SLEEP)?;
        thread::sleep(OSCILLATOR_SETTLE);

        info!(address = format!("{address:#04x}"), "PWM controller initialized");
        Ok(Self {
            bus,
            address,
            oscillator_hz,
            resolution,
            frequency: None,
            servos: Default::default(),
        })
    }

    /// Bus address of this board.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Shared PWM frequency, once the first servo has pinned it.
    pub fn frequency(&self) -> Option<u32> {
        self.frequency
    }

    pub fn resolution(&self) -> u16 {
        self.resolution
    }

    /// Sets the PWM frequency by programming the prescale register:
    /// `prescale = round(oscillator / resolution / frequency - 1)`.
    /// The chip only accepts prescale updates while asleep.
    pub fn set_frequency(&mut self, frequency: u32) -> Result<(), HalError> {
        if !(24..=1526).contains(&frequency) {
            return Err(HalError::UnsupportedFrequency(frequency));
        }
        let prescale = (self.oscillator_hz as f64 / self.resolution as f64 / frequency as f64
            - 1.0)
            .round() as u8;
        debug!(frequency, prescale, "setting PWM frequency");

        let old_mode = self.bus.read(registers::MODE1)?;
        self.bus
            .write(registers::MODE1, (old_mode & 0x7F) | bits::SLEEP)?;
        self.bus.write(registers::PRESCALE, prescale)?;
        self.bus.write(registers::MODE1, old_mode)?;
        thread::sleep(OSCILLATOR_SETTLE);
        self.bus.write(registers::MODE1, old_mode | bits::RESTART)?;

        self.frequency = Some(frequency);
        Ok(())
    }

    /// Registers a servo on a channel and drives it to its neutral angle.
    ///
    /// The first registration pins the board's shared PWM frequency;
    /// registering another servo with a different frequency is a
    /// configuration error, as is reusing an occupied channel.
    pub fn add_servo(
        &mut self,
        channel: Channel,
        frequency: u32,
        calibration: ServoCalibration,
    ) -> Result<(), HalError> {
        if self.servos[channel.index()].is_some() {
            return Err(HalError::ChannelOccupied(channel));
        }
        match self.frequency {
            None => self.set_frequency(frequency)?,
            Some(configured) if configured != frequency => {
                return Err(HalError::FrequencyMismatch {
                    requested: frequency,
                    configured,
                });
            }
            Some(_) => {}
        }

        let timing = PulseTiming {
            frequency,
            resolution: self.resolution,
        };
        let mut encoder = ServoEncoder::new(channel, calibration, timing)?;
        let neutral = calibration.neutral_angle;
        let (pulse, ticks) = encoder.encode_angle(neutral)?;
        self.set_channel_window(channel, 0, ticks)?;
        encoder.record(neutral, pulse, ticks);
        self.servos[channel.index()] = Some(encoder);

        debug!(%channel, frequency, "servo registered");
        Ok(())
    }

    /// Commands the servo on `channel` to an angle.
    pub fn set_servo_angle(&mut self, channel: Channel, angle: f64) -> Result<ServoState, HalError> {
        let encoder = self.servos[channel.index()]
            .as_ref()
            .ok_or(HalError::NoServo(channel))?;
        let (pulse, ticks) = encoder.encode_angle(angle)?;
        self.set_channel_window(channel, 0, ticks)?;
        if let Some(encoder) = self.servos[channel.index()].as_mut() {
            encoder.record(angle, pulse, ticks);
        }
        Ok(ServoState { angle, pulse, ticks })
    }

    /// Commands the servo on `channel` to a pulse width, keeping the
    /// cached angle unchanged.
    pub fn set_servo_pulse(&mut self, channel: Channel, pulse: f64) -> Result<ServoState, HalError> {
        let encoder = self.servos[channel.index()]
            .as_ref()
            .ok_or(HalError::NoServo(channel))?;
        let angle = encoder.state().angle;
        let ticks = encoder.pulse_to_ticks(pulse)?;
        self.set_channel_window(channel, 0, ticks)?;
        if let Some(encoder) = self.servos[channel.index()].as_mut() {
            encoder.record(angle, pulse, ticks);
        }
        Ok(ServoState { angle, pulse, ticks })
    }

    /// Last committed state of the servo on `channel`.
    pub fn servo_state(&self, channel: Channel) -> Result<ServoState, HalError> {
        self.servos[channel.index()]
            .as_ref()
            .map(ServoEncoder::state)
            .ok_or(HalError::NoServo(channel))
    }

    /// Writes the on/off tick window of one channel.
    pub fn set_channel_window(
        &mut self,
        channel: Channel,
        on: u16,
        off: u16,
    ) -> Result<(), HalError> {
        write_window(self.bus.as_mut(), channel.base_register(), on, off)?;
        Ok(())
    }

    /// Writes the on/off tick window of every channel at once.
    pub fn set_all_channels(&mut self, on: u16, off: u16) -> Result<(), HalError> {
        write_window(self.bus.as_mut(), registers::ALL_LED_ON_L, on, off)?;
        Ok(())
    }

    /// Forces a channel fully low (true) or resumes its last committed
    /// window (false). A fully-off servo has no holding torque and will
    /// not keep its position against external force.
    pub fn set_channel_full_off(&mut self, channel: Channel, full_off: bool) -> Result<(), HalError> {
        let ticks = self
            .servos[channel.index()]
            .as_ref()
            .map(|s| s.state().ticks)
            .unwrap_or(0);
        if full_off {
            self.bus.write(
                channel.base_register() + 3,
                ((ticks >> 8) as u8 & 0x0F) | bits::FULL_OFF,
            )?;
        } else {
            self.set_channel_window(channel, 0, ticks)?;
        }
        Ok(())
    }

    /// Drops every channel and issues the bus-wide software reset,
    /// returning the board to power-on defaults. Used at daemon shutdown.
    pub fn shutdown(&mut self) -> Result<(), HalError> {
        self.set_all_channels(0, 0)?;
        self.bus.reset()?;
        self.servos = Default::default();
        self.frequency = None;
        info!(address = format!("{:#04x}", self.address), "controller reset");
        Ok(())
    }
}

/// Writes a 4-register on/off window starting at `base`.
fn write_window(
    bus: &mut dyn RegisterBus,
    base: u8,
    on: u16,
    off: u16,
) -> Result<(), crate::bus::BusError> {
    bus.write(base, (on & 0xFF) as u8)?;
    bus.write(base + 1, (on >> 8) as u8)?;
    bus.write(base + 2, (off & 0xFF) as u8)?;
    bus.write(base + 3, (off >> 8) as u8)?;
    Ok(())
}
