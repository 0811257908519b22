//! Register-level bus seam between the controller driver and transport.

use std::sync::{Arc, Mutex};
use thiserror::Error;

/// 8-bit register access to one PWM controller chip.
///
/// The driver talks to hardware exclusively through this trait; the real
/// I2C transport binds the bus address and lives outside this crate.
/// [`SimBus`] stands in for tests and boards that are not attached.
pub trait RegisterBus: Send {
    /// Reads one 8-bit register.
    fn read(&mut self, reg: u8) -> Result<u8, BusError>;

    /// Writes one 8-bit register.
    fn write(&mut self, reg: u8, value: u8) -> Result<(), BusError>;

    /// Issues the bus-wide software reset (the general-call SWRST
    /// command), returning every controller on the bus to power-on
    /// defaults.
    fn reset(&mut self) -> Result<(), BusError>;
}

/// Errors surfaced by a bus transport.
///
/// Bus failures are fatal for the in-flight command and are never
/// retried by this crate.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("read of register {reg:#04x} failed: {reason}")]
    Read { reg: u8, reason: String },

    #[error("write of register {reg:#04x} failed: {reason}")]
    Write { reg: u8, reason: String },

    #[error("bus transport unavailable: {0}")]
    Unavailable(String),
}

/// In-memory register file emulating a controller chip.
///
/// Every write is recorded so tests can assert on the exact register
/// traffic a command produced.
#[derive(Debug)]
pub struct SimBus {
    registers: [u8; 256],
    writes: Vec<(u8, u8)>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self {
            registers: [0; 256],
            writes: Vec::new(),
        }
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a simulated bus wrapped for sharing: the returned handle
    /// goes to the controller, the clone stays with the caller for
    /// inspecting traffic afterwards.
    pub fn shared() -> (SharedSimBus, SharedSimBus) {
        let bus = Arc::new(Mutex::new(SimBus::new()));
        (SharedSimBus(Arc::clone(&bus)), SharedSimBus(bus))
    }

    /// The write log, oldest first.
    pub fn writes(&self) -> &[(u8, u8)] {
        &self.writes
    }

    /// Clears the write log without touching register contents.
    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Current value of one register.
    pub fn register(&self, reg: u8) -> u8 {
        self.registers[reg as usize]
    }
}

impl RegisterBus for SimBus {
    fn read(&mut self, reg: u8) -> Result<u8, BusError> {
        Ok(self.registers[reg as usize])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.registers[reg as usize] = value;
        self.writes.push((reg, value));
        Ok(())
    }

    fn reset(&mut self) -> Result<(), BusError> {
        self.registers = [0; 256];
        Ok(())
    }
}

/// Cloneable handle to a [`SimBus`], usable both as the controller's bus
/// and as a test-side inspection handle.
#[derive(Debug, Clone)]
pub struct SharedSimBus(Arc<Mutex<SimBus>>);

impl SharedSimBus {
    /// Runs a closure against the underlying simulated bus.
    pub fn with<T>(&self, f: impl FnOnce(&mut SimBus) -> T) -> Result<T, BusError> {
        let mut bus = self
            .0
            .lock()
            .map_err(|_| BusError::Unavailable("simulated bus lock poisoned".to_string()))?;
        Ok(f(&mut bus))
    }

    /// Snapshot of the write log.
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.with(|b| b.writes().to_vec()).unwrap_or_default()
    }

    /// Current value of one register.
    pub fn register(&self, reg: u8) -> u8 {
        self.with(|b| b.register(reg)).unwrap_or(0)
    }
}

impl RegisterBus for SharedSimBus {
    fn read(&mut self, reg: u8) -> Result<u8, BusError> {
        self.with(|b| b.read(reg))?
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.with(|b| b.write(reg, value))?
    }

    fn reset(&mut self) -> Result<(), BusError> {
        self.with(|b| b.reset())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_bus_read_back() {
        let mut bus = SimBus::new();
        bus.write(0x06, 0xAB).unwrap();
        assert_eq!(bus.read(0x06).unwrap(), 0xAB);
        assert_eq!(bus.read(0x07).unwrap(), 0x00);
    }

    #[test]
    fn test_sim_bus_records_writes_in_order() {
        let mut bus = SimBus::new();
        bus.write(0x00, 0x01).unwrap();
        bus.write(0xFE, 0x79).unwrap();
        assert_eq!(bus.writes(), &[(0x00, 0x01), (0xFE, 0x79)]);
    }

    #[test]
    fn test_sim_bus_reset_clears_registers() {
        let mut bus = SimBus::new();
        bus.write(0x10, 0xFF).unwrap();
        bus.reset().unwrap();
        assert_eq!(bus.read(0x10).unwrap(), 0x00);
    }

    #[test]
    fn test_shared_bus_sees_traffic_from_clone() {
        let (mut handle, probe) = SimBus::shared();
        handle.write(0x20, 0x42).unwrap();
        assert_eq!(probe.register(0x20), 0x42);
        assert_eq!(probe.writes(), vec![(0x20, 0x42)]);
    }
}
