//! Grip HAL - hardware actuation stack for the gripper arm
//!
//! This crate owns everything between a joint-angle decision and the bytes
//! on the controller bus:
//! - `bus` - the 8-bit register seam to the PWM chip, plus a simulated bus
//! - `controller` - the 16-channel PWM board driver (prescale, channel
//!   windows, power-down)
//! - `servo` - per-channel angle -> pulse -> tick encoding with calibration
//! - `arm` - the arm state machine: reachability, trim, interpolated motion
//!
//! Register-level I/O is synchronous; only motion paths that include
//! physical settle delays are async.

pub mod arm;
pub mod bus;
pub mod controller;
pub mod error;
pub mod servo;

// Re-exports for convenience
pub use arm::{Arm, ArmError, ArmSpec, PowerState, ServoBinding};
pub use bus::{BusError, RegisterBus, SimBus};
pub use controller::{Channel, PwmController, SharedController};
pub use error::HalError;
pub use servo::{PulseTiming, ServoEncoder, ServoState};
