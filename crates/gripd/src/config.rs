//! Daemon configuration: controllers, arms and calibration.
//!
//! Configuration is TOML, loaded into fully typed structs and validated
//! before any hardware is touched. Example:
//!
//! ```toml
//! socket = "/tmp/gripd.sock"
//! log_level = "info"
//!
//! [[controllers]]
//! address = 0x40
//! oscillator_hz = 25000000
//! frequency = 50
//! driver = "sim"
//!
//! [[controllers.arms]]
//! step_mm = 10.0
//! angle_increment = 0.5
//!
//! [controllers.arms.hip]
//! channel = 15
//! trim = 0.0
//! angles = { min = -85.0, neutral = 0.0, max = 85.0 }
//!
//! [controllers.arms.elbow]
//! channel = 12
//! angles = { min = -25.0, neutral = 0.0, max = 84.5 }
//!
//! [controllers.arms.shoulder]
//! channel = 13
//! angles = { min = -15.0, neutral = 40.0, max = 65.0 }
//!
//! [controllers.arms.gripper]
//! channel = 14
//! angles = { min = -20.0, neutral = 0.0, max = 27.5 }
//! ```

use grip_core::{AngleUnit, ArmId, Kinematics, ServoCalibration};
use grip_hal::controller::{DEFAULT_OSCILLATOR_HZ, DEFAULT_RESOLUTION};
use grip_hal::{ArmSpec, Channel, RegisterBus, ServoBinding, SimBus};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration. All of them
/// are fatal at boot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("channel {channel} invalid, must be between 0 and 15")]
    InvalidChannel { channel: u8 },

    #[error("channel {channel} bound more than once on controller {address:#04x}")]
    DuplicateChannel { address: u16, channel: u8 },

    #[error("controller address {0:#04x} configured more than once")]
    DuplicateController(u16),

    #[error("duplicate arm identity {0}")]
    DuplicateArm(ArmId),

    #[error("{joint} angles must satisfy min <= neutral <= max")]
    InvalidAngleRange { joint: String },

    #[error("{field} must be positive")]
    NonPositive { field: String },

    #[error("no controllers configured")]
    Empty,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Unix socket the daemon listens on.
    #[serde(default = "defaults::socket")]
    pub socket: PathBuf,

    /// Default tracing filter directive.
    #[serde(default = "defaults::log_level")]
    pub log_level: String,

    pub controllers: Vec<ControllerConfig>,
}

/// One PWM controller board and the arms wired to it.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Bus address of the board.
    pub address: u16,

    /// Oscillator frequency in Hz; replace with a scope-calibrated value
    /// when the board's actual pulse widths drift.
    #[serde(default = "defaults::oscillator_hz")]
    pub oscillator_hz: u32,

    /// Tick resolution of one PWM period.
    #[serde(default = "defaults::resolution")]
    pub resolution: u16,

    /// Shared servo PWM frequency in Hz.
    #[serde(default = "defaults::frequency")]
    pub frequency: u32,

    /// Bus transport backing this board.
    #[serde(default)]
    pub driver: DriverKind,

    pub arms: Vec<ArmConfig>,
}

impl ControllerConfig {
    /// Derived identity of one of this controller's arms.
    pub fn arm_id(&self, arm: &ArmConfig) -> ArmId {
        ArmId::derive(
            self.address,
            arm.hip.channel,
            arm.elbow.channel,
            arm.shoulder.channel,
            arm.gripper.channel,
        )
    }
}

/// Bus transport selection.
///
/// `sim` runs against the in-memory register file; a real I2C transport
/// implements [`RegisterBus`] out of tree and would be registered here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Sim,
}

impl DriverKind {
    pub fn create_bus(&self) -> Box<dyn RegisterBus> {
        match self {
            DriverKind::Sim => Box::new(SimBus::new()),
        }
    }
}

/// One arm: four joint bindings plus its kinematics and motion tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ArmConfig {
    pub hip: JointConfig,
    pub elbow: JointConfig,
    pub shoulder: JointConfig,
    pub gripper: JointConfig,

    #[serde(default)]
    pub links: LinkConfig,

    /// Interpolation step length for requested moves, in mm.
    #[serde(default = "defaults::step_mm")]
    pub step_mm: f64,

    /// Degrees per step of the self-test sweep.
    #[serde(default = "defaults::angle_increment")]
    pub angle_increment: f64,
}

impl ArmConfig {
    /// Builds the hardware-facing spec for this arm.
    pub fn to_spec(&self, frequency: u32) -> Result<ArmSpec, ConfigError> {
        Ok(ArmSpec {
            hip: self.hip.to_binding("hip")?,
            elbow: self.elbow.to_binding("elbow")?,
            shoulder: self.shoulder.to_binding("shoulder")?,
            gripper: self.gripper.to_binding("gripper")?,
            kinematics: Kinematics::new(
                self.links.shoulder_to_elbow,
                self.links.elbow_to_wrist,
                self.links.wrist_to_hand,
                AngleUnit::Degrees,
            ),
            frequency,
            angle_increment: self.angle_increment,
            step_mm: self.step_mm,
        })
    }

    fn joints(&self) -> [(&'static str, &JointConfig); 4] {
        [
            ("hip", &self.hip),
            ("elbow", &self.elbow),
            ("shoulder", &self.shoulder),
            ("gripper", &self.gripper),
        ]
    }
}

/// One joint's channel, trim and arm-level angle range.
#[derive(Debug, Clone, Deserialize)]
pub struct JointConfig {
    pub channel: u8,

    /// Additive correction for assembly tolerance, in degrees.
    #[serde(default)]
    pub trim: f64,

    pub angles: AngleRange,

    #[serde(default)]
    pub calibration: ServoCalibration,
}

impl JointConfig {
    fn to_binding(&self, joint: &str) -> Result<ServoBinding, ConfigError> {
        let channel = Channel::new(self.channel).map_err(|_| ConfigError::InvalidChannel {
            channel: self.channel,
        })?;
        if !(self.angles.min <= self.angles.neutral && self.angles.neutral <= self.angles.max) {
            return Err(ConfigError::InvalidAngleRange {
                joint: joint.to_string(),
            });
        }
        Ok(ServoBinding {
            channel,
            calibration: self.calibration,
            neutral_angle: self.angles.neutral,
            min_angle: self.angles.min,
            max_angle: self.angles.max,
            trim: self.trim,
        })
    }
}

/// Arm-level angle range of one joint, in the trimmed servo frame.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AngleRange {
    pub min: f64,
    pub neutral: f64,
    pub max: f64,
}

/// Kinematic link lengths in millimetres.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "defaults::shoulder_to_elbow")]
    pub shoulder_to_elbow: f64,
    #[serde(default = "defaults::elbow_to_wrist")]
    pub elbow_to_wrist: f64,
    #[serde(default = "defaults::wrist_to_hand")]
    pub wrist_to_hand: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            shoulder_to_elbow: defaults::shoulder_to_elbow(),
            elbow_to_wrist: defaults::elbow_to_wrist(),
            wrist_to_hand: defaults::wrist_to_hand(),
        }
    }
}

impl Config {
    /// Reads, parses and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controllers.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut addresses = HashSet::new();
        let mut arm_ids = HashSet::new();
        for controller in &self.controllers {
            if !addresses.insert(controller.address) {
                return Err(ConfigError::DuplicateController(controller.address));
            }
            let mut channels = HashSet::new();
            for arm in &controller.arms {
                for (joint, joint_config) in arm.joints() {
                    // to_binding performs the range checks
                    joint_config.to_binding(joint)?;
                    if !channels.insert(joint_config.channel) {
                        return Err(ConfigError::DuplicateChannel {
                            address: controller.address,
                            channel: joint_config.channel,
                        });
                    }
                }
                if arm.step_mm <= 0.0 {
                    return Err(ConfigError::NonPositive {
                        field: "step_mm".to_string(),
                    });
                }
                if arm.angle_increment <= 0.0 {
                    return Err(ConfigError::NonPositive {
                        field: "angle_increment".to_string(),
                    });
                }

                let id = controller.arm_id(arm);
                if !arm_ids.insert(id.clone()) {
                    return Err(ConfigError::DuplicateArm(id));
                }
            }
        }
        Ok(())
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn socket() -> PathBuf {
        PathBuf::from("/tmp/gripd.sock")
    }
    pub fn log_level() -> String {
        "info".to_string()
    }
    pub fn oscillator_hz() -> u32 {
        super::DEFAULT_OSCILLATOR_HZ
    }
    pub fn resolution() -> u16 {
        super::DEFAULT_RESOLUTION
    }
    pub fn frequency() -> u32 {
        50
    }
    pub fn step_mm() -> f64 {
        10.0
    }
    pub fn angle_increment() -> f64 {
        0.5
    }
    pub fn shoulder_to_elbow() -> f64 {
        80.0
    }
    pub fn elbow_to_wrist() -> f64 {
        80.0
    }
    pub fn wrist_to_hand() -> f64 {
        60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[[controllers]]
address = 0x40
frequency = 50
driver = "sim"

[[controllers.arms]]

[controllers.arms.hip]
channel = 15
angles = { min = -85.0, neutral = 0.0, max = 85.0 }

[controllers.arms.elbow]
channel = 12
angles = { min = -25.0, neutral = 0.0, max = 84.5 }

[controllers.arms.shoulder]
channel = 13
angles = { min = -15.0, neutral = 40.0, max = 65.0 }

[controllers.arms.gripper]
channel = 14
angles = { min = -20.0, neutral = 0.0, max = 27.5 }
"#;

    fn parse(text: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(text).unwrap_or_else(|e| panic!("toml should parse: {e}"));
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.socket, PathBuf::from("/tmp/gripd.sock"));
        assert_eq!(config.log_level, "info");

        let controller = &config.controllers[0];
        assert_eq!(controller.address, 0x40);
        assert_eq!(controller.oscillator_hz, 25_000_000);
        assert_eq!(controller.resolution, 4096);
        assert_eq!(controller.frequency, 50);
        assert_eq!(controller.driver, DriverKind::Sim);

        let arm = &controller.arms[0];
        assert_eq!(arm.step_mm, 10.0);
        assert_eq!(arm.angle_increment, 0.5);
        assert_eq!(arm.links.shoulder_to_elbow, 80.0);
        assert_eq!(arm.hip.calibration, ServoCalibration::default());
        assert_eq!(
            controller.arm_id(arm).as_str(),
            "0x40-15121314"
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.controllers.len(), 1);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/gripd.toml");
        assert!(matches!(err, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_invalid_channel_rejected() {
        let text = MINIMAL.replace("channel = 15", "channel = 16");
        assert!(matches!(
            parse(&text),
            Err(ConfigError::InvalidChannel { channel: 16 })
        ));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let text = MINIMAL.replace("channel = 12", "channel = 15");
        assert!(matches!(
            parse(&text),
            Err(ConfigError::DuplicateChannel {
                address: 0x40,
                channel: 15
            })
        ));
    }

    #[test]
    fn test_duplicate_controller_address_rejected() {
        // two controllers at distinct addresses are fine...
        let two = format!(
            "{MINIMAL}{}",
            MINIMAL.replace("address = 0x40", "address = 0x41")
        );
        assert!(parse(&two).is_ok());

        // ...but configuring the same board twice is not
        let colliding = format!("{MINIMAL}{MINIMAL}");
        assert!(matches!(
            parse(&colliding),
            Err(ConfigError::DuplicateController(0x40))
        ));
    }

    #[test]
    fn test_unordered_angles_rejected() {
        let text = MINIMAL.replace(
            "angles = { min = -15.0, neutral = 40.0, max = 65.0 }",
            "angles = { min = -15.0, neutral = 70.0, max = 65.0 }",
        );
        assert!(matches!(
            parse(&text),
            Err(ConfigError::InvalidAngleRange { .. })
        ));
    }

    #[test]
    fn test_nonpositive_step_rejected() {
        let text = MINIMAL.replace("[[controllers.arms]]", "[[controllers.arms]]\nstep_mm = 0.0");
        assert!(matches!(parse(&text), Err(ConfigError::NonPositive { .. })));
    }

    #[test]
    fn test_empty_config_rejected() {
        let config: Config = toml::from_str("controllers = []").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Empty)));
    }
}
