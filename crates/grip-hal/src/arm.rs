//! Arm state machine: joint bindings, trim correction, reachability and
//! interpolated motion.
//!
//! The arm owns four channel bindings (hip, elbow, shoulder, gripper) on a
//! shared controller. Kinematic angles live in the untrimmed logical
//! frame; every value committed to a servo is `angle - trim`, and the
//! arm-level joint bounds are checked against that same trimmed value.

use crate::controller::{Channel, SharedController};
use crate::error::HalError;
use grip_core::{ArmId, GeometryError, JointAngles, Kinematics, Point, ServoCalibration};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, trace};

/// Physical settle delay between interpolation sub-moves.
pub const SETTLE: Duration = Duration::from_millis(50);

/// Settle delay after a gripper command.
pub const GRIPPER_SETTLE: Duration = Duration::from_millis(300);

/// Step length used for the smooth return-to-neutral in [`Arm::reset`].
pub const RESET_STEP_MM: f64 = 5.0;

/// Pause between full cycles of the repeating self-test sweep.
const SWEEP_CYCLE_PAUSE: Duration = Duration::from_secs(1);

/// Errors raised by arm operations.
#[derive(Debug, Clone, Error)]
pub enum ArmError {
    /// The target's inverse-kinematics solution violates a joint bound.
    #[error("point {0} is not reachable")]
    OutOfBounds(Point),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Hal(#[from] HalError),
}

/// Power states of an initialized arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Channels registered but not yet driven to neutral.
    Uninitialized,
    /// Channels forced fully low; no holding torque.
    Idle,
    /// Channels driving their last committed windows.
    Powered,
}

/// One joint's binding: its channel, servo calibration, arm-level angle
/// range and trim correction.
///
/// `neutral_angle`, `min_angle` and `max_angle` are in the trimmed frame
/// actually committed to the servo; `trim` converts between that frame
/// and the kinematic one.
#[derive(Debug, Clone, Copy)]
pub struct ServoBinding {
    pub channel: Channel,
    pub calibration: ServoCalibration,
    pub neutral_angle: f64,
    pub min_angle: f64,
    pub max_angle: f64,
    pub trim: f64,
}

impl ServoBinding {
    fn contains(&self, angle: f64) -> bool {
        (self.min_angle..=self.max_angle).contains(&angle)
    }
}

/// Everything needed to construct an [`Arm`] besides its identity and
/// controller.
#[derive(Debug, Clone)]
pub struct ArmSpec {
    pub hip: ServoBinding,
    pub elbow: ServoBinding,
    pub shoulder: ServoBinding,
    pub gripper: ServoBinding,
    pub kinematics: Kinematics,
    /// Shared PWM frequency of the owning controller, in Hz.
    pub frequency: u32,
    /// Degrees per step of the self-test sweep.
    pub angle_increment: f64,
    /// Interpolation step length for requested moves, in mm.
    pub step_mm: f64,
}

/// State machine for one physical arm.
pub struct Arm {
    id: ArmId,
    controller: SharedController,
    hip: ServoBinding,
    elbow: ServoBinding,
    shoulder: ServoBinding,
    gripper: ServoBinding,
    kinematics: Kinematics,
    frequency: u32,
    angle_increment: f64,
    step_mm: f64,
    state: PowerState,
    position: Point,
    angles: JointAngles,
}

impl Arm {
    /// Creates the arm without touching hardware. Call
    /// [`Arm::initialize`] before commanding motion; use the registry's
    /// fallible registration to guard against duplicate identities.
    pub fn new(id: ArmId, spec: ArmSpec, controller: SharedController) -> Self {
        let angles = JointAngles {
            hip: spec.hip.neutral_angle + spec.hip.trim,
            shoulder: spec.shoulder.neutral_angle + spec.shoulder.trim,
            elbow: spec.elbow.neutral_angle + spec.elbow.trim,
        };
        let position = spec
            .kinematics
            .to_cartesian(angles.hip, angles.shoulder, angles.elbow);
        Self {
            id,
            controller,
            hip: spec.hip,
            elbow: spec.elbow,
            shoulder: spec.shoulder,
            gripper: spec.gripper,
            kinematics: spec.kinematics,
            frequency: spec.frequency,
            angle_increment: spec.angle_increment,
            step_mm: spec.step_mm,
            state: PowerState::Uninitialized,
            position,
            angles,
        }
    }

    pub fn id(&self) -> &ArmId {
        &self.id
    }

    /// Current gripper position per the last committed command.
    pub fn position(&self) -> Point {
        self.position
    }

    /// Current joint angles in the kinematic frame.
    pub fn joint_angles(&self) -> JointAngles {
        self.angles
    }

    pub fn power_state(&self) -> PowerState {
        self.state
    }

    /// Configured interpolation step length in mm.
    pub fn step_mm(&self) -> f64 {
        self.step_mm
    }

    fn channels(&self) -> [Channel; 4] {
        [
            self.hip.channel,
            self.elbow.channel,
            self.shoulder.channel,
            self.gripper.channel,
        ]
    }

    fn neutral_posture(&self) -> JointAngles {
        JointAngles {
            hip: self.hip.neutral_angle + self.hip.trim,
            shoulder: self.shoulder.neutral_angle + self.shoulder.trim,
            elbow: self.elbow.neutral_angle + self.elbow.trim,
        }
    }

    /// Registers the four channels, drives the arm to its neutral
    /// posture, then powers the channels down.
    pub async fn initialize(&mut self) -> Result<(), ArmError> {
        {
            let mut controller = self.controller.lock().await;
            for binding in [&self.hip, &self.elbow, &self.shoulder, &self.gripper] {
                controller.add_servo(binding.channel, self.frequency, binding.calibration)?;
            }
            controller.set_servo_angle(self.hip.channel, self.hip.neutral_angle)?;
            controller.set_servo_angle(self.shoulder.channel, self.shoulder.neutral_angle)?;
            controller.set_servo_angle(self.elbow.channel, self.elbow.neutral_angle)?;
            controller.set_servo_angle(
                self.gripper.channel,
                self.gripper.neutral_angle - self.gripper.trim,
            )?;
        }
        sleep(GRIPPER_SETTLE).await;

        self.angles = self.neutral_posture();
        self.position =
            self.kinematics
                .to_cartesian(self.angles.hip, self.angles.shoulder, self.angles.elbow);
        self.state = PowerState::Powered;
        self.turn_off().await?;

        info!(arm = %self.id, position = %self.position, "arm initialized");
        Ok(())
    }

    /// Resumes PWM on all four channels. Commanded angle memory is kept
    /// in the chip's on/off registers, so the posture is unchanged.
    pub async fn turn_on(&mut self) -> Result<(), ArmError> {
        let mut controller = self.controller.lock().await;
        for channel in self.channels() {
            controller.set_channel_full_off(channel, false)?;
        }
        drop(controller);
        self.state = PowerState::Powered;
        debug!(arm = %self.id, "arm powered on");
        Ok(())
    }

    /// Forces all four channels fully low. The servos stop holding their
    /// position but the commanded angles stay cached.
    pub async fn turn_off(&mut self) -> Result<(), ArmError> {
        let mut controller = self.controller.lock().await;
        for channel in self.channels() {
            controller.set_channel_full_off(channel, true)?;
        }
        drop(controller);
        self.state = PowerState::Idle;
        debug!(arm = %self.id, "arm powered off");
        Ok(())
    }

    /// Solves inverse kinematics for `target` and checks every trimmed
    /// joint angle against its arm-level bounds.
    ///
    /// The solved (untrimmed) angles are returned alongside the verdict
    /// so callers can inspect why a target was rejected.
    pub fn is_reachable(&self, target: &Point) -> Result<(bool, JointAngles), GeometryError> {
        let solved = self
            .kinematics
            .from_cartesian(target.x, target.y, target.z)?;
        let reachable = self.hip.contains(solved.hip - self.hip.trim)
            && self.shoulder.contains(solved.shoulder - self.shoulder.trim)
            && self.elbow.contains(solved.elbow - self.elbow.trim);
        Ok((reachable, solved))
    }

    /// Commands all three joints at `target` as fast as possible, with no
    /// interpolation.
    ///
    /// Unreachable targets either fail with [`ArmError::OutOfBounds`] or
    /// return `false`, per `raise_on_unreachable`. Position and angle
    /// caches update once the hardware commands have been issued
    /// (fire-and-record; writes are not read back for confirmation).
    pub async fn go_directly_to_point(
        &mut self,
        target: &Point,
        raise_on_unreachable: bool,
    ) -> Result<bool, ArmError> {
        let (reachable, solved) = self.is_reachable(target)?;
        if !reachable {
            if raise_on_unreachable {
                return Err(ArmError::OutOfBounds(*target));
            }
            debug!(arm = %self.id, target = %target, "unreachable target, move skipped");
            return Ok(false);
        }

        {
            let mut controller = self.controller.lock().await;
            controller.set_servo_angle(self.hip.channel, solved.hip - self.hip.trim)?;
            controller
                .set_servo_angle(self.shoulder.channel, solved.shoulder - self.shoulder.trim)?;
            controller.set_servo_angle(self.elbow.channel, solved.elbow - self.elbow.trim)?;
        }
        self.position = *target;
        self.angles = solved;
        trace!(arm = %self.id, target = %target, "direct move");
        Ok(true)
    }

    /// Travels in a straight Cartesian line to `target`, subdividing the
    /// segment into `ceil(distance / step_mm)` equal sub-steps. The final
    /// sub-step lands exactly on the target.
    ///
    /// Returns the number of sub-moves that executed; with a non-raising
    /// policy, unreachable waypoints are skipped and not counted. A zero
    /// distance is a no-op.
    pub async fn go_to_point(
        &mut self,
        target: &Point,
        step_mm: f64,
        raise_on_unreachable: bool,
    ) -> Result<u32, ArmError> {
        let distance = self.position.distance(target);
        if distance == 0.0 {
            return Ok(0);
        }
        let steps = (distance / step_mm).ceil() as u32;
        if steps == 0 {
            return Ok(0);
        }

        let start = self.position;
        let mut executed = 0;
        for i in 1..=steps {
            let waypoint = start.lerp(target, f64::from(i) / f64::from(steps));
            if self
                .go_directly_to_point(&waypoint, raise_on_unreachable)
                .await?
            {
                executed += 1;
            }
            sleep(SETTLE).await;
        }
        debug!(arm = %self.id, target = %target, executed, "interpolated move complete");
        Ok(executed)
    }

    /// Smoothly returns the arm to its neutral posture and opens the
    /// gripper. Uses the same interpolated path as requested moves so the
    /// return is trim-aware rather than an instantaneous jump.
    pub async fn reset(&mut self) -> Result<u32, ArmError> {
        let neutral = self.neutral_posture();
        let target = self
            .kinematics
            .to_cartesian(neutral.hip, neutral.shoulder, neutral.elbow);
        let moves = self.go_to_point(&target, RESET_STEP_MM, false).await?;
        self.open().await?;
        info!(arm = %self.id, moves, "arm reset to neutral");
        Ok(moves + 1)
    }

    /// Opens the gripper, dropping whatever is held.
    pub async fn open(&mut self) -> Result<(), ArmError> {
        self.command_gripper(self.gripper.min_angle).await
    }

    /// Closes the gripper onto whatever is in front of it.
    pub async fn close(&mut self) -> Result<(), ArmError> {
        self.command_gripper(self.gripper.max_angle).await
    }

    async fn command_gripper(&mut self, angle: f64) -> Result<(), ArmError> {
        {
            let mut controller = self.controller.lock().await;
            controller.set_servo_angle(self.gripper.channel, angle - self.gripper.trim)?;
        }
        sleep(GRIPPER_SETTLE).await;
        Ok(())
    }

    /// Deterministic self-test: sweeps all four joints through their full
    /// range and back, counting every servo command issued. Runs one
    /// cycle unless `repeat` is set, in which case it loops until the
    /// caller drops the future.
    pub async fn test(&mut self, repeat: bool) -> Result<u64, ArmError> {
        let mut commands: u64 = 0;
        let mut hip = self.angles.hip - self.hip.trim;
        let mut shoulder = self.angles.shoulder - self.shoulder.trim;
        let mut elbow = self.angles.elbow - self.elbow.trim;

        {
            let mut controller = self.controller.lock().await;
            controller.set_servo_angle(self.hip.channel, hip)?;
            controller.set_servo_angle(self.shoulder.channel, shoulder)?;
            controller.set_servo_angle(self.elbow.channel, elbow)?;
        }
        commands += 3;
        self.close().await?;
        commands += 1;

        loop {
            commands += self.sweep(self.elbow.channel, &mut elbow, self.elbow.max_angle).await?;
            commands += self
                .sweep(self.shoulder.channel, &mut shoulder, self.shoulder.min_angle)
                .await?;
            self.close().await?;
            commands += 1;
            commands += self.sweep(self.hip.channel, &mut hip, self.hip.min_angle).await?;
            commands += self
                .sweep(self.shoulder.channel, &mut shoulder, self.shoulder.max_angle)
                .await?;
            commands += self.sweep(self.elbow.channel, &mut elbow, self.elbow.min_angle).await?;
            commands += self.sweep(self.hip.channel, &mut hip, self.hip.max_angle).await?;
            self.open().await?;
            commands += 1;
            commands += self
                .sweep(self.hip.channel, &mut hip, self.hip.neutral_angle)
                .await?;

            if !repeat {
                break;
            }
            sleep(SWEEP_CYCLE_PAUSE).await;
        }

        self.angles = JointAngles {
            hip: hip + self.hip.trim,
            shoulder: shoulder + self.shoulder.trim,
            elbow: elbow + self.elbow.trim,
        };
        self.position =
            self.kinematics
                .to_cartesian(self.angles.hip, self.angles.shoulder, self.angles.elbow);

        info!(arm = %self.id, commands, "self-test sweep complete");
        Ok(commands)
    }

    /// Steps one joint from its current trimmed angle toward `target` in
    /// `angle_increment` steps, commanding every step. The working value
    /// snaps to the exact target at the end so cycles stay deterministic.
    async fn sweep(
        &mut self,
        channel: Channel,
        current: &mut f64,
        target: f64,
    ) -> Result<u64, ArmError> {
        let increment = self.angle_increment;
        let mut commands = 0;
        let mut controller = self.controller.lock().await;
        if *current < target {
            while *current < target {
                controller.set_servo_angle(channel, *current)?;
                *current += increment;
                commands += 1;
            }
        } else {
            while *current > target {
                controller.set_servo_angle(channel, *current)?;
                *current -= increment;
                commands += 1;
            }
        }
        *current = target;
        Ok(commands)
    }

    /// Terminal transition: smooth return to neutral, then power-down.
    /// The registry drops the instance afterwards.
    pub async fn shutdown(&mut self) -> Result<(), ArmError> {
        self.reset().await?;
        self.turn_off().await?;
        self.state = PowerState::Uninitialized;
        Ok(())
    }
}
