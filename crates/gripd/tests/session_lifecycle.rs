//! Integration tests for the session layer: checkout/operate/checkin,
//! token enforcement, batch limits and the inactivity watchdog.
//!
//! All tests run against sim-bus registries with the clock paused, so
//! settle delays and the 60-second inactivity window elapse instantly.

use std::path::PathBuf;
use std::time::Duration;

use grip_core::{ArmId, Kinematics};
use grip_protocol::{Operation, Target};
use gripd::config::{
    AngleRange, ArmConfig, Config, ControllerConfig, DriverKind, JointConfig, LinkConfig,
};
use gripd::registry::{Registry, RegistryError};
use gripd::session::{SessionError, SessionToken};

// ============================================================================
// Test Helpers
// ============================================================================

fn joint(channel: u8, min: f64, neutral: f64, max: f64) -> JointConfig {
    JointConfig {
        channel,
        trim: 0.0,
        angles: AngleRange { min, neutral, max },
        calibration: Default::default(),
    }
}

/// Stock-arm joint ranges on channels 15/12/13/14.
fn stock_arm(hip: u8, elbow: u8, shoulder: u8, gripper: u8) -> ArmConfig {
    ArmConfig {
        hip: joint(hip, -85.0, 0.0, 85.0),
        elbow: joint(elbow, -25.0, 0.0, 84.5),
        shoulder: joint(shoulder, -15.0, 40.0, 65.0),
        gripper: joint(gripper, -20.0, 0.0, 27.5),
        links: LinkConfig::default(),
        step_mm: 10.0,
        angle_increment: 0.5,
    }
}

fn test_config() -> Config {
    Config {
        socket: PathBuf::from("/tmp/gripd-test.sock"),
        log_level: "info".to_string(),
        controllers: vec![ControllerConfig {
            address: 0x40,
            oscillator_hz: 25_000_000,
            resolution: 4096,
            frequency: 50,
            driver: DriverKind::Sim,
            arms: vec![stock_arm(15, 12, 13, 14)],
        }],
    }
}

fn arm_id() -> ArmId {
    ArmId::from("0x40-15121314")
}

/// A target well inside the stock arm's envelope.
fn reachable_target() -> Operation {
    let p = Kinematics::default().to_cartesian(10.0, 45.0, 5.0);
    Operation::MoveTo {
        target: Target::Cartesian {
            x: p.x,
            y: p.y,
            z: p.z,
        },
    }
}

// ============================================================================
// Checkout / Operate / Checkin
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_checkout_operate_checkin_lifecycle() {
    let registry = Registry::from_config(&test_config()).await.unwrap();
    let handle = registry.arm(&arm_id()).expect("arm should exist");

    // checkout powers the arm on and returns a token
    let token = handle.checkout().await.expect("checkout should succeed");
    assert!(handle.status().await.unwrap().powered);

    // a second checkout before checkin conflicts
    assert!(matches!(
        handle.checkout().await,
        Err(SessionError::Conflict { .. })
    ));

    // operating with the wrong token is rejected
    assert!(matches!(
        handle
            .operate(SessionToken::from("not-the-token"), vec![Operation::Grab])
            .await,
        Err(SessionError::TokenMismatch)
    ));

    // a valid batch executes in order and credits the movement counter
    let summary = handle
        .operate(
            token.clone(),
            vec![Operation::Grab, reachable_target(), Operation::Release],
        )
        .await
        .expect("operate should succeed");
    assert_eq!(summary.operation_count, 3);

    let session = handle.status().await.unwrap().session.expect("live session");
    assert!(
        session.movement_count >= 3,
        "grab + sub-moves + release, got {}",
        session.movement_count
    );

    // checkin reports the accounting, resets and powers off
    let checkin = handle.checkin(token.clone()).await.expect("checkin");
    assert_eq!(checkin.movement_count, session.movement_count);

    let snapshot = handle.status().await.unwrap();
    assert!(snapshot.session.is_none());
    assert!(!snapshot.powered);

    // the session is gone; a fresh checkout mints a different token
    assert!(matches!(
        handle.checkin(token.clone()).await,
        Err(SessionError::NotCheckedOut)
    ));
    let fresh = handle.checkout().await.unwrap();
    assert_ne!(token, fresh);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_batch_rejected() {
    let registry = Registry::from_config(&test_config()).await.unwrap();
    let handle = registry.arm(&arm_id()).unwrap();
    let token = handle.checkout().await.unwrap();

    let batch: Vec<Operation> = (0..26).map(|_| Operation::Grab).collect();
    assert!(matches!(
        handle.operate(token.clone(), batch).await,
        Err(SessionError::BatchTooLarge { max: 25 })
    ));

    // the batch was rejected wholesale; nothing was credited
    let session = handle.status().await.unwrap().session.unwrap();
    assert_eq!(session.movement_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_operation_aborts_remainder() {
    let registry = Registry::from_config(&test_config()).await.unwrap();
    let handle = registry.arm(&arm_id()).unwrap();
    let token = handle.checkout().await.unwrap();

    let result = handle
        .operate(
            token.clone(),
            vec![Operation::Grab, Operation::Unknown, Operation::Release],
        )
        .await;
    assert!(matches!(
        result,
        Err(SessionError::InvalidOperation { index: 1 })
    ));

    // the grab before the bad entry stays applied, the release never ran
    let session = handle.status().await.unwrap().session.unwrap();
    assert_eq!(session.movement_count, 1);

    // the session survives a failed batch
    assert!(handle.operate(token, vec![Operation::Release]).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_self_test_operation_counts_moves() {
    let registry = Registry::from_config(&test_config()).await.unwrap();
    let handle = registry.arm(&arm_id()).unwrap();
    let token = handle.checkout().await.unwrap();

    let summary = handle
        .operate(token, vec![Operation::Test])
        .await
        .expect("self-test should run");
    assert_eq!(summary.operation_count, 1);

    let session = handle.status().await.unwrap().session.unwrap();
    // a full four-joint sweep issues hundreds of discrete commands
    assert!(session.movement_count > 100);
}

// ============================================================================
// Inactivity Watchdog
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_inactivity_timeout_releases_arm() {
    let registry = Registry::from_config(&test_config()).await.unwrap();
    let handle = registry.arm(&arm_id()).unwrap();

    let token = handle.checkout().await.unwrap();
    assert!(handle.status().await.unwrap().powered);

    // no operate within the window: the watchdog resets and releases
    tokio::time::sleep(Duration::from_secs(120)).await;

    let snapshot = handle.status().await.unwrap();
    assert!(snapshot.session.is_none(), "session should be force-cleared");
    assert!(!snapshot.powered, "arm should be powered off");

    // no explicit checkin needed; the next checkout succeeds fresh
    let fresh = handle.checkout().await.unwrap();
    assert_ne!(token, fresh);

    // and the stale token is worthless
    assert!(matches!(
        handle.checkin(token).await,
        Err(SessionError::TokenMismatch)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_operate_defers_the_watchdog() {
    let registry = Registry::from_config(&test_config()).await.unwrap();
    let handle = registry.arm(&arm_id()).unwrap();
    let token = handle.checkout().await.unwrap();

    // keep poking the arm at 45-second intervals, beyond the raw window
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(45)).await;
        handle
            .operate(token.clone(), vec![Operation::Grab])
            .await
            .expect("session should still be alive");
    }

    assert!(handle.status().await.unwrap().session.is_some());
    handle.checkin(token).await.expect("explicit checkin");
}

#[tokio::test(start_paused = true)]
async fn test_late_expiry_after_checkin_is_noop() {
    let registry = Registry::from_config(&test_config()).await.unwrap();
    let handle = registry.arm(&arm_id()).unwrap();

    let token = handle.checkout().await.unwrap();
    handle.checkin(token).await.unwrap();

    // well past the window: nothing should fire against the free arm
    tokio::time::sleep(Duration::from_secs(180)).await;

    let snapshot = handle.status().await.unwrap();
    assert!(snapshot.session.is_none());
    assert!(handle.checkout().await.is_ok());
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_duplicate_registration_fails() {
    let mut registry = Registry::from_config(&test_config()).await.unwrap();
    assert_eq!(registry.len(), 1);

    let config = test_config();
    let controller_config = &config.controllers[0];
    let spec = controller_config.arms[0]
        .to_spec(controller_config.frequency)
        .unwrap();

    // a second board would be fine, but the identity is already taken
    let bus = DriverKind::Sim.create_bus();
    let controller = grip_hal::PwmController::new(bus, 0x40, 25_000_000, 4096).unwrap();
    let shared = std::sync::Arc::new(tokio::sync::Mutex::new(controller));

    let err = registry.register(arm_id(), spec, &shared).await;
    assert!(matches!(err, Err(RegistryError::DuplicateArm(_))));
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_arms_operate_independently() {
    let mut config = test_config();
    config.controllers[0].arms.push(stock_arm(0, 1, 2, 3));
    let registry = Registry::from_config(&config).await.unwrap();
    assert_eq!(registry.len(), 2);

    let first = registry.arm(&arm_id()).unwrap();
    let second = registry.arm(&ArmId::from("0x40-00010203")).unwrap();

    // both arms check out concurrently; the sessions are independent
    let (a, b) = tokio::join!(first.checkout(), second.checkout());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a, b);

    let (ra, rb) = tokio::join!(
        first.operate(a.clone(), vec![Operation::Grab]),
        second.operate(b.clone(), vec![Operation::Grab, Operation::Release])
    );
    assert_eq!(ra.unwrap().operation_count, 1);
    assert_eq!(rb.unwrap().operation_count, 2);

    // releasing one arm leaves the other session untouched
    first.checkin(a).await.unwrap();
    assert!(second.status().await.unwrap().session.is_some());
    second.checkin(b).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_registry_shutdown_stops_workers() {
    let registry = Registry::from_config(&test_config()).await.unwrap();
    let handle = registry.arm(&arm_id()).unwrap().clone();

    registry.shutdown().await;

    // the worker is gone; commands fail rather than hang
    assert!(matches!(
        handle.checkout().await,
        Err(SessionError::ChannelClosed)
    ));
}
