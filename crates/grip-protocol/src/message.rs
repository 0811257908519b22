//! Protocol message types for daemon communication.

use chrono::{DateTime, Utc};
use grip_core::{ArmId, Point};
use serde::{Deserialize, Serialize};

/// Protocol version spoken by this build. Clients sending a different
/// version are rejected with [`ErrorCode::BadRequest`].
pub const PROTOCOL_VERSION: u16 = 1;

fn current_version() -> u16 {
    PROTOCOL_VERSION
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Protocol version
    #[serde(default = "current_version")]
    pub version: u16,

    /// Request payload
    #[serde(flatten)]
    pub request: RequestKind,
}

impl ClientRequest {
    /// Creates a request with the current protocol version.
    pub fn new(request: RequestKind) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request,
        }
    }
}

/// Request types a client can issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    /// Take exclusive control of an arm.
    Checkout { arm: ArmId },

    /// Release an arm, ending the session.
    Checkin { arm: ArmId, token: String },

    /// Execute a batch of operations under an active session.
    Operate {
        arm: ArmId,
        token: String,
        operations: Vec<Operation>,
    },

    /// Session and power snapshot of one arm.
    GetArm { arm: ArmId },

    /// Current gripper position of one arm.
    GetPosition { arm: ArmId },

    /// All arm ids known to the daemon.
    ListArms,

    /// Connection liveness check.
    Ping { seq: u64 },
}

/// One operation in an `operate` batch.
///
/// An unrecognized `type` deserializes to `Unknown` instead of failing
/// the whole request, so the daemon can apply the operations before it
/// and reject the batch from the bad entry onward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Interpolated straight-line move to a target.
    MoveTo { target: Target },

    /// Close the gripper.
    Grab,

    /// Open the gripper.
    Release,

    /// One bounded self-test sweep.
    Test,

    /// Catch-all for operation types this build does not know.
    #[serde(other)]
    Unknown,
}

/// A move target, either Cartesian millimetres or polar degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Cartesian { x: f64, y: f64, z: f64 },
    Polar { r: f64, lat: f64, lng: f64 },
}

impl Target {
    /// Resolves the target into a workspace point.
    pub fn to_point(self) -> Point {
        match self {
            Target::Cartesian { x, y, z } => Point::from_cartesian(x, y, z),
            Target::Polar { r, lat, lng } => Point::from_polar(r, lng, lat),
        }
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    /// Checkout succeeded; the token authorizes this session.
    CheckedOut { token: String },

    /// Checkin succeeded with the session's final accounting.
    CheckedIn {
        duration_seconds: f64,
        movement_count: u64,
    },

    /// Operation batch completed.
    Operated {
        operation_count: u32,
        elapsed_seconds: f64,
        position: PointDto,
    },

    /// Session/power/position snapshot of one arm.
    ArmStatus {
        arm: ArmId,
        powered: bool,
        position: PointDto,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<SessionSnapshot>,
    },

    /// Position of one arm.
    Position { position: PointDto },

    /// All known arm ids.
    ArmList { arms: Vec<ArmId> },

    /// Pong response to ping.
    Pong { seq: u64 },

    /// Request failed.
    Error { code: u16, message: String },
}

impl DaemonResponse {
    /// Creates an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code: code as u16,
            message: message.into(),
        }
    }
}

/// Error codes, mirroring HTTP status semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown arm id, missing session, malformed request or unknown
    /// operation type.
    BadRequest = 400,

    /// Checkout conflict or session token mismatch.
    Forbidden = 403,

    /// Operation batch over the maximum size.
    PayloadTooLarge = 413,

    /// Hardware or geometry failure while executing.
    Internal = 500,
}

/// Public view of an active session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// When the session was checked out.
    pub checked_out_at: DateTime<Utc>,

    /// Discrete servo moves executed so far.
    pub movement_count: u64,
}

/// Wire form of a workspace point, carrying both coordinate families.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PointDto {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
    pub lat: f64,
    pub lng: f64,
}

impl From<Point> for PointDto {
    fn from(p: Point) -> Self {
        Self {
            x: p.x,
            y: p.y,
            z: p.z,
            r: p.r,
            lat: p.lat,
            lng: p.lng,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = ClientRequest::new(RequestKind::Checkout {
            arm: ArmId::from("0x40-15121314"),
        });
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"checkout\""));
        assert!(json.contains("\"arm\":\"0x40-15121314\""));
        assert!(json.contains("\"version\":1"));
    }

    #[test]
    fn test_request_version_defaults_when_absent() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"type":"ping","seq":7}"#).unwrap();
        assert_eq!(req.version, PROTOCOL_VERSION);
        assert!(matches!(req.request, RequestKind::Ping { seq: 7 }));
    }

    #[test]
    fn test_cartesian_target_parses() {
        let op: Operation =
            serde_json::from_str(r#"{"type":"move_to","target":{"x":0,"y":170,"z":25}}"#).unwrap();
        match op {
            Operation::MoveTo {
                target: Target::Cartesian { x, y, z },
            } => {
                assert_eq!((x, y, z), (0.0, 170.0, 25.0));
            }
            other => panic!("expected cartesian move_to, got {other:?}"),
        }
    }

    #[test]
    fn test_polar_target_parses() {
        let op: Operation =
            serde_json::from_str(r#"{"type":"move_to","target":{"r":150,"lat":90,"lng":0}}"#)
                .unwrap();
        match op {
            Operation::MoveTo {
                target: Target::Polar { r, lat, lng },
            } => {
                assert_eq!((r, lat, lng), (150.0, 90.0, 0.0));
            }
            other => panic!("expected polar move_to, got {other:?}"),
        }
    }

    #[test]
    fn test_polar_target_resolves_to_same_point() {
        let p = Point::from_cartesian(30.0, 40.0, 120.0);
        let target = Target::Polar {
            r: p.r,
            lat: p.lat,
            lng: p.lng,
        };
        assert!(target.to_point().distance(&p) < 1e-9);
    }

    #[test]
    fn test_unrecognized_operation_becomes_unknown() {
        let op: Operation = serde_json::from_str(r#"{"type":"somersault"}"#).unwrap();
        assert!(matches!(op, Operation::Unknown));
    }

    #[test]
    fn test_batch_with_unknown_operation_still_parses() {
        let ops: Vec<Operation> = serde_json::from_str(
            r#"[{"type":"grab"},{"type":"somersault"},{"type":"release"}]"#,
        )
        .unwrap();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], Operation::Grab));
        assert!(matches!(ops[1], Operation::Unknown));
        assert!(matches!(ops[2], Operation::Release));
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = DaemonResponse::CheckedIn {
            duration_seconds: 12.5,
            movement_count: 42,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: DaemonResponse = serde_json::from_str(&json).unwrap();
        match parsed {
            DaemonResponse::CheckedIn {
                duration_seconds,
                movement_count,
            } => {
                assert_eq!(duration_seconds, 12.5);
                assert_eq!(movement_count, 42);
            }
            other => panic!("expected checked_in, got {other:?}"),
        }
    }

    #[test]
    fn test_error_codes() {
        let resp = DaemonResponse::error(ErrorCode::Forbidden, "arm is already checked out");
        match resp {
            DaemonResponse::Error { code, message } => {
                assert_eq!(code, 403);
                assert!(message.contains("checked out"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }
}
