//! Grip Protocol - wire shapes for gripd daemon communication
//!
//! Line-delimited JSON over the daemon's Unix socket: each request and
//! response is one serialized message followed by a newline. The shapes
//! mirror the REST-style operation surface (checkout / checkin / operate
//! plus status reads), with error codes that follow HTTP semantics.

pub mod message;

pub use message::{
    ClientRequest, DaemonResponse, ErrorCode, Operation, PointDto, RequestKind, SessionSnapshot,
    Target, PROTOCOL_VERSION,
};
