//! Per-client connection handler.
//!
//! Reads one JSON request per line, dispatches it against the registry
//! and writes one JSON response per line. A malformed line gets an error
//! response rather than dropping the connection; I/O errors end it.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::{debug, trace};

use grip_core::ArmId;
use grip_protocol::{
    ClientRequest, DaemonResponse, ErrorCode, RequestKind, PROTOCOL_VERSION,
};

use crate::registry::Registry;
use crate::session::{SessionError, SessionToken};
use crate::worker::ArmHandle;

/// Handles one client connection.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    registry: Arc<Registry>,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(stream: UnixStream, registry: Arc<Registry>, connection_number: u64) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            registry,
            connection_number,
        }
    }

    /// Request/response loop until the client disconnects.
    pub async fn run(mut self) {
        debug!(connection = self.connection_number, "client connected");
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let response = self.process(trimmed).await;
                    if self.send(&response).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(
                        connection = self.connection_number,
                        error = %e,
                        "connection read failed"
                    );
                    break;
                }
            }
        }
        debug!(connection = self.connection_number, "client disconnected");
    }

    async fn process(&self, line: &str) -> DaemonResponse {
        let request: ClientRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return DaemonResponse::error(
                    ErrorCode::BadRequest,
                    format!("malformed request: {e}"),
                );
            }
        };
        if request.version != PROTOCOL_VERSION {
            return DaemonResponse::error(
                ErrorCode::BadRequest,
                format!(
                    "unsupported protocol version {} (daemon speaks {PROTOCOL_VERSION})",
                    request.version
                ),
            );
        }
        trace!(connection = self.connection_number, request = ?request.request, "request");
        self.dispatch(request.request).await
    }

    async fn dispatch(&self, request: RequestKind) -> DaemonResponse {
        match request {
            RequestKind::Ping { seq } => DaemonResponse::Pong { seq },

            RequestKind::ListArms => DaemonResponse::ArmList {
                arms: self.registry.arm_ids(),
            },

            RequestKind::Checkout { arm } => match self.lookup(&arm) {
                Ok(handle) => match handle.checkout().await {
                    Ok(token) => DaemonResponse::CheckedOut {
                        token: token.as_str().to_string(),
                    },
                    Err(error) => session_error_response(error),
                },
                Err(response) => response,
            },

            RequestKind::Checkin { arm, token } => match self.lookup(&arm) {
                Ok(handle) => match handle.checkin(SessionToken::from(token)).await {
                    Ok(summary) => DaemonResponse::CheckedIn {
                        duration_seconds: summary.duration_seconds,
                        movement_count: summary.movement_count,
                    },
                    Err(error) => session_error_response(error),
                },
                Err(response) => response,
            },

            RequestKind::Operate {
                arm,
                token,
                operations,
            } => match self.lookup(&arm) {
                Ok(handle) => match handle.operate(SessionToken::from(token), operations).await {
                    Ok(summary) => DaemonResponse::Operated {
                        operation_count: summary.operation_count,
                        elapsed_seconds: summary.elapsed_seconds,
                        position: summary.position.into(),
                    },
                    Err(error) => session_error_response(error),
                },
                Err(response) => response,
            },

            RequestKind::GetArm { arm } => match self.lookup(&arm) {
                Ok(handle) => match handle.status().await {
                    Ok(snapshot) => DaemonResponse::ArmStatus {
                        arm: snapshot.id,
                        powered: snapshot.powered,
                        position: snapshot.position.into(),
                        session: snapshot.session.map(|s| grip_protocol::SessionSnapshot {
                            checked_out_at: s.checked_out_at,
                            movement_count: s.movement_count,
                        }),
                    },
                    Err(error) => session_error_response(error),
                },
                Err(response) => response,
            },

            RequestKind::GetPosition { arm } => match self.lookup(&arm) {
                Ok(handle) => match handle.status().await {
                    Ok(snapshot) => DaemonResponse::Position {
                        position: snapshot.position.into(),
                    },
                    Err(error) => session_error_response(error),
                },
                Err(response) => response,
            },
        }
    }

    fn lookup(&self, id: &ArmId) -> Result<&ArmHandle, DaemonResponse> {
        self.registry.arm(id).ok_or_else(|| {
            DaemonResponse::error(ErrorCode::BadRequest, format!("unknown arm id {id}"))
        })
    }

    async fn send(&mut self, response: &DaemonResponse) -> std::io::Result<()> {
        let json = serde_json::to_string(response).map_err(std::io::Error::other)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}

/// Maps a session-layer error onto the wire, following HTTP status
/// semantics: 403 for conflicts and token mismatches, 413 for oversized
/// batches, 400 for everything the client sent wrong, 500 for hardware
/// and geometry failures.
fn session_error_response(error: SessionError) -> DaemonResponse {
    let code = match &error {
        SessionError::Conflict { .. } | SessionError::TokenMismatch => ErrorCode::Forbidden,
        SessionError::BatchTooLarge { .. } => ErrorCode::PayloadTooLarge,
        SessionError::NotCheckedOut | SessionError::InvalidOperation { .. } => {
            ErrorCode::BadRequest
        }
        SessionError::Arm(_) | SessionError::ChannelClosed => ErrorCode::Internal,
    };
    DaemonResponse::error(code, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grip_hal::ArmError;

    #[test]
    fn test_error_code_mapping() {
        let conflict = session_error_response(SessionError::Conflict {
            since: chrono::Utc::now(),
        });
        assert!(matches!(conflict, DaemonResponse::Error { code: 403, .. }));

        let mismatch = session_error_response(SessionError::TokenMismatch);
        assert!(matches!(mismatch, DaemonResponse::Error { code: 403, .. }));

        let too_large = session_error_response(SessionError::BatchTooLarge { max: 25 });
        assert!(matches!(too_large, DaemonResponse::Error { code: 413, .. }));

        let no_session = session_error_response(SessionError::NotCheckedOut);
        assert!(matches!(no_session, DaemonResponse::Error { code: 400, .. }));

        let bad_op = session_error_response(SessionError::InvalidOperation { index: 2 });
        assert!(matches!(bad_op, DaemonResponse::Error { code: 400, .. }));

        let hw = session_error_response(SessionError::Arm(ArmError::OutOfBounds(
            grip_core::Point::ORIGIN,
        )));
        assert!(matches!(hw, DaemonResponse::Error { code: 500, .. }));
    }
}
