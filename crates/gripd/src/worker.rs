//! Per-arm worker task - the single writer for one arm.
//!
//! Each arm gets exactly one worker task owning the [`Arm`] state machine
//! and its session slot. Checkout, checkin and operate on the same arm
//! serialize through the worker's command channel; different arms run
//! fully in parallel since they own disjoint hardware channels.

use crate::session::{
    Session, SessionError, SessionToken, Watchdog, MAX_BATCH_OPERATIONS,
};
use chrono::{DateTime, Utc};
use grip_core::{ArmId, Point};
use grip_hal::{Arm, PowerState};
use grip_protocol::Operation;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Commands accepted by an arm worker.
///
/// Each command carries a oneshot channel for its response, except the
/// fire-and-forget watchdog expiry.
#[derive(Debug)]
pub enum ArmCommand {
    /// Take exclusive control and power the arm on.
    Checkout {
        respond_to: oneshot::Sender<Result<SessionToken, SessionError>>,
    },

    /// End the session: reset to neutral, power off, report accounting.
    Checkin {
        token: SessionToken,
        respond_to: oneshot::Sender<Result<CheckinSummary, SessionError>>,
    },

    /// Execute an operation batch under the session.
    Operate {
        token: SessionToken,
        operations: Vec<Operation>,
        respond_to: oneshot::Sender<Result<OperateSummary, SessionError>>,
    },

    /// Read-only snapshot of arm and session state.
    Status {
        respond_to: oneshot::Sender<ArmSnapshot>,
    },

    /// Watchdog expiry. A no-op unless `token` still matches the live
    /// session, which makes a late expiry after an explicit checkin
    /// harmless.
    ReleaseExpired { token: SessionToken },

    /// Terminal: reset, power down and stop the worker.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Final accounting reported by checkin.
#[derive(Debug, Clone, Copy)]
pub struct CheckinSummary {
    pub duration_seconds: f64,
    pub movement_count: u64,
}

/// Result of an operation batch.
#[derive(Debug, Clone, Copy)]
pub struct OperateSummary {
    pub operation_count: u32,
    pub elapsed_seconds: f64,
    pub position: Point,
}

/// Read-only view of one arm.
#[derive(Debug, Clone)]
pub struct ArmSnapshot {
    pub id: ArmId,
    pub powered: bool,
    pub position: Point,
    pub session: Option<SessionInfo>,
}

/// Public accounting of an active session.
#[derive(Debug, Clone, Copy)]
pub struct SessionInfo {
    pub checked_out_at: DateTime<Utc>,
    pub movement_count: u64,
}

/// Cheap-to-clone handle for sending commands to an arm worker.
#[derive(Debug, Clone)]
pub struct ArmHandle {
    id: ArmId,
    sender: mpsc::Sender<ArmCommand>,
}

impl ArmHandle {
    pub fn id(&self) -> &ArmId {
        &self.id
    }

    pub async fn checkout(&self) -> Result<SessionToken, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(ArmCommand::Checkout { respond_to: tx }).await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    pub async fn checkin(&self, token: SessionToken) -> Result<CheckinSummary, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(ArmCommand::Checkin {
            token,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    pub async fn operate(
        &self,
        token: SessionToken,
        operations: Vec<Operation>,
    ) -> Result<OperateSummary, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(ArmCommand::Operate {
            token,
            operations,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<ArmSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(ArmCommand::Status { respond_to: tx }).await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(ArmCommand::Shutdown { respond_to: tx }).await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    async fn send(&self, command: ArmCommand) -> Result<(), SessionError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }
}

/// Spawns the worker task for an initialized arm and returns its handle.
pub fn spawn_worker(arm: Arm) -> ArmHandle {
    let (sender, receiver) = mpsc::channel(32);
    let id = arm.id().clone();
    let worker = ArmWorker {
        arm,
        session: None,
        commands: receiver,
        watchdog_sender: sender.clone(),
    };
    tokio::spawn(worker.run());
    ArmHandle { id, sender }
}

/// The worker: owns the arm and its session slot.
struct ArmWorker {
    arm: Arm,
    session: Option<Session>,
    commands: mpsc::Receiver<ArmCommand>,
    /// Cloned into each session's watchdog so expiries come back through
    /// the command channel.
    watchdog_sender: mpsc::Sender<ArmCommand>,
}

impl ArmWorker {
    async fn run(mut self) {
        debug!(arm = %self.arm.id(), "arm worker started");
        while let Some(command) = self.commands.recv().await {
            if !self.handle(command).await {
                break;
            }
        }
        debug!(arm = %self.arm.id(), "arm worker stopped");
    }

    /// Processes one command; returns false when the worker should stop.
    async fn handle(&mut self, command: ArmCommand) -> bool {
        match command {
            ArmCommand::Checkout { respond_to } => {
                let result = self.checkout().await;
                let _ = respond_to.send(result);
            }
            ArmCommand::Checkin { token, respond_to } => {
                let result = self.checkin(token).await;
                let _ = respond_to.send(result);
            }
            ArmCommand::Operate {
                token,
                operations,
                respond_to,
            } => {
                let result = self.operate(token, operations).await;
                let _ = respond_to.send(result);
            }
            ArmCommand::Status { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            ArmCommand::ReleaseExpired { token } => {
                self.release_expired(token).await;
            }
            ArmCommand::Shutdown { respond_to } => {
                if let Some(session) = self.session.take() {
                    session.finish();
                }
                if let Err(error) = self.arm.shutdown().await {
                    warn!(arm = %self.arm.id(), error = %error, "arm shutdown failed");
                }
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    async fn checkout(&mut self) -> Result<SessionToken, SessionError> {
        if let Some(session) = &self.session {
            return Err(SessionError::Conflict {
                since: session.checked_out_at(),
            });
        }

        self.arm.turn_on().await?;
        let token = SessionToken::mint();
        let watchdog = Watchdog::spawn(token.clone(), self.watchdog_sender.clone());
        self.session = Some(Session::begin(token.clone(), watchdog));

        info!(arm = %self.arm.id(), token = token.short(), "arm checked out");
        Ok(token)
    }

    async fn checkin(&mut self, token: SessionToken) -> Result<CheckinSummary, SessionError> {
        self.verify_token(&token)?;
        let session = self.session.take().ok_or(SessionError::NotCheckedOut)?;
        let (duration_seconds, movement_count) = session.finish();

        self.arm.reset().await?;
        self.arm.turn_off().await?;

        info!(
            arm = %self.arm.id(),
            duration_seconds,
            movement_count,
            "arm checked in"
        );
        Ok(CheckinSummary {
            duration_seconds,
            movement_count,
        })
    }

    async fn operate(
        &mut self,
        token: SessionToken,
        operations: Vec<Operation>,
    ) -> Result<OperateSummary, SessionError> {
        self.verify_token(&token)?;
        if operations.len() > MAX_BATCH_OPERATIONS {
            return Err(SessionError::BatchTooLarge {
                max: MAX_BATCH_OPERATIONS,
            });
        }

        let started = Instant::now();
        let mut executed = 0u32;
        for (index, operation) in operations.iter().enumerate() {
            self.touch_session();
            let moves = match operation {
                Operation::MoveTo { target } => {
                    let point = target.to_point();
                    let step = self.arm.step_mm();
                    u64::from(self.arm.go_to_point(&point, step, false).await?)
                }
                Operation::Grab => {
                    self.arm.close().await?;
                    1
                }
                Operation::Release => {
                    self.arm.open().await?;
                    1
                }
                Operation::Test => self.arm.test(false).await?,
                Operation::Unknown => {
                    // abort the remainder; prior operations stay applied
                    self.touch_session();
                    return Err(SessionError::InvalidOperation { index });
                }
            };
            if let Some(session) = self.session.as_mut() {
                session.add_movements(moves);
            }
            executed += 1;
            self.touch_session();
        }
        self.touch_session();

        Ok(OperateSummary {
            operation_count: executed,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            position: self.arm.position(),
        })
    }

    /// Handles a watchdog expiry. Only acts when the expired token still
    /// matches the live session; an expiry racing an explicit checkin
    /// loses the comparison and does nothing.
    async fn release_expired(&mut self, token: SessionToken) {
        let current = matches!(&self.session, Some(session) if session.token() == &token);
        if !current {
            debug!(arm = %self.arm.id(), "stale watchdog expiry ignored");
            return;
        }

        if let Some(session) = self.session.take() {
            let (duration_seconds, movement_count) = session.finish();
            warn!(
                arm = %self.arm.id(),
                duration_seconds,
                movement_count,
                "session expired from inactivity, releasing arm"
            );
        }
        if let Err(error) = self.arm.reset().await {
            warn!(arm = %self.arm.id(), error = %error, "reset failed during expiry release");
        }
        if let Err(error) = self.arm.turn_off().await {
            warn!(arm = %self.arm.id(), error = %error, "power-off failed during expiry release");
        }
    }

    fn verify_token(&self, token: &SessionToken) -> Result<(), SessionError> {
        match &self.session {
            None => Err(SessionError::NotCheckedOut),
            Some(session) if session.token() != token => Err(SessionError::TokenMismatch),
            Some(_) => Ok(()),
        }
    }

    fn touch_session(&self) {
        if let Some(session) = &self.session {
            session.touch();
        }
    }

    fn snapshot(&self) -> ArmSnapshot {
        ArmSnapshot {
            id: self.arm.id().clone(),
            powered: self.arm.power_state() == PowerState::Powered,
            position: self.arm.position(),
            session: self.session.as_ref().map(|session| SessionInfo {
                checked_out_at: session.checked_out_at(),
                movement_count: session.movements(),
            }),
        }
    }
}
