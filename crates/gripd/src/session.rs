//! Exclusive sessions and the inactivity watchdog.
//!
//! Each arm has at most one live session. The session owns an opaque
//! 128-bit token, accounting (checkout time, cumulative movement count)
//! and a watchdog task that force-releases the arm when no operation
//! arrives within the inactivity window.
//!
//! The watchdog never releases anything itself: on expiry it sends a
//! `ReleaseExpired` command carrying its token back to the arm worker, so
//! firing and an explicit checkin serialize through the same single-writer
//! task. A stale expiry (the session was already released or re-issued)
//! fails the token comparison and is a no-op.

use crate::worker::ArmCommand;
use chrono::{DateTime, Utc};
use grip_hal::ArmError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Inactivity window after which a session is force-released.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of operations in one `operate` batch.
pub const MAX_BATCH_OPERATIONS: usize = 25;

/// Errors surfaced by the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Checkout attempted while another session holds the arm.
    #[error("arm is already checked out (since {since})")]
    Conflict { since: DateTime<Utc> },

    /// Checkin/operate without any active session.
    #[error("no active session for this arm")]
    NotCheckedOut,

    /// The presented token does not match the current holder.
    #[error("session token does not match the current holder")]
    TokenMismatch,

    /// Operation batch over the fixed maximum.
    #[error("operation batch exceeds the maximum of {max} operations")]
    BatchTooLarge { max: usize },

    /// Unrecognized operation type; the batch stops here. Operations
    /// before the offending entry stay applied.
    #[error("unrecognized operation type at index {index}")]
    InvalidOperation { index: usize },

    #[error(transparent)]
    Arm(#[from] ArmError),

    /// The arm worker has shut down.
    #[error("arm worker unavailable")]
    ChannelClosed,
}

/// Opaque 128-bit session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mints a fresh random token.
    pub fn mint() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for logs; never log the full token.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One live session on one arm.
#[derive(Debug)]
pub struct Session {
    token: SessionToken,
    checked_out_at: DateTime<Utc>,
    started: Instant,
    movements: u64,
    watchdog: Watchdog,
}

impl Session {
    pub fn begin(token: SessionToken, watchdog: Watchdog) -> Self {
        Self {
            token,
            checked_out_at: Utc::now(),
            started: Instant::now(),
            movements: 0,
            watchdog,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn checked_out_at(&self) -> DateTime<Utc> {
        self.checked_out_at
    }

    pub fn movements(&self) -> u64 {
        self.movements
    }

    /// Credits executed servo moves to the session counter.
    pub fn add_movements(&mut self, moves: u64) {
        self.movements += moves;
    }

    /// Pushes the inactivity deadline out by the full window.
    pub fn touch(&self) {
        self.watchdog.touch();
    }

    /// Ends the session, cancelling the watchdog. Returns the session
    /// duration in seconds and the total movement count.
    pub fn finish(self) -> (f64, u64) {
        self.watchdog.cancel();
        (self.started.elapsed().as_secs_f64(), self.movements)
    }
}

/// Cancellable inactivity timer, tied 1:1 to a session's lifetime.
#[derive(Debug)]
pub struct Watchdog {
    deadline: watch::Sender<Instant>,
    cancel: CancellationToken,
}

impl Watchdog {
    /// Spawns the watchdog task. On expiry it sends
    /// [`ArmCommand::ReleaseExpired`] with `token` through `commands`
    /// and exits; the arm worker decides whether the expiry is still
    /// current.
    pub fn spawn(token: SessionToken, commands: mpsc::Sender<ArmCommand>) -> Self {
        let cancel = CancellationToken::new();
        let (deadline_tx, mut deadline_rx) = watch::channel(Instant::now() + SESSION_TIMEOUT);
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let deadline = *deadline_rx.borrow_and_update();
                tokio::select! {
                    biased;

                    _ = task_cancel.cancelled() => {
                        trace!(token = token.short(), "watchdog cancelled");
                        return;
                    }

                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            // session dropped without explicit cancel
                            return;
                        }
                        // deadline moved; loop and sleep again
                    }

                    _ = tokio::time::sleep_until(deadline) => {
                        debug!(token = token.short(), "inactivity window elapsed");
                        let _ = commands.send(ArmCommand::ReleaseExpired { token }).await;
                        return;
                    }
                }
            }
        });

        Self {
            deadline: deadline_tx,
            cancel,
        }
    }

    /// Restarts the inactivity window from now.
    pub fn touch(&self) {
        let _ = self.deadline.send(Instant::now() + SESSION_TIMEOUT);
    }

    /// Cancels the watchdog; a cancelled watchdog never fires.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
