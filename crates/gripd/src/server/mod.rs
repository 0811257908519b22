//! Unix socket server for the gripd daemon.
//!
//! The server listens on a Unix socket, spawns a [`ConnectionHandler`]
//! per client and supports graceful shutdown via `CancellationToken`.
//! Each connection speaks line-delimited JSON: one request per line, one
//! response per line.

mod connection;

pub use connection::ConnectionHandler;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::registry::Registry;

/// Default socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/gripd.sock";

/// Unix socket server for the gripd daemon.
pub struct DaemonServer {
    socket_path: PathBuf,
    registry: Arc<Registry>,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        registry: Arc<Registry>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            registry,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the accept loop until the cancellation token triggers.
    pub async fn run(&self) -> Result<(), ServerError> {
        // Remove a stale socket file from an earlier run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;
        }
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ServerError::SocketSetup {
                    path: self.socket_path.clone(),
                    error: e.to_string(),
                })?;
            }
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;

        info!(socket = %self.socket_path.display(), "daemon server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let connection_number =
                                self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            let handler = ConnectionHandler::new(
                                stream,
                                Arc::clone(&self.registry),
                                connection_number,
                            );
                            tokio::spawn(handler.run());
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "failed to remove socket file"
                );
            }
        }
        info!("server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket_path() {
        assert_eq!(DEFAULT_SOCKET_PATH, "/tmp/gripd.sock");
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::SocketSetup {
            path: PathBuf::from("/tmp/test.sock"),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/tmp/test.sock"));
        assert!(err.to_string().contains("permission denied"));
    }
}
