//! gripd - arm registry, session layer and socket server
//!
//! This crate provides the daemon's infrastructure:
//! - `config` - TOML configuration of controllers, arms and calibration
//! - `registry` - explicitly owned map from arm identity to live arm
//!   workers; built at boot, reset at shutdown
//! - `worker` - one single-writer actor task per arm, serializing
//!   checkout/checkin/operate against that arm
//! - `session` - exclusive session tokens and the inactivity watchdog
//! - `server` - Unix socket server speaking line-delimited JSON
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌──────────────────────────────┐
//! │  DaemonServer   │─────▶│          Registry            │
//! │  (Unix socket)  │      │   ArmId -> ArmHandle map     │
//! └────────┬────────┘      └──────────────┬───────────────┘
//!          │ connections                  │ mpsc commands
//!          ▼                              ▼
//! ┌─────────────────┐      ┌──────────────────────────────┐
//! │ConnectionHandler│      │   ArmWorker (one per arm)    │
//! │  (per client)   │      │  Arm + Session + watchdog    │
//! └─────────────────┘      └──────────────────────────────┘
//! ```
//!
//! Different arms proceed fully in parallel; operations against one arm
//! serialize through its worker task.

pub mod config;
pub mod registry;
pub mod server;
pub mod session;
pub mod worker;
