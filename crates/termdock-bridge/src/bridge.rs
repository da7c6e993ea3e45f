//! The process bridge contract

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::EventReceiver;
use crate::Result;

/// Identifies a spawned session process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Globally unique for the lifetime of the host process
    pub id: String,
    /// OS process id, when the platform reports one
    pub pid: Option<u32>,
    /// When the process was spawned
    pub created_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pid,
            created_at: Utc::now(),
        }
    }
}

/// Result of a command issued through `run_command`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Text the command printed, with the echoed input stripped
    pub output: String,
    pub exit_code: i32,
}

/// Spawns and controls one OS process per session.
///
/// Every method may be arbitrarily delayed. `kill` is idempotent, and
/// `resize` never fails observably. Output and exit notices are delivered
/// through the stream returned by `take_events`, which can be taken once.
#[async_trait]
pub trait ProcessBridge: Send + Sync {
    /// Spawn a shell in `cwd`. No session exists if this fails.
    async fn create(&self, cwd: &Path, title: &str) -> Result<SessionHandle>;

    /// Forward raw input bytes (keystrokes, pastes) to the process.
    async fn write(&self, id: &str, bytes: &[u8]) -> Result<()>;

    /// Run a command on the session's input stream and wait for its status.
    ///
    /// Output produced by the command is still delivered as ordinary data
    /// events.
    async fn run_command(&self, id: &str, command: &str) -> Result<CommandOutcome>;

    async fn resize(&self, id: &str, cols: u16, rows: u16);

    async fn kill(&self, id: &str);

    /// Hand out the event stream. Returns `None` after the first call.
    fn take_events(&self) -> Option<EventReceiver>;
}
