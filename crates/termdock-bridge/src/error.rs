//! Bridge error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to spawn session: {0}")]
    Spawn(String),

    #[error("Write to session {id} failed: {reason}")]
    Write { id: String, reason: String },

    #[error("Resize of session {id} failed: {reason}")]
    Resize { id: String, reason: String },

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session {0} exited before the command completed")]
    SessionExited(String),
}
